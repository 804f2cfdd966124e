use crate::dedupe::DedupeStrategy;
use crate::engine::PollEngine;
use crate::fetch::HttpSource;
use crate::lifecycle::LifecycleManager;
use crate::model::{SystemClock, TriggerInstance, TriggerItem};
use crate::scheduler::{ItemSink, Scheduler, StdoutSink};
use crate::store::{CursorStore, MemoryCursorStore, PgCursorStore};
use std::sync::Arc;
use tracing::{info, instrument};
use trigger_core::config::{StoreBackend, StrategyKind};
use trigger_core::{Config, Result};

pub struct App {
    config: Config,
    lifecycle: Arc<LifecycleManager>,
    sink: Arc<dyn ItemSink>,
    instance: TriggerInstance,
}

impl App {
    #[instrument(skip(config))]
    pub async fn new(config: Config, instance_key: String) -> Result<Self> {
        info!("Initializing application");

        let store: Arc<dyn CursorStore> = match config.store.backend {
            StoreBackend::Memory => Arc::new(MemoryCursorStore::new()),
            StoreBackend::Postgres => {
                let store = PgCursorStore::connect(&config.store).await?;
                store.health_check().await?;
                Arc::new(store)
            }
        };

        let source = Arc::new(HttpSource::new(config.source.clone())?);

        let strategy = match config.source.strategy {
            StrategyKind::Timebased => DedupeStrategy::Timebased,
            StrategyKind::Identity => DedupeStrategy::Identity {
                capacity: config.poll.dedupe_capacity,
            },
        };

        let instance = TriggerInstance {
            key: instance_key,
            name: "http-poll".to_string(),
            props: serde_json::json!({ "url": config.source.url }),
            auth: None,
            strategy,
        };

        let engine = PollEngine::new(Arc::clone(&store), source, Arc::new(SystemClock));
        let lifecycle = Arc::new(LifecycleManager::new(
            engine,
            store,
            config.poll.test_sample_size,
        ));

        Ok(Self {
            config,
            lifecycle,
            sink: Arc::new(StdoutSink),
            instance,
        })
    }

    pub async fn enable(&self) -> Result<()> {
        self.lifecycle.on_enable(&self.instance).await
    }

    pub async fn disable(&self) -> Result<()> {
        self.lifecycle.on_disable(&self.instance).await
    }

    pub async fn test(&self) -> Result<Vec<TriggerItem>> {
        self.lifecycle.test(&self.instance).await
    }

    /// One polling cycle, items delivered to the sink.
    pub async fn once(&self) -> Result<usize> {
        let result = self.lifecycle.run(&self.instance).await?;
        let emitted = result.items.len();
        if emitted > 0 {
            self.sink.deliver(&self.instance, &result.items).await?;
        }
        Ok(emitted)
    }

    pub async fn run_scheduler(&self) -> Result<()> {
        let scheduler = Scheduler::new(
            Arc::clone(&self.lifecycle),
            Arc::clone(&self.sink),
            vec![self.instance.clone()],
            self.config.poll.clone(),
        );
        scheduler.run().await
    }
}
