use crate::lifecycle::LifecycleManager;
use crate::model::{TriggerInstance, TriggerItem};
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, instrument, warn};
use trigger_core::backoff::retry_cycle;
use trigger_core::config::PollConfig;
use trigger_core::Result;

/// Downstream consumer of a cycle's new items.
#[async_trait]
pub trait ItemSink: Send + Sync {
    async fn deliver(&self, instance: &TriggerInstance, items: &[TriggerItem]) -> Result<()>;
}

/// Writes each new item's payload as one JSON line on stdout.
pub struct StdoutSink;

#[async_trait]
impl ItemSink for StdoutSink {
    async fn deliver(&self, _instance: &TriggerInstance, items: &[TriggerItem]) -> Result<()> {
        for item in items {
            let line = serde_json::to_string(&item.data)?;
            println!("{line}");
        }
        Ok(())
    }
}

/// The external scheduler of the engine: drives `run` for every configured
/// instance at a fixed interval. Cycles for different instances run
/// concurrently; within one instance the lifecycle manager serializes.
/// Retry and backoff for failed cycles live here, never in the engine.
pub struct Scheduler {
    lifecycle: Arc<LifecycleManager>,
    sink: Arc<dyn ItemSink>,
    instances: Vec<TriggerInstance>,
    config: PollConfig,
}

impl Scheduler {
    pub fn new(
        lifecycle: Arc<LifecycleManager>,
        sink: Arc<dyn ItemSink>,
        instances: Vec<TriggerInstance>,
        config: PollConfig,
    ) -> Self {
        Self {
            lifecycle,
            sink,
            instances,
            config,
        }
    }

    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<()> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Shutdown signal received");
                    let _ = shutdown_tx.send(()).await;
                }
                Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
            }
        });

        let interval = Duration::from_secs(self.config.interval_secs);
        info!(
            interval_secs = self.config.interval_secs,
            instances = self.instances.len(),
            "Starting scheduler"
        );

        loop {
            let cycles = join_all(self.instances.iter().map(|i| self.run_instance(i)));

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Shutting down scheduler");
                    break;
                }

                results = cycles => {
                    for (instance, result) in self.instances.iter().zip(results) {
                        match result {
                            Ok(()) => {}
                            Err(e) if e.is_fatal() => return Err(e),
                            Err(e) => {
                                // Marker is intact; the instance stays
                                // enabled and retries next interval.
                                warn!(
                                    instance = %instance.key,
                                    error = %e,
                                    "Cycle failed, will retry at the next interval"
                                );
                            }
                        }
                    }
                }
            }

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Shutting down scheduler");
                    break;
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }

        Ok(())
    }

    async fn run_instance(&self, instance: &TriggerInstance) -> Result<()> {
        let result = retry_cycle(
            || self.lifecycle.run(instance),
            self.config.max_retries,
            self.config.retry_base_delay_ms,
            "run",
        )
        .await?;

        if !result.items.is_empty() {
            info!(
                instance = %instance.key,
                emitted = result.items.len(),
                "Delivering new items"
            );
            self.sink.deliver(instance, &result.items).await?;
        }

        Ok(())
    }
}
