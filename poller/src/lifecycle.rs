use crate::engine::PollEngine;
use crate::model::{PollResult, TriggerInstance, TriggerItem};
use crate::store::CursorStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument};
use trigger_core::{Error, Result};

/// Drives a trigger instance through its four operations and owns marker
/// initialization/teardown. Also owns per-instance serialization: the
/// store has no compare-and-swap, so load → filter → save for one key is
/// guarded by an instance-scoped mutex. Unrelated instances never contend.
pub struct LifecycleManager {
    engine: PollEngine,
    store: Arc<dyn CursorStore>,
    test_sample_size: usize,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LifecycleManager {
    pub fn new(engine: PollEngine, store: Arc<dyn CursorStore>, test_sample_size: usize) -> Self {
        Self {
            engine,
            store,
            test_sample_size,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// absent → enabled. Establishes the marker baseline with one
    /// bootstrap fetch; no historical backlog is emitted.
    #[instrument(skip(self, instance), fields(instance = %instance.key))]
    pub async fn on_enable(&self, instance: &TriggerInstance) -> Result<()> {
        let lock = self.instance_lock(&instance.key).await;
        let _guard = lock.lock().await;

        if self.store.load(&instance.key).await?.is_some() {
            return Err(Error::InvalidState {
                operation: "onEnable",
                state: "enabled",
            });
        }

        self.engine.bootstrap(instance).await?;
        info!("Trigger enabled");
        Ok(())
    }

    /// enabled → absent. Deletes the marker; a later re-enable starts from
    /// a fresh baseline.
    #[instrument(skip(self, instance), fields(instance = %instance.key))]
    pub async fn on_disable(&self, instance: &TriggerInstance) -> Result<()> {
        let lock = self.instance_lock(&instance.key).await;
        let _guard = lock.lock().await;

        if self.store.load(&instance.key).await?.is_none() {
            return Err(Error::InvalidState {
                operation: "onDisable",
                state: "absent",
            });
        }

        self.store.delete(&instance.key).await?;
        info!("Trigger disabled");
        Ok(())
    }

    /// One scheduled cycle; emits the new items. Fails with
    /// `InvalidState` unless the instance is enabled.
    #[instrument(skip(self, instance), fields(instance = %instance.key))]
    pub async fn run(&self, instance: &TriggerInstance) -> Result<PollResult> {
        let lock = self.instance_lock(&instance.key).await;
        let _guard = lock.lock().await;

        if self.store.load(&instance.key).await?.is_none() {
            return Err(Error::InvalidState {
                operation: "run",
                state: "absent",
            });
        }

        self.engine.poll(instance).await
    }

    /// Sample-data preview for the operator configuring the trigger. Runs
    /// the full fetch+filter pipeline against a throwaway marker context;
    /// the persisted marker is never touched, so no lock is taken and the
    /// operation is valid in any state.
    #[instrument(skip(self, instance), fields(instance = %instance.key))]
    pub async fn test(&self, instance: &TriggerInstance) -> Result<Vec<TriggerItem>> {
        self.engine.sample(instance, self.test_sample_size).await
    }

    async fn instance_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }
}
