use crate::dedupe::DedupeStrategy;
use crate::fetch::{FetchContext, ItemFetcher};
use crate::model::{Batch, Marker, PollResult, SharedClock, TriggerInstance, TriggerItem};
use crate::store::CursorStore;
use metrics::{counter, histogram};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument};
use trigger_core::Result;

/// Orchestrates one polling cycle: load marker, fetch, filter, persist,
/// return the new items. Markers are never cached between cycles; every
/// cycle re-reads the store, so the engine is correct across restarts.
pub struct PollEngine {
    store: Arc<dyn CursorStore>,
    fetcher: Arc<dyn ItemFetcher>,
    clock: SharedClock,
}

impl PollEngine {
    pub fn new(
        store: Arc<dyn CursorStore>,
        fetcher: Arc<dyn ItemFetcher>,
        clock: SharedClock,
    ) -> Self {
        Self {
            store,
            fetcher,
            clock,
        }
    }

    /// One regular cycle. A fetch failure leaves the persisted marker
    /// untouched, so the next cycle retries from the same baseline. A
    /// store failure after a successful fetch fails the whole cycle: the
    /// caller must not treat the fetched items as delivered, and the same
    /// items will surface again next cycle (at-least-once bias).
    #[instrument(skip(self, instance), fields(instance = %instance.key))]
    pub async fn poll(&self, instance: &TriggerInstance) -> Result<PollResult> {
        let previous = self.store.load(&instance.key).await?;
        let batch = self.fetch(instance, previous.clone()).await?;
        let fetched = batch.items.len();

        let outcome = instance.strategy.filter(previous.as_ref(), batch.items)?;

        if let Some(marker) = &outcome.next_marker {
            self.store.save(&instance.key, marker).await?;
        }

        counter!("trigger_poll_cycles", "instance" => instance.key.clone()).increment(1);
        counter!("trigger_items_emitted", "instance" => instance.key.clone())
            .increment(outcome.new_items.len() as u64);

        debug!(
            fetched,
            emitted = outcome.new_items.len(),
            advanced = outcome.next_marker.is_some(),
            "Completed poll cycle"
        );

        Ok(PollResult {
            items: outcome.new_items,
            marker: outcome.next_marker,
        })
    }

    /// Baseline cycle for `onEnable`: one bootstrap fetch with no previous
    /// marker, persist the resulting marker, emit nothing. With an empty
    /// first batch the baseline falls back to the clock (timebased) or an
    /// empty remembered set (identity).
    #[instrument(skip(self, instance), fields(instance = %instance.key))]
    pub async fn bootstrap(&self, instance: &TriggerInstance) -> Result<Marker> {
        let batch = self.fetch(instance, None).await?;
        let outcome = instance.strategy.filter(None, batch.items)?;

        let marker = outcome.next_marker.unwrap_or_else(|| match instance.strategy {
            DedupeStrategy::Timebased => Marker::Timestamp {
                last_epoch_ms: self.clock.now_epoch_ms(),
            },
            DedupeStrategy::Identity { .. } => Marker::SeenIds { ids: Vec::new() },
        });

        self.store.save(&instance.key, &marker).await?;

        debug!(discarded = outcome.new_items.len(), "Established baseline");

        Ok(marker)
    }

    /// Sample cycle for `test`: the full fetch+filter pipeline against a
    /// throwaway marker context. Never persists anything; returns the most
    /// recent `limit` items for operator preview.
    #[instrument(skip(self, instance), fields(instance = %instance.key))]
    pub async fn sample(&self, instance: &TriggerInstance, limit: usize) -> Result<Vec<TriggerItem>> {
        let batch = self.fetch(instance, None).await?;
        let outcome = instance.strategy.filter(None, batch.items)?;

        let mut items = outcome.new_items;
        if items.len() > limit {
            items = items.split_off(items.len() - limit);
        }

        Ok(items)
    }

    async fn fetch(&self, instance: &TriggerInstance, marker: Option<Marker>) -> Result<Batch> {
        let ctx = FetchContext {
            marker,
            props: instance.props.clone(),
            auth: instance.auth.clone(),
            clock: Arc::clone(&self.clock),
        };

        let started = Instant::now();
        let batch = self.fetcher.fetch(&ctx).await?;
        histogram!("trigger_fetch_duration_ms", "source" => self.fetcher.source_name().to_string())
            .record(started.elapsed().as_millis() as f64);

        Ok(batch)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use trigger_core::Error;

    /// Scripted fetcher: hands out the queued batches in order, or fails
    /// when scripted to.
    pub struct ScriptedFetcher {
        batches: Mutex<Vec<Result<Batch>>>,
    }

    impl ScriptedFetcher {
        pub fn new(batches: Vec<Result<Batch>>) -> Self {
            Self {
                batches: Mutex::new(batches),
            }
        }

        pub fn items(batches: Vec<Vec<TriggerItem>>) -> Self {
            Self::new(
                batches
                    .into_iter()
                    .map(|items| Ok(Batch { items }))
                    .collect(),
            )
        }
    }

    #[async_trait]
    impl ItemFetcher for ScriptedFetcher {
        async fn fetch(&self, _ctx: &FetchContext) -> Result<Batch> {
            let mut batches = self.batches.lock().unwrap();
            if batches.is_empty() {
                return Ok(Batch::default());
            }
            batches.remove(0)
        }

        fn source_name(&self) -> &str {
            "scripted"
        }
    }

    /// Store wrapper whose saves can be switched to fail, for exercising
    /// the store-failure path after a successful fetch.
    pub struct FailingSaveStore<S> {
        pub inner: S,
        pub fail_saves: std::sync::atomic::AtomicBool,
    }

    impl<S> FailingSaveStore<S> {
        pub fn new(inner: S) -> Self {
            Self {
                inner,
                fail_saves: std::sync::atomic::AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl<S: CursorStore> CursorStore for FailingSaveStore<S> {
        async fn load(&self, key: &str) -> Result<Option<Marker>> {
            self.inner.load(key).await
        }

        async fn save(&self, key: &str, marker: &Marker) -> Result<()> {
            if self.fail_saves.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(Error::Store("save rejected by test".to_string()));
            }
            self.inner.save(key, marker).await
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.inner.delete(key).await
        }
    }
}
