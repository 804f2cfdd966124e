pub mod http_source;

use crate::model::{Batch, Marker, SharedClock};
use async_trait::async_trait;
use serde_json::Value;
use trigger_core::Result;

/// Everything a connector's fetch logic gets to see for one cycle: the
/// previous marker (absent on first run), the instance's configuration and
/// auth, and an injected clock.
pub struct FetchContext {
    pub marker: Option<Marker>,
    pub props: Value,
    pub auth: Option<Value>,
    pub clock: SharedClock,
}

/// Connector-supplied capability: fetch the current raw batch given the
/// previous marker. Implementations must not retry internally; retry
/// policy belongs to the scheduler.
#[async_trait]
pub trait ItemFetcher: Send + Sync {
    async fn fetch(&self, ctx: &FetchContext) -> Result<Batch>;

    fn source_name(&self) -> &str;

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

pub use http_source::HttpSource;
