use crate::dedupe::DedupeStrategy;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Per-instance cursor state persisted between polling cycles.
///
/// The timestamp variant never moves backward; the seen-id variant is
/// bounded by the strategy's capacity, oldest insertions evicted first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Marker {
    Timestamp { last_epoch_ms: i64 },
    SeenIds { ids: Vec<String> },
}

/// One fetched record: the connector's opaque payload plus the extracted
/// timestamp and/or identifier the dedupe strategy keys on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerItem {
    pub epoch_ms: Option<i64>,
    pub id: Option<String>,
    pub data: Value,
}

impl TriggerItem {
    pub fn timebased(epoch_ms: i64, data: Value) -> Self {
        Self {
            epoch_ms: Some(epoch_ms),
            id: None,
            data,
        }
    }

    pub fn identity(id: impl Into<String>, data: Value) -> Self {
        Self {
            epoch_ms: None,
            id: Some(id.into()),
            data,
        }
    }
}

/// Raw output of one fetcher invocation, in source order.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub items: Vec<TriggerItem>,
}

/// One configured, running occurrence of a polling trigger. Owns exactly
/// one marker in the cursor store, keyed by `key`.
#[derive(Debug, Clone)]
pub struct TriggerInstance {
    pub key: String,
    pub name: String,
    pub props: Value,
    pub auth: Option<Value>,
    pub strategy: DedupeStrategy,
}

/// The outcome of one successful polling cycle: the items judged new, in
/// source order, and the marker that was persisted (`None` when the cycle
/// left the previous marker unchanged).
#[derive(Debug, Clone, PartialEq)]
pub struct PollResult {
    pub items: Vec<TriggerItem>,
    pub marker: Option<Marker>,
}

pub trait Clock: Send + Sync {
    fn now_epoch_ms(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Fixed clock for tests and replays.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn now_epoch_ms(&self) -> i64 {
        self.0
    }
}

pub type SharedClock = Arc<dyn Clock>;
