use super::{FetchContext, ItemFetcher};
use crate::model::{Batch, TriggerItem};
use async_trait::async_trait;
use chrono::DateTime;
use reqwest::header::AUTHORIZATION;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument};
use trigger_core::config::SourceConfig;
use trigger_core::{Error, Result};

const SOURCE_NAME: &str = "http";
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Generic JSON-over-HTTP fetcher. Issues one GET per cycle, digs the item
/// array out of the response with a JSON pointer, and extracts the
/// per-item timestamp/identifier from configured fields.
pub struct HttpSource {
    client: reqwest::Client,
    config: SourceConfig,
}

impl HttpSource {
    pub fn new(config: SourceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::fetch(SOURCE_NAME, e))?;

        Ok(Self { client, config })
    }
}

#[async_trait]
impl ItemFetcher for HttpSource {
    #[instrument(skip(self, _ctx))]
    async fn fetch(&self, _ctx: &FetchContext) -> Result<Batch> {
        let mut request = self.client.get(&self.config.url);
        if let Some(auth) = &self.config.auth_header {
            request = request.header(AUTHORIZATION, auth);
        }

        let response = request
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::fetch(SOURCE_NAME, e))?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::fetch(SOURCE_NAME, e))?;

        let items = extract_items(&body, &self.config)?;

        debug!(url = %self.config.url, items = items.len(), "Fetched batch");

        Ok(Batch { items })
    }

    fn source_name(&self) -> &str {
        SOURCE_NAME
    }

    async fn health_check(&self) -> Result<()> {
        self.client
            .get(&self.config.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::fetch(SOURCE_NAME, e))?;
        Ok(())
    }
}

fn extract_items(body: &Value, config: &SourceConfig) -> Result<Vec<TriggerItem>> {
    let node = if config.items_pointer.is_empty() {
        body
    } else {
        body.pointer(&config.items_pointer).ok_or_else(|| {
            Error::fetch(
                SOURCE_NAME,
                format!("items pointer {} matched nothing", config.items_pointer),
            )
        })?
    };

    let array = node
        .as_array()
        .ok_or_else(|| Error::fetch(SOURCE_NAME, "items node is not an array"))?;

    array
        .iter()
        .map(|raw| {
            let epoch_ms = match &config.timestamp_field {
                Some(field) => Some(extract_epoch_ms(raw, field)?),
                None => None,
            };
            let id = match &config.id_field {
                Some(field) => Some(extract_id(raw, field)?),
                None => None,
            };

            Ok(TriggerItem {
                epoch_ms,
                id,
                data: raw.clone(),
            })
        })
        .collect()
}

/// Accepts either an integer epoch-milliseconds value or an RFC 3339
/// timestamp string.
fn extract_epoch_ms(raw: &Value, field: &str) -> Result<i64> {
    let value = raw
        .get(field)
        .ok_or_else(|| Error::fetch(SOURCE_NAME, format!("item has no field {field}")))?;

    match value {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| Error::fetch(SOURCE_NAME, format!("{field} is not a whole number"))),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.timestamp_millis())
            .map_err(|e| Error::fetch(SOURCE_NAME, format!("{field} is not RFC 3339: {e}"))),
        other => Err(Error::fetch(
            SOURCE_NAME,
            format!("{field} has unsupported type: {other}"),
        )),
    }
}

fn extract_id(raw: &Value, field: &str) -> Result<String> {
    let value = raw
        .get(field)
        .ok_or_else(|| Error::fetch(SOURCE_NAME, format!("item has no field {field}")))?;

    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(Error::fetch(
            SOURCE_NAME,
            format!("{field} has unsupported type: {other}"),
        )),
    }
}
