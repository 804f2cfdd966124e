use crate::model::Marker;
use async_trait::async_trait;
use metrics::counter;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, instrument};
use trigger_core::config::StoreConfig;
use trigger_core::{Error, Result};

/// Durable, namespaced marker storage. One entry per trigger instance,
/// keyed by the instance key; writes are atomic per key.
#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<Marker>>;
    async fn save(&self, key: &str, marker: &Marker) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Process-local store. Used by tests and by `test`/ephemeral runs where
/// markers do not need to survive a restart.
#[derive(Default)]
pub struct MemoryCursorStore {
    markers: RwLock<HashMap<String, Marker>>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn load(&self, key: &str) -> Result<Option<Marker>> {
        Ok(self.markers.read().await.get(key).cloned())
    }

    async fn save(&self, key: &str, marker: &Marker) -> Result<()> {
        self.markers
            .write()
            .await
            .insert(key.to_string(), marker.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.markers.write().await.remove(key);
        Ok(())
    }
}

/// Postgres-backed store. The marker is persisted as a single JSONB value
/// per instance key and written with an upsert, so a concurrent `load`
/// sees either the old or the new marker, never a partial write.
pub struct PgCursorStore {
    pool: PgPool,
}

impl PgCursorStore {
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trigger_cursors (
                instance_key TEXT PRIMARY KEY,
                marker JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl CursorStore for PgCursorStore {
    #[instrument(skip(self))]
    async fn load(&self, key: &str) -> Result<Option<Marker>> {
        let row: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT marker FROM trigger_cursors WHERE instance_key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some(value) => {
                let marker = serde_json::from_value(value)
                    .map_err(|e| Error::Store(format!("corrupt marker for {key}: {e}")))?;
                Ok(Some(marker))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self, marker))]
    async fn save(&self, key: &str, marker: &Marker) -> Result<()> {
        let value = serde_json::to_value(marker)?;

        sqlx::query(
            r#"
            INSERT INTO trigger_cursors (instance_key, marker, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (instance_key) DO UPDATE SET
                marker = EXCLUDED.marker,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        counter!("trigger_markers_saved").increment(1);
        debug!(key, "Saved marker");

        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM trigger_cursors WHERE instance_key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;

        debug!(key, "Deleted marker");
        Ok(())
    }
}
