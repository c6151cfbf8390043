//! SQLite key-value backend

use super::KeyValueBackend;
use crate::config::StoreConfig;
use crate::error::{CoordinatorError, CoordinatorResult};

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use tracing::{debug, info};

/// Key-value persistence in a local SQLite file
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    /// Open (creating if needed) the database described by `config`
    pub async fn open(config: &StoreConfig) -> CoordinatorResult<Self> {
        if config.path == ":memory:" {
            // Every pooled connection would get its own empty database
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .connect("sqlite::memory:")
                .await?;
            return Ok(Self { pool });
        }

        Self::open_path(Path::new(&config.path), config.max_connections).await
    }

    pub async fn open_path(path: &Path, max_connections: u32) -> CoordinatorResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        info!("Opened store at {}", path.display());
        Ok(Self { pool })
    }

    /// Create tables if they do not exist yet
    pub async fn run_migrations(&self) -> CoordinatorResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        debug!("Store migrations complete");
        Ok(())
    }

    /// Health check
    pub async fn health_check(&self) -> CoordinatorResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueBackend for SqliteBackend {
    async fn load(&self, key: &str) -> CoordinatorResult<Option<String>> {
        let row = sqlx::query("SELECT value FROM kv_store WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.get::<String, _>("value")))
    }

    async fn save_all(&self, entries: &[(&str, String)]) -> CoordinatorResult<()> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        for (key, value) in entries {
            sqlx::query(
                r#"
                INSERT INTO kv_store (key, value, updated_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT (key)
                DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
                "#,
            )
            .bind(*key)
            .bind(value)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit()
            .await
            .map_err(|e| CoordinatorError::Persistence(e.to_string()))?;

        debug!("Saved {} key(s)", entries.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{MatchId, TokenId};
    use crate::store::DurableStore;
    use ethers::types::U256;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.db");
        let big = U256::from_dec_str("340282366920938463463374607431768211457").unwrap();

        {
            let backend = SqliteBackend::open_path(&path, 2).await.unwrap();
            backend.run_migrations().await.unwrap();
            let store = DurableStore::new(Arc::new(backend));
            assert!(
                store
                    .set_many(&[
                        ("activeMatchId", serde_json::to_value(Some(MatchId(big))).unwrap()),
                        ("partnerTokenId", serde_json::to_value(Some(TokenId::from(9))).unwrap()),
                    ])
                    .await
            );
        }

        let backend = SqliteBackend::open_path(&path, 2).await.unwrap();
        backend.run_migrations().await.unwrap();
        backend.health_check().await.unwrap();
        let store = DurableStore::new(Arc::new(backend));

        let match_id: Option<MatchId> = store.get("activeMatchId", None).await;
        let partner: Option<TokenId> = store.get("partnerTokenId", None).await;
        assert_eq!(match_id, Some(MatchId(big)));
        assert_eq!(partner, Some(TokenId::from(9)));
    }

    #[tokio::test]
    async fn test_overwrite_replaces_value() {
        let config = StoreConfig {
            path: ":memory:".to_string(),
            max_connections: 4,
        };
        let backend = SqliteBackend::open(&config).await.unwrap();
        backend.run_migrations().await.unwrap();
        let store = DurableStore::new(Arc::new(backend));

        assert!(store.set("activeMatchId", &Some(MatchId::from(1))).await);
        assert!(store.set("activeMatchId", &Option::<MatchId>::None).await);
        let value: Option<MatchId> = store.get("activeMatchId", Some(MatchId::from(5))).await;
        assert_eq!(value, None);
    }
}
