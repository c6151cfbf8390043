//! Durable key-value store for session state that must survive restarts
//!
//! Handles:
//! - Typed get/set on top of a raw string backend
//! - Tagged bigint encoding (see [`codec`])
//! - Swallowing and logging backend failures so callers keep running on
//!   in-memory state

pub mod codec;
#[cfg(test)]
mod memory;
mod sqlite;

#[cfg(test)]
pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

use crate::error::CoordinatorResult;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, warn};

/// Raw persistence backend. Values are JSON text.
#[async_trait]
pub trait KeyValueBackend: Send + Sync {
    async fn load(&self, key: &str) -> CoordinatorResult<Option<String>>;

    /// Write all entries, atomically if the backend supports it
    async fn save_all(&self, entries: &[(&str, String)]) -> CoordinatorResult<()>;
}

/// Typed facade over a [`KeyValueBackend`]. Never returns errors to callers.
#[derive(Clone)]
pub struct DurableStore {
    backend: Arc<dyn KeyValueBackend>,
}

impl DurableStore {
    pub fn new(backend: Arc<dyn KeyValueBackend>) -> Self {
        Self { backend }
    }

    /// Read `key`, falling back to `default` when missing or unreadable
    pub async fn get<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        let raw = match self.backend.load(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return default,
            Err(e) => {
                error!(key, error = %e, "Error reading stored key");
                crate::metrics::record_store_failure("get");
                return default;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "Stored value is corrupt, using default");
                crate::metrics::record_store_failure("decode");
                default
            }
        }
    }

    /// Write a single key. Returns `false` if the value was not persisted.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> bool {
        match serde_json::to_value(value) {
            Ok(value) => self.set_many(&[(key, value)]).await,
            Err(e) => {
                error!(key, error = %e, "Failed to encode value for storage");
                false
            }
        }
    }

    /// Write several keys together. Returns `false` if nothing was persisted.
    pub async fn set_many(&self, entries: &[(&str, Value)]) -> bool {
        let encoded: Vec<(&str, String)> = entries
            .iter()
            .map(|(key, value)| (*key, value.to_string()))
            .collect();

        match self.backend.save_all(&encoded).await {
            Ok(()) => true,
            Err(e) => {
                let keys: Vec<&str> = entries.iter().map(|(k, _)| *k).collect();
                error!(?keys, error = %e, "Error writing stored keys");
                crate::metrics::record_store_failure("set");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::MatchId;
    use ethers::types::U256;
    use serde_json::json;

    fn memory_store() -> (Arc<MemoryBackend>, DurableStore) {
        let backend = Arc::new(MemoryBackend::new());
        (backend.clone(), DurableStore::new(backend))
    }

    #[tokio::test]
    async fn test_missing_key_returns_default() {
        let (_, store) = memory_store();
        let value: Option<MatchId> = store.get("activeMatchId", None).await;
        assert_eq!(value, None);
    }

    #[tokio::test]
    async fn test_corrupt_value_returns_default() {
        let (backend, store) = memory_store();
        backend.insert_raw("activeMatchId", "{not json");
        let value: Option<MatchId> = store.get("activeMatchId", None).await;
        assert_eq!(value, None);

        backend.insert_raw("activeMatchId", r#"{"kind":"bigint","digits":"x"}"#);
        let value: Option<MatchId> = store.get("activeMatchId", Some(MatchId::from(1))).await;
        assert_eq!(value, Some(MatchId::from(1)));
    }

    #[tokio::test]
    async fn test_bigint_round_trip_through_store() {
        let (backend, store) = memory_store();
        let id = MatchId(U256::from(2u64).pow(U256::from(128u64)) + U256::one());

        assert!(store.set("activeMatchId", &Some(id)).await);
        let raw: Value = serde_json::from_str(&backend.raw("activeMatchId").unwrap()).unwrap();
        assert_eq!(raw["kind"], json!("bigint"));

        let loaded: Option<MatchId> = store.get("activeMatchId", None).await;
        assert_eq!(loaded, Some(id));
    }

    #[tokio::test]
    async fn test_write_failure_is_swallowed() {
        let (backend, store) = memory_store();
        backend.fail_writes(true);
        assert!(!store.set("partnerTokenId", &Some(MatchId::from(9))).await);
        let value: Option<MatchId> = store.get("partnerTokenId", None).await;
        assert_eq!(value, None);
    }
}
