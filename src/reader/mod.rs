//! Remote state reader
//!
//! Handles:
//! - Cached, on-demand reads of ledger entities keyed by [`CacheKey`]
//! - Coalescing concurrent reads of the same key into one request
//! - Explicit invalidation (no timer-based expiry)
//! - Keeping the last known value when a refresh fails

mod decode;
mod keys;

pub use decode::{decode, EntityValue, EscrowState, Profile};
pub use keys::{CacheKey, EntityKind};

use crate::error::CoordinatorError;
use crate::ledger::LedgerClient;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::{join_all, BoxFuture, Shared};
use futures::FutureExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Failure of a single read, cloneable so coalesced callers can share it
#[derive(Debug, Clone, Error)]
pub enum ReadError {
    #[error("{0}")]
    Transient(String),

    #[error("{0}")]
    Decode(String),
}

impl ReadError {
    pub fn into_coordinator(self, entity: EntityKind) -> CoordinatorError {
        match self {
            ReadError::Transient(message) => CoordinatorError::TransientRead { entity, message },
            ReadError::Decode(message) => CoordinatorError::Decode { entity, message },
        }
    }
}

type SharedRead = Shared<BoxFuture<'static, Result<EntityValue, ReadError>>>;

struct InFlight {
    generation: u64,
    future: SharedRead,
}

/// Cached state of one key
#[derive(Debug, Clone, Default)]
pub struct CacheEntry {
    pub value: Option<EntityValue>,
    pub is_loading: bool,
    pub stale: bool,
    pub fetched_at: Option<DateTime<Utc>>,
    /// Bumped on every invalidation; results from older generations are discarded
    pub generation: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct ReadOptions {
    pub enabled: bool,
}

impl ReadOptions {
    pub fn enabled() -> Self {
        Self { enabled: true }
    }

    /// Enabled only once the inputs of the key are known
    pub fn when(enabled: bool) -> Self {
        Self { enabled }
    }
}

/// Point-in-time view of a cache entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadSnapshot {
    pub value: Option<EntityValue>,
    pub is_loading: bool,
    pub is_stale: bool,
}

impl ReadSnapshot {
    pub fn disabled() -> Self {
        Self::default()
    }
}

/// Cached reader over a [`LedgerClient`]
pub struct RemoteStateReader {
    ledger: Arc<dyn LedgerClient>,
    entries: DashMap<CacheKey, CacheEntry>,
    in_flight: DashMap<CacheKey, InFlight>,
    epoch: AtomicU64,
}

impl RemoteStateReader {
    pub fn new(ledger: Arc<dyn LedgerClient>) -> Self {
        Self {
            ledger,
            entries: DashMap::new(),
            in_flight: DashMap::new(),
            epoch: AtomicU64::new(0),
        }
    }

    /// Read `key`, fetching from the ledger unless a fresh value is cached.
    ///
    /// A disabled read never touches the ledger.
    pub async fn read(&self, key: CacheKey, options: ReadOptions) -> ReadSnapshot {
        if !options.enabled {
            return ReadSnapshot::disabled();
        }

        if let Some(snapshot) = self.fresh(&key) {
            return snapshot;
        }

        let (generation, future) = self.join_or_start(&key);
        let outcome = future.await;
        self.settle(&key, generation, outcome);
        self.peek(&key)
    }

    /// Current cached state of `key` without fetching
    pub fn peek(&self, key: &CacheKey) -> ReadSnapshot {
        match self.entries.get(key) {
            Some(entry) => ReadSnapshot {
                value: entry.value.clone(),
                is_loading: entry.is_loading,
                is_stale: entry.stale,
            },
            None => ReadSnapshot::default(),
        }
    }

    /// Cached value of `key`, if any
    pub fn value(&self, key: &CacheKey) -> Option<EntityValue> {
        self.entries.get(key).and_then(|entry| entry.value.clone())
    }

    /// Mark entries of `kind` stale, optionally only the one for `key`
    pub fn invalidate(&self, kind: EntityKind, key: Option<&CacheKey>) -> usize {
        let mut invalidated = Vec::new();

        for mut entry in self.entries.iter_mut() {
            if entry.key().kind() != kind || key.map_or(false, |k| k != entry.key()) {
                continue;
            }
            let cached = entry.value_mut();
            cached.stale = true;
            cached.is_loading = false;
            cached.generation += 1;
            invalidated.push(entry.key().clone());
        }

        for key in &invalidated {
            self.in_flight.remove(key);
        }

        if !invalidated.is_empty() {
            debug!(entity = %kind, count = invalidated.len(), "Invalidated cache entries");
        }
        crate::metrics::record_invalidation(kind.as_str());
        invalidated.len()
    }

    /// Mark every entry stale and bump the invalidation epoch
    pub fn invalidate_all(&self) -> u64 {
        for kind in EntityKind::ALL {
            self.invalidate(kind, None);
        }
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(epoch, "Invalidated all cache entries");
        epoch
    }

    /// Number of `invalidate_all` calls so far
    pub fn invalidation_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Re-fetch every stale entry concurrently. Returns how many were refreshed.
    pub async fn refresh_stale(&self) -> usize {
        let stale: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|entry| entry.stale)
            .map(|entry| entry.key().clone())
            .collect();

        let count = stale.len();
        join_all(
            stale
                .into_iter()
                .map(|key| self.read(key, ReadOptions::enabled())),
        )
        .await;
        count
    }

    /// Drop every entry, used when the session identity changes
    pub fn clear(&self) {
        self.entries.clear();
        self.in_flight.clear();
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    fn fresh(&self, key: &CacheKey) -> Option<ReadSnapshot> {
        let entry = self.entries.get(key)?;
        if entry.stale || entry.value.is_none() {
            return None;
        }
        crate::metrics::record_read(key.kind().as_str(), "cached");
        Some(ReadSnapshot {
            value: entry.value.clone(),
            is_loading: false,
            is_stale: false,
        })
    }

    fn join_or_start(&self, key: &CacheKey) -> (u64, SharedRead) {
        let generation = {
            let mut entry = self.entries.entry(key.clone()).or_default();
            entry.is_loading = true;
            entry.generation
        };

        if let Some(in_flight) = self.in_flight.get(key) {
            if in_flight.generation == generation {
                debug!(%key, "Joining in-flight read");
                return (generation, in_flight.future.clone());
            }
        }

        let ledger = Arc::clone(&self.ledger);
        let call = key.call();
        let decode_key = key.clone();
        let future = async move {
            let tokens = ledger
                .call(&call)
                .await
                .map_err(|e| ReadError::Transient(e.to_string()))?;
            decode(&decode_key, tokens).map_err(ReadError::Decode)
        }
        .boxed()
        .shared();

        self.in_flight.insert(
            key.clone(),
            InFlight {
                generation,
                future: future.clone(),
            },
        );
        (generation, future)
    }

    fn settle(&self, key: &CacheKey, generation: u64, outcome: Result<EntityValue, ReadError>) {
        let first = self
            .in_flight
            .remove_if(key, |_, in_flight| in_flight.generation == generation)
            .is_some();

        let Some(mut entry) = self.entries.get_mut(key) else {
            return;
        };
        if entry.generation != generation {
            debug!(%key, "Discarding read result from before invalidation");
            return;
        }

        entry.is_loading = false;
        match outcome {
            Ok(value) => {
                entry.value = Some(value);
                entry.stale = false;
                entry.fetched_at = Some(Utc::now());
                if first {
                    crate::metrics::record_read(key.kind().as_str(), "ok");
                }
            }
            Err(e) => {
                entry.stale = true;
                if first {
                    let error = e.into_coordinator(key.kind());
                    warn!(%key, error = %error, "Remote read failed, keeping last value");
                    crate::metrics::record_read(key.kind().as_str(), "error");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{MatchId, TokenId};
    use crate::ledger::MockLedgerClient;
    use crate::testing::FakeLedger;
    use ethers::abi::Token;
    use ethers::types::U256;
    use std::time::Duration;

    fn escrow_tokens(flags: [bool; 4]) -> Vec<Token> {
        flags.iter().map(|f| Token::Bool(*f)).collect()
    }

    #[tokio::test]
    async fn test_disabled_read_never_calls_ledger() {
        let mut ledger = MockLedgerClient::new();
        ledger.expect_call().never();
        let reader = RemoteStateReader::new(Arc::new(ledger));

        let snapshot = reader
            .read(CacheKey::Profile(TokenId::from(7)), ReadOptions::when(false))
            .await;
        assert_eq!(snapshot, ReadSnapshot::disabled());
        assert!(!snapshot.is_loading);
    }

    #[tokio::test]
    async fn test_fresh_value_is_served_from_cache() {
        let mut ledger = MockLedgerClient::new();
        ledger
            .expect_call()
            .times(1)
            .returning(|_| Ok(vec![Token::Uint(U256::from(4u64))]));
        let reader = RemoteStateReader::new(Arc::new(ledger));

        let first = reader.read(CacheKey::PoolSize, ReadOptions::enabled()).await;
        let second = reader.read(CacheKey::PoolSize, ReadOptions::enabled()).await;
        assert_eq!(first.value, Some(EntityValue::PoolSize(U256::from(4u64))));
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_concurrent_reads_coalesce() {
        let ledger = Arc::new(FakeLedger::new());
        let key = CacheKey::Escrow(MatchId::from(3));
        ledger.set_read(&key, escrow_tokens([true, false, false, false]));
        ledger.set_read_delay(Duration::from_millis(20));
        let reader = RemoteStateReader::new(ledger.clone());

        let (a, b) = tokio::join!(
            reader.read(key.clone(), ReadOptions::enabled()),
            reader.read(key.clone(), ReadOptions::enabled())
        );
        assert_eq!(a.value, b.value);
        assert_eq!(ledger.read_count("escrows"), 1);
    }

    #[tokio::test]
    async fn test_invalidate_marks_stale_and_refetches() {
        let ledger = Arc::new(FakeLedger::new());
        let key = CacheKey::PoolMembership(TokenId::from(7));
        ledger.set_read(&key, vec![Token::Bool(false)]);
        let reader = RemoteStateReader::new(ledger.clone());

        reader.read(key.clone(), ReadOptions::enabled()).await;
        ledger.set_read(&key, vec![Token::Bool(true)]);

        assert_eq!(reader.invalidate(EntityKind::PoolMembership, Some(&key)), 1);
        assert!(reader.peek(&key).is_stale);
        assert_eq!(reader.peek(&key).value, Some(EntityValue::InPool(false)));

        assert_eq!(reader.refresh_stale().await, 1);
        let snapshot = reader.peek(&key);
        assert_eq!(snapshot.value, Some(EntityValue::InPool(true)));
        assert!(!snapshot.is_stale);
        assert_eq!(ledger.read_count("isInPool"), 2);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_last_value() {
        let ledger = Arc::new(FakeLedger::new());
        let key = CacheKey::Escrow(MatchId::from(3));
        ledger.set_read(&key, escrow_tokens([true, true, false, false]));
        let reader = RemoteStateReader::new(ledger.clone());

        reader.read(key.clone(), ReadOptions::enabled()).await;
        ledger.fail_read(&key, "connection reset");
        reader.invalidate_all();

        let snapshot = reader.read(key.clone(), ReadOptions::enabled()).await;
        assert!(snapshot.is_stale);
        assert!(!snapshot.is_loading);
        assert!(snapshot.value.unwrap().as_escrow().unwrap().both_deposited());
    }

    #[tokio::test]
    async fn test_invalidation_during_flight_discards_old_result() {
        let ledger = Arc::new(FakeLedger::new());
        let key = CacheKey::PoolSize;
        ledger.set_read(&key, vec![Token::Uint(U256::from(1u64))]);
        ledger.set_read_delay(Duration::from_millis(30));
        let reader = Arc::new(RemoteStateReader::new(ledger.clone()));

        let background = {
            let reader = reader.clone();
            let key = key.clone();
            tokio::spawn(async move { reader.read(key, ReadOptions::enabled()).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        reader.invalidate_all();
        ledger.set_read(&key, vec![Token::Uint(U256::from(2u64))]);

        let fresh = reader.read(key.clone(), ReadOptions::enabled()).await;
        background.await.unwrap();

        assert_eq!(fresh.value, Some(EntityValue::PoolSize(U256::from(2u64))));
        assert_eq!(reader.value(&key), Some(EntityValue::PoolSize(U256::from(2u64))));
        assert_eq!(ledger.read_count("getMatchingPoolSize"), 2);
    }

    #[tokio::test]
    async fn test_invalidate_all_bumps_epoch() {
        let reader = RemoteStateReader::new(Arc::new(FakeLedger::new()));
        assert_eq!(reader.invalidation_epoch(), 0);
        assert_eq!(reader.invalidate_all(), 1);
        assert_eq!(reader.invalidation_epoch(), 1);
    }
}
