//! Session context and the persisted active-match pointer

use super::view::LifecycleStage;
use crate::ids::{MatchId, ProfileStatus, TokenId};
use crate::store::DurableStore;
use crate::tracker::{MutationKind, TransactionTracker};

use ethers::types::Address;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};
use uuid::Uuid;

pub const ACTIVE_MATCH_KEY: &str = "activeMatchId";
pub const PARTNER_TOKEN_KEY: &str = "partnerTokenId";

/// The match the local participant currently belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveMatch {
    pub match_id: MatchId,
    pub partner: TokenId,
}

/// State owned by one logged-in session. Created on login, dropped on logout.
#[derive(Debug)]
pub struct SessionContext {
    pub id: Uuid,
    pub address: Address,
    /// `None` until the owned-profile read first succeeds
    pub identity: Option<ProfileStatus>,
    pub pointer: Option<ActiveMatch>,
    pub trackers: HashMap<MutationKind, TransactionTracker>,
    /// Whether the listener was rewound after the identity resolved to a profile
    pub rewound: bool,
    pub last_stage: Option<LifecycleStage>,
}

impl SessionContext {
    pub fn new(address: Address, pointer: Option<ActiveMatch>) -> Self {
        let trackers = MutationKind::ALL
            .iter()
            .map(|kind| (*kind, TransactionTracker::new(*kind)))
            .collect();

        Self {
            id: Uuid::new_v4(),
            address,
            identity: None,
            pointer,
            trackers,
            rewound: false,
            last_stage: None,
        }
    }

    pub fn token(&self) -> Option<TokenId> {
        self.identity.and_then(|status| status.token())
    }

    pub fn tracker_mut(&mut self, kind: MutationKind) -> &mut TransactionTracker {
        self.trackers
            .entry(kind)
            .or_insert_with(|| TransactionTracker::new(kind))
    }

    #[cfg(test)]
    pub fn is_in_flight(&self, kind: MutationKind) -> bool {
        self.trackers
            .get(&kind)
            .map_or(false, |tracker| tracker.is_in_flight())
    }
}

/// Load the persisted pointer. A half-written pointer is discarded.
pub async fn load_pointer(store: &DurableStore) -> Option<ActiveMatch> {
    let match_id: Option<MatchId> = store.get(ACTIVE_MATCH_KEY, None).await;
    let partner: Option<TokenId> = store.get(PARTNER_TOKEN_KEY, None).await;

    match (match_id, partner) {
        (Some(match_id), Some(partner)) => {
            debug!(%match_id, %partner, "Restored active match");
            Some(ActiveMatch { match_id, partner })
        }
        (None, None) => None,
        (match_id, partner) => {
            warn!(?match_id, ?partner, "Discarding partial match pointer");
            None
        }
    }
}

/// Persist both pointer keys in one write. Returns `false` if the write failed.
pub async fn persist_pointer(store: &DurableStore, pointer: Option<ActiveMatch>) -> bool {
    let encode = |value: Result<Value, serde_json::Error>| value.unwrap_or(Value::Null);

    let (match_id, partner) = match pointer {
        Some(active) => (
            encode(serde_json::to_value(active.match_id)),
            encode(serde_json::to_value(active.partner)),
        ),
        None => (Value::Null, Value::Null),
    };

    // Both or neither
    if match_id.is_null() != partner.is_null() {
        warn!("Refusing to persist a partial match pointer");
        return false;
    }

    store
        .set_many(&[(ACTIVE_MATCH_KEY, match_id), (PARTNER_TOKEN_KEY, partner)])
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBackend;
    use ethers::types::U256;
    use serde_json::json;
    use std::sync::Arc;

    fn store() -> (Arc<MemoryBackend>, DurableStore) {
        let backend = Arc::new(MemoryBackend::new());
        (backend.clone(), DurableStore::new(backend))
    }

    #[tokio::test]
    async fn test_pointer_round_trip_beyond_u64() {
        let (_, store) = store();
        let huge = U256::from(2u64).pow(U256::from(200u64)) + U256::from(7u64);
        let pointer = ActiveMatch {
            match_id: MatchId(huge),
            partner: TokenId::from(9),
        };

        assert!(persist_pointer(&store, Some(pointer)).await);
        assert_eq!(load_pointer(&store).await, Some(pointer));
    }

    #[tokio::test]
    async fn test_pointer_keys_use_tagged_bigints() {
        let (backend, store) = store();
        let pointer = ActiveMatch {
            match_id: MatchId::from(3),
            partner: TokenId::from(9),
        };
        persist_pointer(&store, Some(pointer)).await;

        let raw = |key: &str| -> Value { serde_json::from_str(&backend.raw(key).unwrap()).unwrap() };
        assert_eq!(raw(ACTIVE_MATCH_KEY), json!({"kind": "bigint", "digits": "3"}));
        assert_eq!(raw(PARTNER_TOKEN_KEY), json!({"kind": "bigint", "digits": "9"}));
    }

    #[tokio::test]
    async fn test_cleared_pointer_is_null_in_both_keys() {
        let (backend, store) = store();
        persist_pointer(&store, None).await;

        assert_eq!(backend.raw(ACTIVE_MATCH_KEY).unwrap(), "null");
        assert_eq!(backend.raw(PARTNER_TOKEN_KEY).unwrap(), "null");
        assert_eq!(load_pointer(&store).await, None);
    }

    #[tokio::test]
    async fn test_partial_pointer_is_discarded() {
        let (backend, store) = store();
        backend.insert_raw(ACTIVE_MATCH_KEY, r#"{"kind":"bigint","digits":"3"}"#);
        backend.insert_raw(PARTNER_TOKEN_KEY, "null");

        assert_eq!(load_pointer(&store).await, None);
    }

    #[test]
    fn test_new_session_has_idle_tracker_per_kind() {
        let session = SessionContext::new(Address::zero(), None);
        assert_eq!(session.trackers.len(), MutationKind::ALL.len());
        assert!(!session.is_in_flight(MutationKind::Deposit));
        assert_eq!(session.token(), None);
    }
}
