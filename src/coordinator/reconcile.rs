//! Reconciliation of match-creation events against the local identity
//!
//! Pure functions: the pointer update is computed from event payloads alone.

use super::session::ActiveMatch;
use crate::events::MatchCreated;
use crate::ids::TokenId;

/// Outcome of applying one event to the current pointer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The event does not name the local identity
    NotMine,
    /// The event matches the current pointer exactly
    Unchanged,
    /// Redelivery of a match older than the current one
    Stale,
    Set(ActiveMatch),
}

/// Apply a single event
pub fn reconcile(identity: TokenId, current: Option<ActiveMatch>, event: &MatchCreated) -> Decision {
    let partner = if event.token_a == identity {
        event.token_b
    } else if event.token_b == identity {
        event.token_a
    } else {
        return Decision::NotMine;
    };

    let candidate = ActiveMatch {
        match_id: event.match_id,
        partner,
    };

    match current {
        Some(current) if current == candidate => Decision::Unchanged,
        // Match ids come from a monotonic counter
        Some(current) if event.match_id < current.match_id => Decision::Stale,
        _ => Decision::Set(candidate),
    }
}

/// Apply a batch in delivery order. Returns the new pointer if it changed.
pub fn reconcile_batch(
    identity: TokenId,
    current: Option<ActiveMatch>,
    events: &[MatchCreated],
) -> Option<ActiveMatch> {
    let mut pointer = current;
    for event in events {
        if let Decision::Set(next) = reconcile(identity, pointer, event) {
            pointer = Some(next);
        }
    }

    if pointer != current {
        pointer
    } else {
        None
    }
}
