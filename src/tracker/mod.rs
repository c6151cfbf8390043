//! Per-intent transaction tracking
//!
//! Handles:
//! - One state machine per mutation kind, so concurrent intents of different
//!   kinds never share progress
//! - Rejecting a second submission of a kind that is still in flight
//! - Reporting each attempt's terminal outcome exactly once

mod state;

pub use state::{TerminalOutcome, TrackerView, TransactionTracker};

#[cfg(test)]
pub use state::TrackerState;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logically distinct mutating intents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    MintProfile,
    JoinPool,
    Deposit,
    Accept,
    ExchangeSocials,
    RequestMatchmaking,
}

impl MutationKind {
    pub const ALL: [MutationKind; 6] = [
        MutationKind::MintProfile,
        MutationKind::JoinPool,
        MutationKind::Deposit,
        MutationKind::Accept,
        MutationKind::ExchangeSocials,
        MutationKind::RequestMatchmaking,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::MintProfile => "mint_profile",
            MutationKind::JoinPool => "join_pool",
            MutationKind::Deposit => "deposit",
            MutationKind::Accept => "accept",
            MutationKind::ExchangeSocials => "exchange_socials",
            MutationKind::RequestMatchmaking => "request_matchmaking",
        }
    }

    /// Message shown once the ledger confirms this kind of mutation
    pub fn confirmation_message(&self) -> &'static str {
        match self {
            MutationKind::MintProfile => "Profile minted",
            MutationKind::JoinPool => "You are in the matching pool",
            MutationKind::Deposit => "Deposit confirmed",
            MutationKind::Accept => "Match accepted",
            MutationKind::ExchangeSocials => "Contact details shared",
            MutationKind::RequestMatchmaking => "Matchmaking round requested",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
