//! Error types for the HeartSync coordinator

use crate::reader::EntityKind;
use crate::tracker::MutationKind;

use thiserror::Error;

/// Main error type for the coordinator
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Transient read failure for {entity}: {message}")]
    TransientRead { entity: EntityKind, message: String },

    #[error("Failed to decode {entity}: {message}")]
    Decode { entity: EntityKind, message: String },

    #[error("{message}")]
    MutationRejected { kind: MutationKind, message: String },

    #[error("A {kind} transaction is already in flight")]
    AlreadyInFlight { kind: MutationKind },

    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("No active session")]
    NoSession,

    #[error("No active match")]
    NoActiveMatch,

    #[error("{0}")]
    Precondition(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Coordinator channel closed")]
    ChannelClosed,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoordinatorError {
    /// Check if error is retryable by simply re-issuing the call
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoordinatorError::TransientRead { .. } | CoordinatorError::Ledger(_)
        )
    }

    /// Check if the error message is meant to be shown to the user as-is
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            CoordinatorError::MutationRejected { .. }
                | CoordinatorError::AlreadyInFlight { .. }
                | CoordinatorError::NoSession
                | CoordinatorError::NoActiveMatch
                | CoordinatorError::Precondition(_)
        )
    }
}

/// Result type for coordinator operations
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;
