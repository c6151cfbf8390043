//! Transaction tracker state machine

use super::MutationKind;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::ledger::SubmissionHandle;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

/// Lifecycle of a single tracked mutation
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerState {
    Idle,
    Submitting { attempt: Uuid },
    Confirming { attempt: Uuid, handle: SubmissionHandle },
    Confirmed { attempt: Uuid },
    Failed { attempt: Uuid, reason: String },
}

impl TrackerState {
    pub fn name(&self) -> &'static str {
        match self {
            TrackerState::Idle => "idle",
            TrackerState::Submitting { .. } => "submitting",
            TrackerState::Confirming { .. } => "confirming",
            TrackerState::Confirmed { .. } => "confirmed",
            TrackerState::Failed { .. } => "failed",
        }
    }

    fn in_flight_attempt(&self) -> Option<Uuid> {
        match self {
            TrackerState::Submitting { attempt } | TrackerState::Confirming { attempt, .. } => {
                Some(*attempt)
            }
            _ => None,
        }
    }
}

/// Terminal transition, handed out once per attempt
#[derive(Debug, Clone, PartialEq)]
pub enum TerminalOutcome {
    Confirmed,
    Failed(String),
}

/// Tracks one mutation kind through submission and confirmation
#[derive(Debug, Clone)]
pub struct TransactionTracker {
    kind: MutationKind,
    state: TrackerState,
    last_outcome: Option<(TerminalOutcome, DateTime<Utc>)>,
}

impl TransactionTracker {
    pub fn new(kind: MutationKind) -> Self {
        Self {
            kind,
            state: TrackerState::Idle,
            last_outcome: None,
        }
    }

    pub fn kind(&self) -> MutationKind {
        self.kind
    }

    pub fn state(&self) -> &TrackerState {
        &self.state
    }

    pub fn is_in_flight(&self) -> bool {
        self.state.in_flight_attempt().is_some()
    }

    /// Start a new attempt. Rejected while a previous attempt is in flight.
    pub fn submit(&mut self) -> CoordinatorResult<Uuid> {
        if self.is_in_flight() {
            return Err(CoordinatorError::AlreadyInFlight { kind: self.kind });
        }

        let attempt = Uuid::new_v4();
        self.state = TrackerState::Submitting { attempt };
        debug!(kind = %self.kind, %attempt, "Tracker submitting");
        Ok(attempt)
    }

    /// The ledger accepted the attempt and handed back a pending handle
    pub fn mark_confirming(&mut self, attempt: Uuid, handle: SubmissionHandle) -> bool {
        match self.state {
            TrackerState::Submitting { attempt: current } if current == attempt => {
                self.state = TrackerState::Confirming { attempt, handle };
                debug!(kind = %self.kind, %attempt, tx = %handle.tx_hash_hex(), "Tracker confirming");
                true
            }
            _ => {
                warn!(kind = %self.kind, %attempt, state = self.state.name(), "Ignoring stale pending handle");
                false
            }
        }
    }

    /// Record the terminal outcome of `attempt`.
    ///
    /// Returns `Some` only for the first terminal report of the in-flight attempt;
    /// redelivered or stale reports yield `None`.
    pub fn complete(
        &mut self,
        attempt: Uuid,
        outcome: Result<(), String>,
    ) -> Option<TerminalOutcome> {
        if self.state.in_flight_attempt() != Some(attempt) {
            debug!(kind = %self.kind, %attempt, state = self.state.name(), "Suppressing duplicate terminal report");
            return None;
        }

        let terminal = match outcome {
            Ok(()) => {
                self.state = TrackerState::Confirmed { attempt };
                TerminalOutcome::Confirmed
            }
            Err(reason) => {
                self.state = TrackerState::Failed {
                    attempt,
                    reason: reason.clone(),
                };
                TerminalOutcome::Failed(reason)
            }
        };

        self.last_outcome = Some((terminal.clone(), Utc::now()));
        Some(terminal)
    }

    /// Discard an observed terminal state so the kind can be submitted again
    pub fn reset(&mut self) {
        if !self.is_in_flight() {
            self.state = TrackerState::Idle;
        }
    }

    pub fn view(&self) -> TrackerView {
        let (last_outcome, last_error, finished_at) = match &self.last_outcome {
            Some((TerminalOutcome::Confirmed, at)) => (Some("confirmed"), None, Some(*at)),
            Some((TerminalOutcome::Failed(reason), at)) => {
                (Some("failed"), Some(reason.clone()), Some(*at))
            }
            None => (None, None, None),
        };

        let tx_hash = match &self.state {
            TrackerState::Confirming { handle, .. } => Some(handle.tx_hash_hex()),
            _ => None,
        };

        TrackerView {
            state: self.state.name(),
            tx_hash,
            last_outcome,
            last_error,
            finished_at,
        }
    }
}

/// Serializable snapshot of a tracker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackerView {
    pub state: &'static str,
    pub tx_hash: Option<String>,
    pub last_outcome: Option<&'static str>,
    pub last_error: Option<String>,
    pub finished_at: Option<DateTime<Utc>>,
}
