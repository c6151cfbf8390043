//! Match lifecycle coordinator
//!
//! The coordinator:
//! 1. Owns the session context and the durable active-match pointer
//! 2. Reconciles match-creation events against the local identity
//! 3. Hands intents to per-kind transaction trackers
//! 4. Invalidates reader caches when a mutation confirms
//! 5. Derives the lifecycle view from cache snapshots on demand

pub mod engine;
pub mod intents;
pub mod reconcile;
pub mod session;
pub mod view;

pub use engine::{Coordinator, CoordinatorHandle};
pub use intents::{Intent, IntentAck};
pub use view::LifecycleView;
