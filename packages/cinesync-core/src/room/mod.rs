//! Room coordination: the authoritative per-room state machine, the event
//! protocol, and the defenses against connection churn.
//!
//! Layering:
//!
//! - [`protocol`]: wire-level client/server event types
//! - [`rate_limit`]: sliding-window join limiter
//! - `actor` (private): one serialized event loop per room
//! - [`coordinator`]: registry, dispatch, and actor lifecycle

mod actor;
pub mod coordinator;
pub mod protocol;
pub mod rate_limit;

pub use actor::CHAT_REPLAY_LIMIT;
pub use coordinator::Coordinator;
