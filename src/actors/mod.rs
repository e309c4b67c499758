//! Actor-based job scheduling
//!
//! Every periodic job (node polling, service polling, retention) runs as an
//! independent async task. Jobs never share mutable state with each other;
//! the store is the only shared resource.
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: each job actor has an mpsc command channel
//! 2. **Request/Response**: `RunNow` answers with a [`messages::JobReport`]
//!    over a oneshot channel

pub mod job;
pub mod messages;
