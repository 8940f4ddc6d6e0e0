//! In-process subscriber registries: `LocalHub` for WebSocket sessions,
//! `PollHub` for HTTP long-poll waiters.

pub mod local;
pub mod poll;

pub use local::LocalHub;
pub use poll::{PollHub, PollStats, PollWaiter, POLL_QUEUE_CAPACITY};
