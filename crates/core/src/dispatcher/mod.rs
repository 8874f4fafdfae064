//! Job submission and the bounded worker pool.
//!
//! `submit` validates the reference, reserves a queue slot, persists the
//! `Pending` record and returns. A dispatch loop pairs free worker permits
//! with queued jobs and runs each through the [`crate::orchestrator`]. At
//! most one worker ever holds a given job.

mod pool;
mod types;

pub use pool::Dispatcher;
pub use types::{DispatchError, DispatcherConfig, DispatcherStatus};
