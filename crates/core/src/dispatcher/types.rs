//! Types for the dispatcher.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::JobsConfig;
use crate::job::JobError;

/// Errors returned by [`super::Dispatcher::submit`].
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Reference missing or malformed; nothing was created.
    #[error("invalid reference: {0}")]
    InvalidReference(String),

    /// Queue is full; nothing was created.
    #[error("dispatcher is at capacity ({capacity} jobs queued)")]
    Busy { capacity: usize },

    /// Dispatcher has been stopped.
    #[error("dispatcher is shutting down")]
    ShuttingDown,

    /// Job store error.
    #[error("job store error: {0}")]
    Store(#[from] JobError),
}

/// Pool sizing and shutdown behaviour.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Jobs running at once.
    pub worker_pool_size: usize,
    /// Jobs waiting for a worker.
    pub queue_capacity: usize,
    /// How long `stop` waits for running jobs.
    pub shutdown_grace: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::from(&JobsConfig::default())
    }
}

impl From<&JobsConfig> for DispatcherConfig {
    fn from(jobs: &JobsConfig) -> Self {
        Self {
            worker_pool_size: jobs.worker_pool_size.max(1),
            queue_capacity: jobs.queue_capacity.max(1),
            shutdown_grace: jobs.shutdown_grace(),
        }
    }
}

/// Current status of the dispatcher.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatcherStatus {
    /// Whether the dispatch loop is running.
    pub running: bool,
    pub worker_pool_size: usize,
    pub queue_capacity: usize,
    /// Jobs currently held by a worker.
    pub active_jobs: usize,
    /// Jobs accepted and waiting for a worker.
    pub queued_jobs: usize,
    /// Jobs whose worker finished since startup.
    pub total_processed: u64,
    /// IDs of jobs currently held by a worker.
    pub active_job_ids: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_jobs() {
        let jobs = JobsConfig {
            worker_pool_size: 0,
            queue_capacity: 7,
            shutdown_grace_ms: 250,
            ..Default::default()
        };
        let config = DispatcherConfig::from(&jobs);
        assert_eq!(config.worker_pool_size, 1);
        assert_eq!(config.queue_capacity, 7);
        assert_eq!(config.shutdown_grace, Duration::from_millis(250));
    }

    #[test]
    fn test_error_display() {
        let err = DispatchError::Busy { capacity: 32 };
        assert_eq!(err.to_string(), "dispatcher is at capacity (32 jobs queued)");

        let err = DispatchError::Store(JobError::NotFound("j".into()));
        assert_eq!(err.to_string(), "job store error: job not found: j");
    }
}
