//! Job storage trait and types.

use thiserror::Error;

use super::types::{Job, JobState, JobUpdate};

/// Error type for job store operations.
#[derive(Debug, Error)]
pub enum JobError {
    /// Job not found.
    #[error("job not found: {0}")]
    NotFound(String),

    /// The state graph has no such edge.
    #[error("cannot move job {job_id} from {from} to {to}")]
    InvalidTransition {
        job_id: String,
        from: JobState,
        to: JobState,
    },

    /// The update would break a record invariant.
    #[error("invalid update for job {job_id}: {reason}")]
    InvariantViolation { job_id: String, reason: String },

    /// Database error.
    #[error("database error: {0}")]
    Database(String),
}

/// Request to create a new job.
#[derive(Debug, Clone)]
pub struct CreateJobRequest {
    /// Already validated reference.
    pub reference: String,
}

impl CreateJobRequest {
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
        }
    }
}

/// Filter for listing jobs.
#[derive(Debug, Clone)]
pub struct JobFilter {
    /// Filter by state.
    pub state: Option<JobState>,
    /// Maximum number of results.
    pub limit: i64,
    /// Offset for pagination.
    pub offset: i64,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl JobFilter {
    /// Create a new filter with defaults.
    pub fn new() -> Self {
        Self {
            state: None,
            limit: 100,
            offset: 0,
        }
    }

    /// Filter by state.
    pub fn with_state(mut self, state: JobState) -> Self {
        self.state = Some(state);
        self
    }

    /// Set limit.
    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    /// Set offset.
    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Durable record of job state; the single source of truth for status.
///
/// Records are addressed by id. Only the worker that owns a job writes to
/// it; readers may observe it at any time and always see a whole update.
pub trait JobStore: Send + Sync {
    /// Create a new `Pending` job with a fresh id.
    fn create(&self, request: CreateJobRequest) -> Result<Job, JobError>;

    /// Get a job by id.
    fn get(&self, id: &str) -> Result<Option<Job>, JobError>;

    /// List jobs matching the filter, newest first.
    fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, JobError>;

    /// Count jobs matching the filter (ignores limit/offset).
    fn count(&self, filter: &JobFilter) -> Result<i64, JobError>;

    /// Apply an update atomically and return the new record.
    fn update(&self, id: &str, update: JobUpdate) -> Result<Job, JobError>;
}
