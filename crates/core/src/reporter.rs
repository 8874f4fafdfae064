//! Best-effort progress reporting onto the job record.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::job::{Job, JobState, JobStore, JobUpdate};

/// Writes stage and progress updates for one job.
///
/// Each report is a single store update, so readers see either the old or
/// the new combination of state, step and progress. A failed write is
/// logged and swallowed; it never aborts the pipeline.
#[derive(Clone)]
pub struct StageReporter {
    store: Arc<dyn JobStore>,
    job_id: String,
}

impl StageReporter {
    pub fn new(store: Arc<dyn JobStore>, job_id: impl Into<String>) -> Self {
        Self {
            store,
            job_id: job_id.into(),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Report the active step, optionally moving to a new state.
    pub fn report(&self, step: &str, progress_percent: u8, state: Option<JobState>) -> Option<Job> {
        let update = match state {
            Some(state) => JobUpdate::transition(state, step, progress_percent),
            None => JobUpdate::progress(step, progress_percent),
        };
        self.send(update)
    }

    /// Report an arbitrary update. Returns the stored record on success.
    pub fn send(&self, update: JobUpdate) -> Option<Job> {
        let is_transition = update.state.is_some();

        match self.store.update(&self.job_id, update) {
            Ok(job) => {
                if is_transition {
                    info!(
                        job_id = %self.job_id,
                        state = %job.state,
                        step = %job.current_step,
                        progress = job.progress_percent,
                        "Job stage changed"
                    );
                } else {
                    debug!(
                        job_id = %self.job_id,
                        step = %job.current_step,
                        progress = job.progress_percent,
                        "Job progress"
                    );
                }
                Some(job)
            }
            Err(e) => {
                warn!(job_id = %self.job_id, error = %e, "Failed to write job progress");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{CreateJobRequest, InMemoryJobStore, JobError, JobFilter};

    /// Store whose updates always fail.
    struct BrokenStore;

    impl JobStore for BrokenStore {
        fn create(&self, _: CreateJobRequest) -> Result<Job, JobError> {
            Err(JobError::Database("down".into()))
        }
        fn get(&self, _: &str) -> Result<Option<Job>, JobError> {
            Err(JobError::Database("down".into()))
        }
        fn list(&self, _: &JobFilter) -> Result<Vec<Job>, JobError> {
            Err(JobError::Database("down".into()))
        }
        fn count(&self, _: &JobFilter) -> Result<i64, JobError> {
            Err(JobError::Database("down".into()))
        }
        fn update(&self, _: &str, _: JobUpdate) -> Result<Job, JobError> {
            Err(JobError::Database("down".into()))
        }
    }

    #[test]
    fn test_report_writes_step_progress_and_state() {
        let store = Arc::new(InMemoryJobStore::new());
        let job = store.create(CreateJobRequest::new("video-A")).unwrap();
        let reporter = StageReporter::new(store.clone(), &job.id);

        let updated = reporter
            .report("acquiring (attempt 1/3)", 5, Some(JobState::Acquiring))
            .unwrap();
        assert_eq!(updated.state, JobState::Acquiring);
        assert_eq!(updated.current_step, "acquiring (attempt 1/3)");
        assert_eq!(updated.progress_percent, 5);

        reporter.report("streaming", 40, None).unwrap();
        let stored = store.get(&job.id).unwrap().unwrap();
        assert_eq!(stored.state, JobState::Acquiring);
        assert_eq!(stored.progress_percent, 40);
    }

    #[test]
    fn test_failed_write_is_swallowed() {
        let reporter = StageReporter::new(Arc::new(BrokenStore), "job-1");
        assert!(reporter.report("acquiring", 5, None).is_none());
    }

    #[test]
    fn test_invalid_transition_is_swallowed() {
        let store = Arc::new(InMemoryJobStore::new());
        let job = store.create(CreateJobRequest::new("video-A")).unwrap();
        let reporter = StageReporter::new(store.clone(), &job.id);

        assert!(reporter.report("x", 90, Some(JobState::Uploading)).is_none());
        assert_eq!(store.get(&job.id).unwrap().unwrap().state, JobState::Pending);
    }
}
