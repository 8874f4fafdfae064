//! Per-job pipeline: acquire, verify, upload, with retries and a deadline.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::{FutureExt, StreamExt};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

use crate::agent::AcquisitionAgent;
use crate::job::{Job, JobError, JobState, JobStore, JobUpdate};
use crate::metrics;
use crate::reporter::StageReporter;
use crate::storage::{artifact_key, BlobStore, StoredObject};
use crate::validator::ArtifactValidator;

use super::config::OrchestratorConfig;
use super::types::{FailureKind, PipelineFailure, StageOutcome};

/// Progress marks for each stage.
const PROGRESS_ACQUIRING: u8 = 5;
const PROGRESS_STREAM_START: u8 = 10;
const PROGRESS_STREAM_SPAN: u8 = 60;
const PROGRESS_VERIFYING: u8 = 75;
const PROGRESS_UPLOADING: u8 = 85;

/// Minimum progress step between streaming reports.
const STREAM_REPORT_STEP: u8 = 5;

/// Stand-in deadline when a configured timeout overflows the clock.
const FAR_FUTURE: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Attempts at writing a terminal record before giving up.
const TERMINAL_WRITE_ATTEMPTS: u32 = 3;

/// Working states in pipeline order, with the step and progress each starts at.
static STAGES: [(JobState, &str, u8); 3] = [
    (JobState::Acquiring, "acquiring", PROGRESS_ACQUIRING),
    (JobState::Verifying, "verifying", PROGRESS_VERIFYING),
    (JobState::Uploading, "uploading", PROGRESS_UPLOADING),
];

/// Drives jobs through the acquisition pipeline.
///
/// Collaborators are injected so the same pipeline runs against real
/// adapters in the server and scripted ones in tests.
pub struct Orchestrator {
    config: OrchestratorConfig,
    store: Arc<dyn JobStore>,
    agent: Arc<dyn AcquisitionAgent>,
    validator: Arc<dyn ArtifactValidator>,
    blob_store: Arc<dyn BlobStore>,
}

impl Orchestrator {
    /// Create a new orchestrator.
    pub fn new(
        config: OrchestratorConfig,
        store: Arc<dyn JobStore>,
        agent: Arc<dyn AcquisitionAgent>,
        validator: Arc<dyn ArtifactValidator>,
        blob_store: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            config,
            store,
            agent,
            validator,
            blob_store,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Run a `Pending` job to a terminal state.
    ///
    /// Never fails: every problem ends up in the job record, including a
    /// panicking collaborator. Scratch files are removed on every exit path,
    /// including the deadline firing mid-transfer.
    pub async fn run(&self, job: Job) {
        if job.state != JobState::Pending {
            warn!(job_id = %job.id, state = %job.state, "Refusing to run job that is not pending");
            return;
        }

        let started = Instant::now();
        let reporter = StageReporter::new(Arc::clone(&self.store), &job.id);
        let remaining = self.time_remaining(&job);

        info!(
            job_id = %job.id,
            agent = self.agent.name(),
            deadline_secs = remaining.as_secs(),
            "Starting job"
        );

        let outcome = if remaining.is_zero() {
            Err(self.deadline_failure())
        } else {
            let pipeline = AssertUnwindSafe(self.drive(&job, &reporter)).catch_unwind();
            match tokio::time::timeout(remaining, pipeline).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(panic)) => {
                    error!(job_id = %job.id, "Pipeline panicked");
                    Err(PipelineFailure::internal(format!(
                        "pipeline panicked: {}",
                        panic_message(panic.as_ref())
                    )))
                }
                Err(_) => Err(self.deadline_failure()),
            }
        };

        self.finish(&job, outcome, started).await;
    }

    /// Time left before the job's deadline.
    fn time_remaining(&self, job: &Job) -> Duration {
        let deadline = chrono::Duration::from_std(self.config.per_job_timeout)
            .ok()
            .and_then(|timeout| job.created_at.checked_add_signed(timeout));
        match deadline {
            Some(deadline) => (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO),
            None => self.config.per_job_timeout,
        }
    }

    fn deadline_failure(&self) -> PipelineFailure {
        PipelineFailure::new(
            FailureKind::DeadlineExceeded,
            format!(
                "job did not finish within {}s of submission",
                self.config.per_job_timeout.as_secs_f64()
            ),
        )
    }

    /// Attempts loop followed by the upload.
    async fn drive(
        &self,
        job: &Job,
        reporter: &StageReporter,
    ) -> Result<StoredObject, PipelineFailure> {
        let scratch = self.scratch_dir(&job.id).await?;
        let max_attempts = self.config.max_attempts;
        let mut attempt = job.attempt;

        let artifact = loop {
            attempt += 1;
            let outcome = self.attempt(job, reporter, attempt, scratch.path()).await;

            match outcome {
                StageOutcome::Done(path) => {
                    metrics::ACQUISITION_ATTEMPTS
                        .with_label_values(&["verified"])
                        .inc();
                    break path;
                }
                StageOutcome::Fatal(failure) => {
                    metrics::ACQUISITION_ATTEMPTS
                        .with_label_values(&[failure.kind.as_str()])
                        .inc();
                    return Err(failure);
                }
                StageOutcome::Retry(failure) => {
                    metrics::ACQUISITION_ATTEMPTS
                        .with_label_values(&[failure.kind.as_str()])
                        .inc();

                    if attempt >= max_attempts {
                        return Err(failure.exhausted(attempt));
                    }

                    let delay = self.config.backoff.delay_after(attempt);
                    warn!(
                        job_id = %job.id,
                        attempt,
                        max_attempts,
                        kind = failure.kind.as_str(),
                        delay_ms = delay.as_millis() as u64,
                        "Attempt failed, backing off"
                    );
                    metrics::RETRIES
                        .with_label_values(&[failure.kind.as_str()])
                        .inc();
                    reporter.report(&retry_step(delay, failure.kind), 0, None);
                    tokio::time::sleep(delay).await;
                }
            }
        };

        self.advance(reporter, JobState::Uploading, Some(attempt));
        self.upload(job, &artifact).await
    }

    /// Private scratch directory for one job, removed when dropped.
    async fn scratch_dir(&self, job_id: &str) -> Result<tempfile::TempDir, PipelineFailure> {
        fs::create_dir_all(&self.config.work_dir)
            .await
            .map_err(|e| PipelineFailure::internal(format!("cannot create work dir: {}", e)))?;

        tempfile::Builder::new()
            .prefix(&format!("job-{}-", job_id))
            .tempdir_in(&self.config.work_dir)
            .map_err(|e| PipelineFailure::internal(format!("cannot create scratch dir: {}", e)))
    }

    /// One acquisition plus verification.
    async fn attempt(
        &self,
        job: &Job,
        reporter: &StageReporter,
        attempt: u32,
        scratch: &Path,
    ) -> StageOutcome<PathBuf> {
        reporter.send(
            JobUpdate::transition(
                JobState::Acquiring,
                format!("acquiring (attempt {}/{})", attempt, self.config.max_attempts),
                PROGRESS_ACQUIRING,
            )
            .with_attempt(attempt),
        );

        let path = scratch.join(format!("attempt-{}.bin", attempt));

        match self.acquire(job, reporter, &path).await {
            StageOutcome::Done(bytes) => {
                info!(job_id = %job.id, attempt, bytes, "Acquired artifact");
            }
            StageOutcome::Retry(failure) => {
                discard(&path).await;
                return StageOutcome::Retry(failure);
            }
            StageOutcome::Fatal(failure) => {
                discard(&path).await;
                return StageOutcome::Fatal(failure);
            }
        }

        self.advance(reporter, JobState::Verifying, Some(attempt));
        let result = self.validator.validate(&path).await;
        if !result.ok {
            discard(&path).await;
            return StageOutcome::Retry(PipelineFailure::new(
                FailureKind::IntegrityFailure,
                result.reason,
            ));
        }

        StageOutcome::Done(path)
    }

    /// Move the record forward to `target`.
    ///
    /// Stage writes are best-effort, so an earlier one may have been lost;
    /// any stage between the stored state and `target` is written first.
    fn advance(
        &self,
        reporter: &StageReporter,
        target: JobState,
        attempt: Option<u32>,
    ) -> Option<Job> {
        let stored = match self.store.get(reporter.job_id()) {
            Ok(job) => job.map(|job| job.state),
            Err(e) => {
                warn!(job_id = %reporter.job_id(), error = %e, "Failed to read job state");
                None
            }
        };

        let mut last = None;
        for (state, step, progress) in missing_stages(stored, target) {
            let mut update = JobUpdate::transition(state, step, progress);
            if let Some(attempt) = attempt {
                update = update.with_attempt(attempt);
            }
            last = reporter.send(update);
        }
        last
    }

    /// Fetch from the agent and stream into `path`.
    ///
    /// Resolution and transfer share one fetch deadline.
    async fn acquire(&self, job: &Job, reporter: &StageReporter, path: &Path) -> StageOutcome<u64> {
        let now = tokio::time::Instant::now();
        let deadline = now
            .checked_add(self.config.fetch_timeout)
            .unwrap_or(now + FAR_FUTURE);
        let timed_out = || {
            StageOutcome::Retry(PipelineFailure::new(
                FailureKind::AgentTimeout,
                format!(
                    "fetch did not complete within {}s",
                    self.config.fetch_timeout.as_secs_f64()
                ),
            ))
        };

        let source = match tokio::time::timeout_at(deadline, self.agent.fetch(&job.reference)).await
        {
            Err(_) => return timed_out(),
            Ok(Err(e)) => return StageOutcome::failed(PipelineFailure::from(e)),
            Ok(Ok(source)) => source,
        };

        reporter.report("streaming", PROGRESS_STREAM_START, None);

        let mut file = match File::create(path).await {
            Ok(f) => f,
            Err(e) => {
                return StageOutcome::Fatal(PipelineFailure::internal(format!(
                    "cannot create scratch file: {}",
                    e
                )))
            }
        };

        let total = source.content_length.filter(|n| *n > 0);
        let mut chunks = source.chunks;

        let transfer = async move {
            let mut written = 0u64;
            let mut last_reported = PROGRESS_STREAM_START;

            while let Some(chunk) = chunks.next().await {
                let chunk = chunk.map_err(PipelineFailure::from)?;
                file.write_all(&chunk).await.map_err(|e| {
                    PipelineFailure::internal(format!("scratch write failed: {}", e))
                })?;
                written += chunk.len() as u64;
                metrics::BYTES_ACQUIRED.inc_by(chunk.len() as u64);

                if let Some(total) = total {
                    let share = (written.min(total) * PROGRESS_STREAM_SPAN as u64 / total) as u8;
                    let progress = PROGRESS_STREAM_START + share;
                    if progress >= last_reported + STREAM_REPORT_STEP {
                        reporter.report("streaming", progress, None);
                        last_reported = progress;
                    }
                }
            }

            file.flush()
                .await
                .map_err(|e| PipelineFailure::internal(format!("scratch flush failed: {}", e)))?;
            Ok::<u64, PipelineFailure>(written)
        };

        match tokio::time::timeout_at(deadline, transfer).await {
            Err(_) => timed_out(),
            Ok(Err(failure)) => StageOutcome::failed(failure),
            Ok(Ok(written)) => StageOutcome::Done(written),
        }
    }

    async fn upload(&self, job: &Job, artifact: &Path) -> Result<StoredObject, PipelineFailure> {
        let key = artifact_key(&self.config.key_prefix, &job.id, &job.reference);
        let started = Instant::now();

        match self.blob_store.put(&key, artifact).await {
            Ok(stored) => {
                metrics::UPLOAD_DURATION
                    .with_label_values(&["success"])
                    .observe(started.elapsed().as_secs_f64());
                info!(
                    job_id = %job.id,
                    store = self.blob_store.name(),
                    key = %key,
                    size_bytes = stored.size_bytes,
                    sha256 = %stored.sha256,
                    "Stored artifact"
                );
                Ok(stored)
            }
            Err(e) => {
                metrics::UPLOAD_DURATION
                    .with_label_values(&["failure"])
                    .observe(started.elapsed().as_secs_f64());
                Err(PipelineFailure::new(FailureKind::StorageFailure, e.to_string()))
            }
        }
    }

    /// Write the terminal record.
    async fn finish(
        &self,
        job: &Job,
        outcome: Result<StoredObject, PipelineFailure>,
        started: Instant,
    ) {
        let elapsed = started.elapsed().as_secs_f64();

        match outcome {
            Ok(stored) => {
                metrics::JOBS_FINISHED.with_label_values(&["ready", ""]).inc();
                metrics::JOB_DURATION
                    .with_label_values(&["ready"])
                    .observe(elapsed);
                info!(job_id = %job.id, location = %stored.location, "Job ready");

                let reporter = StageReporter::new(Arc::clone(&self.store), &job.id);
                self.advance(&reporter, JobState::Uploading, None);

                if let Err(e) = self.write_terminal(&job.id, JobUpdate::ready(&stored.location)).await {
                    error!(job_id = %job.id, error = %e, "Failed to record ready state");
                    let fallback = PipelineFailure::internal("could not record stored artifact");
                    if let Err(e) = self.write_terminal(&job.id, JobUpdate::failed(fallback.detail())).await {
                        error!(job_id = %job.id, error = %e, "Failed to record failure");
                    }
                }
            }
            Err(failure) => {
                metrics::JOBS_FINISHED
                    .with_label_values(&["failed", failure.kind.as_str()])
                    .inc();
                metrics::JOB_DURATION
                    .with_label_values(&["failed"])
                    .observe(elapsed);

                let detail = failure.detail();
                warn!(job_id = %job.id, kind = failure.kind.as_str(), detail = %detail, "Job failed");

                if let Err(e) = self.write_terminal(&job.id, JobUpdate::failed(detail)).await {
                    error!(job_id = %job.id, error = %e, "Failed to record failure");
                }
            }
        }
    }

    /// Terminal writes retry briefly on store errors; graph violations don't.
    async fn write_terminal(&self, job_id: &str, update: JobUpdate) -> Result<Job, JobError> {
        let mut tries = 0;
        loop {
            tries += 1;
            match self.store.update(job_id, update.clone()) {
                Ok(job) => return Ok(job),
                Err(e @ JobError::Database(_)) if tries < TERMINAL_WRITE_ATTEMPTS => {
                    warn!(job_id, error = %e, "Terminal write failed, retrying");
                    tokio::time::sleep(Duration::from_millis(100 * tries as u64)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Stage writes needed to get from `stored` to `target`, ending with `target`.
///
/// Nothing is needed once the record is at or past `target`; an unknown
/// stored state yields only `target`.
fn missing_stages(
    stored: Option<JobState>,
    target: JobState,
) -> impl Iterator<Item = (JobState, &'static str, u8)> {
    let position = |state: JobState| STAGES.iter().position(|(s, _, _)| *s == state);
    let end = position(target).map_or(STAGES.len(), |i| i + 1);
    let start = match stored {
        Some(JobState::Pending) => 0,
        Some(state) => position(state).map_or(end - 1, |i| (i + 1).min(end)),
        None => end - 1,
    };
    STAGES[start..end].iter().copied()
}

/// Step label shown while backing off.
fn retry_step(delay: Duration, kind: FailureKind) -> String {
    format!("waiting {:.1}s to retry after {}", delay.as_secs_f64(), kind.label())
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

/// Best-effort removal of a rejected attempt's file.
async fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove scratch file");
        }
    }
}
