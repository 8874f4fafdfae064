//! Core job data types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::store::JobError;

/// Longest reference we accept from callers.
pub const MAX_REFERENCE_LEN: usize = 2048;

/// Lifecycle state of a job.
///
/// ```text
/// Pending -> Acquiring -> Verifying -> Uploading -> Ready
///               ^             |
///               +---retry-----+
/// any non-terminal state -> Failed
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Created, waiting for a worker.
    Pending,
    /// The acquisition agent is resolving or streaming the content.
    Acquiring,
    /// The retrieved file is being checked by the validator.
    Verifying,
    /// The validated artifact is being handed to the blob store.
    Uploading,
    /// Stored; `artifact_location` is set.
    Ready,
    /// Gave up; `error_detail` is set.
    Failed,
}

impl JobState {
    /// All states, in pipeline order.
    pub const ALL: [JobState; 6] = [
        JobState::Pending,
        JobState::Acquiring,
        JobState::Verifying,
        JobState::Uploading,
        JobState::Ready,
        JobState::Failed,
    ];

    /// Returns the state as a snake_case string (matches the serialized form).
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Acquiring => "acquiring",
            JobState::Verifying => "verifying",
            JobState::Uploading => "uploading",
            JobState::Ready => "ready",
            JobState::Failed => "failed",
        }
    }

    /// Parses the snake_case form back into a state.
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }

    /// Returns true for `Ready` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Ready | JobState::Failed)
    }

    /// Returns true if the state graph has an edge from `self` to `next`.
    ///
    /// Staying in the same non-terminal state is allowed so progress can be
    /// reported within a stage.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (Ready | Failed, _) => false,
            (_, Pending) => *self == Pending,
            (_, Failed) => true,
            (Pending, Acquiring) => true,
            (Acquiring, Acquiring | Verifying) => true,
            (Verifying, Verifying | Uploading | Acquiring) => true,
            (Uploading, Uploading | Ready) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tracked acquisition request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    /// Opaque unique identifier (UUID v4).
    pub id: String,
    /// Caller-supplied content locator.
    pub reference: String,
    pub state: JobState,
    /// 0-100, never decreases.
    pub progress_percent: u8,
    /// Human-readable label of the active stage.
    pub current_step: String,
    /// Final stored object; only set in `Ready`.
    pub artifact_location: Option<String>,
    /// Bounded, redacted diagnostic; only set in `Failed`.
    pub error_detail: Option<String>,
    /// Acquisition attempts started so far.
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Build a fresh `Pending` job.
    pub fn new(id: impl Into<String>, reference: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            reference: reference.into(),
            state: JobState::Pending,
            progress_percent: 0,
            current_step: "queued".to_string(),
            artifact_location: None,
            error_detail: None,
            attempt: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns true once the job reached `Ready` or `Failed`.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Applies an update and returns the resulting record.
    ///
    /// Every store goes through this so the state graph and record invariants
    /// hold regardless of backend. The update is all-or-nothing.
    pub fn apply(&self, update: &JobUpdate, now: DateTime<Utc>) -> Result<Job, JobError> {
        let next_state = update.state.unwrap_or(self.state);

        if !self.state.can_transition_to(next_state) {
            return Err(JobError::InvalidTransition {
                job_id: self.id.clone(),
                from: self.state,
                to: next_state,
            });
        }

        if update.artifact_location.is_some() && next_state != JobState::Ready {
            return Err(self.violation("artifact location can only be set when entering ready"));
        }
        if update.error_detail.is_some() && next_state != JobState::Failed {
            return Err(self.violation("error detail can only be set when entering failed"));
        }

        let mut job = self.clone();
        job.state = next_state;
        job.updated_at = now;

        if let Some(ref step) = update.current_step {
            job.current_step = step.clone();
        }
        if let Some(progress) = update.progress_percent {
            job.progress_percent = job.progress_percent.max(progress.min(100));
        }
        if let Some(attempt) = update.attempt {
            if attempt < job.attempt {
                return Err(self.violation("attempt counter cannot go backwards"));
            }
            job.attempt = attempt;
        }

        match next_state {
            JobState::Ready => {
                let location = update
                    .artifact_location
                    .as_deref()
                    .filter(|l| !l.is_empty())
                    .ok_or_else(|| self.violation("ready requires an artifact location"))?;
                job.artifact_location = Some(location.to_string());
                job.progress_percent = 100;
            }
            JobState::Failed => {
                let detail = update
                    .error_detail
                    .as_deref()
                    .filter(|d| !d.is_empty())
                    .ok_or_else(|| self.violation("failed requires an error detail"))?;
                job.error_detail = Some(detail.to_string());
            }
            _ => {}
        }

        Ok(job)
    }

    fn violation(&self, reason: &str) -> JobError {
        JobError::InvariantViolation {
            job_id: self.id.clone(),
            reason: reason.to_string(),
        }
    }
}

/// A single write against a job's mutable fields.
///
/// All fields present in the update land together or not at all.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub state: Option<JobState>,
    pub progress_percent: Option<u8>,
    pub current_step: Option<String>,
    pub attempt: Option<u32>,
    pub artifact_location: Option<String>,
    pub error_detail: Option<String>,
}

impl JobUpdate {
    /// Progress within the current stage.
    pub fn progress(step: impl Into<String>, progress_percent: u8) -> Self {
        Self {
            current_step: Some(step.into()),
            progress_percent: Some(progress_percent),
            ..Default::default()
        }
    }

    /// Move to another stage.
    pub fn transition(state: JobState, step: impl Into<String>, progress_percent: u8) -> Self {
        Self {
            state: Some(state),
            ..Self::progress(step, progress_percent)
        }
    }

    /// Terminal success.
    pub fn ready(artifact_location: impl Into<String>) -> Self {
        Self {
            state: Some(JobState::Ready),
            current_step: Some("ready".to_string()),
            progress_percent: Some(100),
            artifact_location: Some(artifact_location.into()),
            ..Default::default()
        }
    }

    /// Terminal failure.
    pub fn failed(error_detail: impl Into<String>) -> Self {
        Self {
            state: Some(JobState::Failed),
            current_step: Some("failed".to_string()),
            error_detail: Some(error_detail.into()),
            ..Default::default()
        }
    }

    /// Record the attempt counter alongside the rest of the update.
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }
}

/// Checks a caller-supplied reference and returns its trimmed form.
///
/// Bare identifiers are accepted; anything that looks like a URL must be
/// http(s).
pub fn validate_reference(raw: &str) -> Result<String, String> {
    let reference = raw.trim();

    if reference.is_empty() {
        return Err("reference must not be empty".to_string());
    }
    if reference.len() > MAX_REFERENCE_LEN {
        return Err(format!(
            "reference is longer than {} bytes",
            MAX_REFERENCE_LEN
        ));
    }
    if reference.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err("reference must not contain whitespace or control characters".to_string());
    }
    if let Some((scheme, rest)) = reference.split_once("://") {
        let scheme = scheme.to_ascii_lowercase();
        if scheme != "http" && scheme != "https" {
            return Err(format!("unsupported scheme: {}", scheme));
        }
        if rest.is_empty() || rest.starts_with('/') {
            return Err("reference URL has no host".to_string());
        }
    }

    Ok(reference.to_string())
}
