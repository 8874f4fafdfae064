//! Failure taxonomy and per-stage results for the pipeline.

use std::fmt;

use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::agent::AgentError;

/// Longest `error_detail` ever written to a job.
pub const MAX_ERROR_DETAIL_LEN: usize = 512;

/// Classification of everything that can end or interrupt a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The reference does not resolve to content.
    InvalidReference,
    /// Origin throttled or refused us.
    AgentBlocked,
    AgentTimeout,
    AgentUnknown,
    /// Retrieved file failed validation.
    IntegrityFailure,
    StorageFailure,
    /// Per-job deadline hit.
    DeadlineExceeded,
    InternalError,
}

impl FailureKind {
    /// Retryable kinds consume an attempt and back off; the rest end the job.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailureKind::AgentBlocked
                | FailureKind::AgentTimeout
                | FailureKind::AgentUnknown
                | FailureKind::IntegrityFailure
        )
    }

    /// Metric label.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::InvalidReference => "invalid_reference",
            FailureKind::AgentBlocked => "agent_blocked",
            FailureKind::AgentTimeout => "agent_timeout",
            FailureKind::AgentUnknown => "agent_unknown",
            FailureKind::IntegrityFailure => "integrity_failure",
            FailureKind::StorageFailure => "storage_failure",
            FailureKind::DeadlineExceeded => "deadline_exceeded",
            FailureKind::InternalError => "internal_error",
        }
    }

    /// Human-readable prefix used in `error_detail`.
    pub fn label(&self) -> &'static str {
        match self {
            FailureKind::InvalidReference => "invalid reference",
            FailureKind::AgentBlocked => "blocked by origin",
            FailureKind::AgentTimeout => "agent timeout",
            FailureKind::AgentUnknown => "agent error",
            FailureKind::IntegrityFailure => "integrity failure",
            FailureKind::StorageFailure => "storage failure",
            FailureKind::DeadlineExceeded => "deadline exceeded",
            FailureKind::InternalError => "internal error",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A classified pipeline failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl PipelineFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(FailureKind::InternalError, message)
    }

    /// Annotate a retryable failure that ran out of attempts.
    pub fn exhausted(self, attempts: u32) -> Self {
        Self {
            message: format!("{} (after {} attempts)", self.message, attempts),
            ..self
        }
    }

    /// Redacted, length-capped text for the job record.
    pub fn detail(&self) -> String {
        bounded_detail(&format!("{}: {}", self.kind.label(), self.message))
    }
}

impl fmt::Display for PipelineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.label(), self.message)
    }
}

impl From<AgentError> for PipelineFailure {
    fn from(err: AgentError) -> Self {
        let kind = match &err {
            AgentError::NotFound(_) => FailureKind::InvalidReference,
            AgentError::Throttled(_) | AgentError::Blocked(_) => FailureKind::AgentBlocked,
            AgentError::Timeout(_) => FailureKind::AgentTimeout,
            AgentError::Unknown(_) => FailureKind::AgentUnknown,
        };
        Self::new(kind, err.to_string())
    }
}

/// Result of one pipeline stage.
#[derive(Debug)]
pub enum StageOutcome<T> {
    Done(T),
    /// Failed, but a fresh acquisition may succeed.
    Retry(PipelineFailure),
    /// Failed for good.
    Fatal(PipelineFailure),
}

impl<T> StageOutcome<T> {
    /// Sort a failure into `Retry` or `Fatal` by its kind.
    pub fn failed(failure: PipelineFailure) -> Self {
        if failure.kind.is_retryable() {
            StageOutcome::Retry(failure)
        } else {
            StageOutcome::Fatal(failure)
        }
    }
}

static REDACTIONS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (
            r"(?i)\b(cookie|set-cookie|authorization|proxy-authorization)\s*:\s*[^\r\n]*",
            "${1}: [redacted]",
        ),
        (r"(?i)\bbearer\s+[A-Za-z0-9._~+/=-]+", "Bearer [redacted]"),
        (
            r"(?i)\b(token|access_token|api[_-]?key|apikey|password|passwd|secret|session[_-]?id|sig|signature|cookies?)=[^&\s;]+",
            "${1}=[redacted]",
        ),
        (r"\bhf_[A-Za-z0-9]{8,}", "[redacted]"),
        (r"(?i)(https?://)[^/\s:@]+:[^/\s@]+@", "${1}[redacted]@"),
    ]
    .into_iter()
    .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
    .collect()
});

/// Strip credentials and session material from a diagnostic string.
pub fn redact(text: &str) -> String {
    REDACTIONS
        .iter()
        .fold(text.to_string(), |acc, (re, replacement)| {
            re.replace_all(&acc, *replacement).into_owned()
        })
}

/// Redact and cap a diagnostic at [`MAX_ERROR_DETAIL_LEN`] characters.
pub fn bounded_detail(text: &str) -> String {
    let redacted = redact(text.trim());
    if redacted.chars().count() <= MAX_ERROR_DETAIL_LEN {
        return redacted;
    }
    let mut out: String = redacted.chars().take(MAX_ERROR_DETAIL_LEN - 3).collect();
    out.push_str("...");
    out
}
