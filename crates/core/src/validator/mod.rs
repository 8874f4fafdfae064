//! Artifact integrity checks run before a download is accepted.
//!
//! A validator never mutates or removes the file it inspects and never
//! errors: every problem becomes a `ValidationResult` with `ok == false`.

mod mp4;

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use mp4::ContainerValidator;

/// Outcome of validating a retrieved file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub ok: bool,
    /// Short diagnostic; empty when `ok`.
    pub reason: String,
}

impl ValidationResult {
    pub fn pass() -> Self {
        Self {
            ok: true,
            reason: String::new(),
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: reason.into(),
        }
    }
}

/// Inspects a retrieved file for minimum integrity.
#[async_trait]
pub trait ArtifactValidator: Send + Sync {
    /// Returns the name of this validator implementation.
    fn name(&self) -> &str;

    /// Validate the file at `path`.
    async fn validate(&self, path: &Path) -> ValidationResult;
}
