//! Job orchestrator: drives one job through the acquisition pipeline.
//!
//! Each run sequences the stages for a single job:
//! - **Acquiring**: fetch from the agent and stream into private scratch space
//! - **Verifying**: check the file; a bad file triggers a fresh acquisition
//! - **Uploading**: hand the verified artifact to the blob store
//!
//! Retryable failures back off exponentially up to the attempt ceiling. The
//! whole run is bounded by a deadline measured from job creation.

mod config;
mod runner;
mod types;

pub use config::{BackoffPolicy, OrchestratorConfig};
pub use runner::Orchestrator;
pub use types::{
    bounded_detail, redact, FailureKind, PipelineFailure, StageOutcome, MAX_ERROR_DETAIL_LEN,
};
