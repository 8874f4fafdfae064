//! Job API handlers.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, warn};

use ferry_core::{DispatchError, DispatcherStatus, Job, JobFilter, JobState};

use crate::state::AppState;

/// Maximum allowed limit for job queries
const MAX_LIMIT: i64 = 1000;

/// Default limit for job queries
const DEFAULT_LIMIT: i64 = 100;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for submitting a job
#[derive(Debug, Deserialize)]
pub struct SubmitBody {
    /// Content locator handed to the acquisition agent
    pub reference: Option<String>,
}

/// Response for an accepted submission
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub job_id: String,
}

/// Externally visible job status
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub job_id: String,
    pub reference: String,
    pub state: JobState,
    pub progress_percent: u8,
    pub current_step: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    pub attempt: u32,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Job> for JobStatusResponse {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            reference: job.reference,
            state: job.state,
            progress_percent: job.progress_percent,
            current_step: job.current_step,
            artifact_location: job.artifact_location,
            error_detail: job.error_detail,
            attempt: job.attempt,
            created_at: job.created_at.to_rfc3339(),
            updated_at: job.updated_at.to_rfc3339(),
        }
    }
}

/// Query parameters for listing jobs
#[derive(Debug, Deserialize)]
pub struct ListJobsParams {
    /// Filter by state
    pub state: Option<String>,
    /// Maximum number of jobs to return
    pub limit: Option<i64>,
    /// Pagination offset
    pub offset: Option<i64>,
}

/// Response for listing jobs
#[derive(Debug, Serialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<JobStatusResponse>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct JobErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<JobErrorResponse>);

fn error_response(status: StatusCode, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(JobErrorResponse {
            error: error.into(),
        }),
    )
}

// ============================================================================
// Handlers
// ============================================================================

/// Accept a reference for acquisition.
///
/// Returns 202 with the new job id once the `Pending` record exists.
pub async fn submit(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SubmitBody>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let Json(body) = body.map_err(|e| error_response(StatusCode::BAD_REQUEST, e.body_text()))?;

    let reference = body
        .reference
        .ok_or_else(|| error_response(StatusCode::BAD_REQUEST, "reference is required"))?;

    match state.dispatcher().submit(&reference) {
        Ok(job) => Ok((
            StatusCode::ACCEPTED,
            Json(SubmitResponse { job_id: job.id }),
        )),
        Err(e @ DispatchError::InvalidReference(_)) => {
            Err(error_response(StatusCode::BAD_REQUEST, e.to_string()))
        }
        Err(e @ (DispatchError::Busy { .. } | DispatchError::ShuttingDown)) => {
            warn!(error = %e, "Submission turned away");
            Err(error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string()))
        }
        Err(e @ DispatchError::Store(_)) => {
            error!(error = %e, "Failed to create job");
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                e.to_string(),
            ))
        }
    }
}

/// Get the status of a job by ID
pub async fn get_status(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    match state.store().get(&job_id) {
        Ok(Some(job)) => Ok(Json(JobStatusResponse::from(job))),
        Ok(None) => Err(error_response(
            StatusCode::NOT_FOUND,
            format!("Job not found: {}", job_id),
        )),
        Err(e) => Err(error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            e.to_string(),
        )),
    }
}

/// List jobs with optional filters
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListJobsParams>,
) -> Result<Json<ListJobsResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut filter = JobFilter::new().with_limit(limit).with_offset(offset);

    if let Some(ref raw) = params.state {
        let job_state = JobState::parse(raw).ok_or_else(|| {
            error_response(StatusCode::BAD_REQUEST, format!("Unknown state: {}", raw))
        })?;
        filter = filter.with_state(job_state);
    }

    let jobs = state.store().list(&filter).map_err(|e| {
        error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;

    // Count ignores limit and offset
    let total = state.store().count(&filter).map_err(|e| {
        error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;

    Ok(Json(ListJobsResponse {
        jobs: jobs.into_iter().map(JobStatusResponse::from).collect(),
        total,
        limit,
        offset,
    }))
}

/// Get dispatcher status
pub async fn dispatcher_status(State(state): State<Arc<AppState>>) -> Json<DispatcherStatus> {
    Json(state.dispatcher().status().await)
}
