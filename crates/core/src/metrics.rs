//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Dispatcher (submissions, rejections, queue waits)
//! - Pipeline (attempts, retries, terminal results, durations)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Dispatcher Metrics
// =============================================================================

/// Jobs accepted for processing.
pub static JOBS_SUBMITTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("ferry_jobs_submitted_total", "Total jobs accepted").unwrap()
});

/// Submissions turned away by reason.
pub static JOBS_REJECTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("ferry_jobs_rejected_total", "Total submissions rejected"),
        &["reason"], // "busy", "invalid_reference", "store"
    )
    .unwrap()
});

/// Time between acceptance and a worker picking the job up.
pub static QUEUE_WAIT: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "ferry_queue_wait_seconds",
            "Time jobs spend queued before a worker starts them",
        )
        .buckets(vec![0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0, 600.0]),
        &[],
    )
    .unwrap()
});

// =============================================================================
// Pipeline Metrics
// =============================================================================

/// Acquisition attempts by outcome.
pub static ACQUISITION_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "ferry_acquisition_attempts_total",
            "Total acquisition attempts",
        ),
        &["outcome"], // "verified" or a failure kind label
    )
    .unwrap()
});

/// Backoff sleeps taken before a retry.
pub static RETRIES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("ferry_retries_total", "Total retries after a retryable failure"),
        &["kind"],
    )
    .unwrap()
});

/// Jobs that reached a terminal state.
pub static JOBS_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("ferry_jobs_finished_total", "Total jobs reaching a terminal state"),
        &["result", "kind"], // result: "ready" | "failed"; kind empty for ready
    )
    .unwrap()
});

/// End-to-end job duration.
pub static JOB_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "ferry_job_duration_seconds",
            "Duration from job creation to terminal state",
        )
        .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]),
        &["result"],
    )
    .unwrap()
});

/// Bytes written to scratch by agents.
pub static BYTES_ACQUIRED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("ferry_bytes_acquired_total", "Total bytes received from agents").unwrap()
});

/// Upload duration by result.
pub static UPLOAD_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("ferry_upload_duration_seconds", "Duration of blob store puts")
            .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0]),
        &["result"],
    )
    .unwrap()
});

/// Get all core metrics for registration.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Dispatcher
        Box::new(JOBS_SUBMITTED.clone()),
        Box::new(JOBS_REJECTED.clone()),
        Box::new(QUEUE_WAIT.clone()),
        // Pipeline
        Box::new(ACQUISITION_ATTEMPTS.clone()),
        Box::new(RETRIES.clone()),
        Box::new(JOBS_FINISHED.clone()),
        Box::new(JOB_DURATION.clone()),
        Box::new(BYTES_ACQUIRED.clone()),
        Box::new(UPLOAD_DURATION.clone()),
    ]
}
