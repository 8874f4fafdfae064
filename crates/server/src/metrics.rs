//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the ferry server:
//! - HTTP request metrics (latency, counts, in flight)
//! - Job counts by state and dispatcher status (collected on scrape)
//! - Core pipeline metrics re-registered from `ferry_core::metrics`

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use regex_lite::Regex;
use tracing::warn;

use ferry_core::{JobFilter, JobState};

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "ferry_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("ferry_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "ferry_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// Job Metrics (collected dynamically)
// =============================================================================

/// Jobs by current state.
pub static JOBS_BY_STATE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("ferry_jobs_by_state", "Current job count by state"),
        &["state"],
    )
    .unwrap()
});

// =============================================================================
// Dispatcher Metrics (collected dynamically)
// =============================================================================

/// Dispatcher running state (1 = running, 0 = stopped).
pub static DISPATCHER_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "ferry_dispatcher_running",
        "Whether the dispatcher is running (1) or stopped (0)",
    )
    .unwrap()
});

/// Jobs currently held by a worker.
pub static DISPATCHER_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("ferry_dispatcher_active_jobs", "Jobs currently running").unwrap()
});

/// Jobs waiting for a worker.
pub static DISPATCHER_QUEUED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("ferry_dispatcher_queued_jobs", "Jobs waiting for a worker").unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();

    // Jobs
    registry.register(Box::new(JOBS_BY_STATE.clone())).unwrap();

    // Dispatcher
    registry
        .register(Box::new(DISPATCHER_RUNNING.clone()))
        .unwrap();
    registry
        .register(Box::new(DISPATCHER_ACTIVE.clone()))
        .unwrap();
    registry
        .register(Box::new(DISPATCHER_QUEUED.clone()))
        .unwrap();

    // Core metrics (dispatcher submissions, pipeline attempts and results)
    for metric in ferry_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Collect dynamic metrics from current application state.
///
/// Called before encoding so the gauges reflect the store and dispatcher
/// at scrape time.
pub async fn collect_dynamic_metrics(state: &crate::state::AppState) {
    let status = state.dispatcher().status().await;
    DISPATCHER_RUNNING.set(if status.running { 1 } else { 0 });
    DISPATCHER_ACTIVE.set(status.active_jobs as i64);
    DISPATCHER_QUEUED.set(status.queued_jobs as i64);

    for job_state in JobState::ALL {
        let filter = JobFilter::new().with_state(job_state);
        if let Ok(count) = state.store().count(&filter) {
            JOBS_BY_STATE
                .with_label_values(&[job_state.as_str()])
                .set(count);
        }
    }
}

static UUID_SEGMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
        .unwrap()
});

/// Normalize a path for metric labels (replace job IDs with a placeholder).
pub fn normalize_path(path: &str) -> String {
    let result = UUID_SEGMENT.replace_all(path, "{id}");
    // Any id under /status collapses to one label.
    match result.strip_prefix("/api/v1/status/") {
        Some(rest) if rest != "{id}" => "/api/v1/status/{id}".to_string(),
        _ => result.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_uuid() {
        let path = "/api/v1/status/550e8400-e29b-41d4-a716-446655440000";
        assert_eq!(normalize_path(path), "/api/v1/status/{id}");
    }

    #[test]
    fn test_normalize_path_arbitrary_status_id() {
        assert_eq!(
            normalize_path("/api/v1/status/not-a-uuid"),
            "/api/v1/status/{id}"
        );
    }

    #[test]
    fn test_normalize_path_no_ids() {
        assert_eq!(normalize_path("/api/v1/health"), "/api/v1/health");
        assert_eq!(normalize_path("/api/v1/jobs"), "/api/v1/jobs");
    }

    #[test]
    fn test_encode_metrics_returns_prometheus_format() {
        HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/test", "200"])
            .inc();

        let output = encode_metrics();
        assert!(output.contains("ferry_http_requests_total"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }

    #[test]
    fn test_registry_contains_all_metrics() {
        // Prometheus only outputs labelled metrics that have been touched
        HTTP_REQUEST_DURATION
            .with_label_values(&["GET", "/test", "200"])
            .observe(0.1);
        HTTP_REQUESTS_IN_FLIGHT.set(0);
        JOBS_BY_STATE.with_label_values(&["pending"]).set(0);
        DISPATCHER_RUNNING.set(0);
        DISPATCHER_ACTIVE.set(0);
        DISPATCHER_QUEUED.set(0);
        ferry_core::metrics::JOBS_SUBMITTED.inc();

        let output = encode_metrics();

        assert!(output.contains("ferry_http_request_duration_seconds"));
        assert!(output.contains("ferry_http_requests_in_flight"));
        assert!(output.contains("ferry_jobs_by_state"));
        assert!(output.contains("ferry_dispatcher_running"));
        assert!(output.contains("ferry_dispatcher_active_jobs"));
        assert!(output.contains("ferry_dispatcher_queued_jobs"));
        assert!(output.contains("ferry_jobs_submitted_total"));
    }
}
