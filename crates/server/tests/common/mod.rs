//! Common test utilities for API testing with mocks.
//!
//! This module provides a test fixture that creates an in-process server
//! with scripted dependencies injected, so the HTTP contract can be exercised
//! without an extractor binary or a storage service.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use ferry_core::{
    config::{DatabaseConfig, JobsConfig, ServerConfig, ValidatorConfig},
    testing::{MockBlobStore, ScriptedAgent},
    AcquisitionAgent, BlobStore, Config, ContainerValidator, Dispatcher, DispatcherConfig,
    JobStore, Orchestrator, OrchestratorConfig, SqliteJobStore,
};
use ferry_server::{api::create_router, state::AppState};

/// Re-export fixtures for test convenience
pub use ferry_core::testing::{fixtures, ScriptedFetch};

/// Test fixture for API testing with scripted dependencies.
///
/// Provides an in-process server with fully controllable:
/// - Acquisition agent (ScriptedAgent)
/// - Blob store (MockBlobStore)
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// Scripted agent - configure per-reference fetch results
    pub agent: Arc<ScriptedAgent>,
    /// Mock blob store - inspect uploaded artifacts
    pub blobs: Arc<MockBlobStore>,
    /// Dispatcher behind the router
    pub dispatcher: Arc<Dispatcher>,
    /// Temporary directory for the test database and scratch space
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    /// Create a new test fixture with a running dispatcher.
    pub async fn new() -> Self {
        Self::with_config(TestConfig::default()).await
    }

    /// Create a test fixture with custom configuration.
    pub async fn with_config(test_config: TestConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let agent = Arc::new(ScriptedAgent::new());
        let blobs = Arc::new(MockBlobStore::new());

        let jobs = JobsConfig {
            max_attempts: test_config.max_attempts,
            worker_pool_size: 2,
            queue_capacity: test_config.queue_capacity,
            initial_backoff_ms: 5,
            max_backoff_ms: 20,
            work_dir: temp_dir.path().join("work"),
            shutdown_grace_ms: 500,
            ..Default::default()
        };

        let config = Config {
            server: ServerConfig {
                host: std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
                port: 0, // Not used for in-process testing
            },
            database: DatabaseConfig {
                path: db_path.clone(),
                ..Default::default()
            },
            jobs: jobs.clone(),
            ..Default::default()
        };

        let store: Arc<dyn JobStore> =
            Arc::new(SqliteJobStore::new(&db_path).expect("Failed to create job store"));

        let orchestrator = Arc::new(Orchestrator::new(
            OrchestratorConfig::from(&jobs),
            Arc::clone(&store),
            Arc::clone(&agent) as Arc<dyn AcquisitionAgent>,
            Arc::new(ContainerValidator::new(ValidatorConfig::default())),
            Arc::clone(&blobs) as Arc<dyn BlobStore>,
        ));

        let dispatcher = Arc::new(Dispatcher::new(
            DispatcherConfig::from(&jobs),
            orchestrator,
        ));
        if test_config.start_dispatcher {
            dispatcher.start().await;
        }

        let state = Arc::new(AppState::new(config, store, Arc::clone(&dispatcher)));
        let router = create_router(state);

        Self {
            router,
            agent,
            blobs,
            dispatcher,
            temp_dir,
        }
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a POST request with raw string body (for testing malformed JSON).
    pub async fn post_raw(&self, path: &str, body: &str) -> TestResponse {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    /// Submit a reference and return the job id.
    pub async fn submit(&self, reference: &str) -> String {
        let response = self
            .post("/api/v1/submit", serde_json::json!({ "reference": reference }))
            .await;
        assert_eq!(response.status, StatusCode::ACCEPTED, "{:?}", response.body);
        response.body["jobId"]
            .as_str()
            .expect("jobId in response")
            .to_string()
    }

    /// Poll the status endpoint until the job is ready or failed.
    pub async fn wait_for_terminal(&self, job_id: &str, timeout: Duration) -> Value {
        let start = Instant::now();
        loop {
            let response = self.get(&format!("/api/v1/status/{}", job_id)).await;
            assert_eq!(response.status, StatusCode::OK);
            let state = response.body["state"].as_str().unwrap_or_default().to_string();
            if state == "ready" || state == "failed" {
                return response.body;
            }
            if start.elapsed() > timeout {
                panic!("job {} still {} after {:?}", job_id, state, timeout);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Send a request to the test server.
    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        let request = request_builder.body(body).unwrap();
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body_bytes).into_owned()))
        };

        TestResponse { status, body }
    }
}

/// Configuration for test fixture.
#[derive(Debug, Clone)]
pub struct TestConfig {
    /// Start the dispatch loop so submitted jobs run
    pub start_dispatcher: bool,
    /// Jobs waiting for a worker before submissions are refused
    pub queue_capacity: usize,
    pub max_attempts: u32,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            start_dispatcher: true,
            queue_capacity: 16,
            max_attempts: 3,
        }
    }
}

impl TestConfig {
    /// Config whose submissions are accepted but never picked up.
    pub fn idle(queue_capacity: usize) -> Self {
        Self {
            start_dispatcher: false,
            queue_capacity,
            ..Default::default()
        }
    }
}
