//! Job lifecycle integration tests.
//!
//! These tests drive jobs end to end through the dispatcher and orchestrator:
//! pending -> acquiring -> verifying -> uploading -> ready | failed

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tempfile::TempDir;
use tokio_test::assert_ok;

use ferry_core::{
    config::ValidatorConfig,
    testing::{fixtures, MockBlobStore, ScriptedAgent, ScriptedFetch},
    ContainerValidator, CreateJobRequest, Dispatcher, DispatcherConfig, Job, JobError, JobFilter,
    JobState, JobStore, JobUpdate, Orchestrator, OrchestratorConfig, SqliteJobStore,
};

/// Job store wrapper that records every successful write.
///
/// Individual non-terminal writes can be made to fail once, keyed by the
/// state they move to (`None` for a progress-only write).
struct RecordingStore {
    inner: SqliteJobStore,
    writes: Mutex<Vec<Job>>,
    fail_once: Mutex<Vec<Option<JobState>>>,
}

impl RecordingStore {
    fn fail_next_write(&self, state: Option<JobState>) {
        self.fail_once.lock().unwrap().push(state);
    }

    fn pending_failures(&self) -> usize {
        self.fail_once.lock().unwrap().len()
    }

    fn writes_for(&self, id: &str) -> Vec<Job> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|j| j.id == id)
            .cloned()
            .collect()
    }
}

impl JobStore for RecordingStore {
    fn create(&self, request: CreateJobRequest) -> Result<Job, JobError> {
        let job = self.inner.create(request)?;
        self.writes.lock().unwrap().push(job.clone());
        Ok(job)
    }

    fn get(&self, id: &str) -> Result<Option<Job>, JobError> {
        self.inner.get(id)
    }

    fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, JobError> {
        self.inner.list(filter)
    }

    fn count(&self, filter: &JobFilter) -> Result<i64, JobError> {
        self.inner.count(filter)
    }

    fn update(&self, id: &str, update: JobUpdate) -> Result<Job, JobError> {
        {
            let mut fail_once = self.fail_once.lock().unwrap();
            if let Some(i) = fail_once.iter().position(|s| *s == update.state) {
                fail_once.remove(i);
                return Err(JobError::Database("database is locked".to_string()));
            }
        }
        let job = self.inner.update(id, update)?;
        self.writes.lock().unwrap().push(job.clone());
        Ok(job)
    }
}

/// Test helper wiring a real sqlite store to scripted collaborators.
struct TestHarness {
    store: Arc<RecordingStore>,
    agent: Arc<ScriptedAgent>,
    blobs: Arc<MockBlobStore>,
    temp_dir: TempDir,
}

impl TestHarness {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("jobs.db");

        let store = Arc::new(RecordingStore {
            inner: SqliteJobStore::new(&db_path).expect("Failed to create job store"),
            writes: Mutex::new(Vec::new()),
            fail_once: Mutex::new(Vec::new()),
        });

        Self {
            store,
            agent: Arc::new(ScriptedAgent::new()),
            blobs: Arc::new(MockBlobStore::new()),
            temp_dir,
        }
    }

    fn orchestrator_config(&self) -> OrchestratorConfig {
        let mut config = OrchestratorConfig {
            max_attempts: 3,
            work_dir: self.temp_dir.path().join("work"),
            ..Default::default()
        };
        config.backoff.initial = Duration::from_millis(5);
        config.backoff.max = Duration::from_millis(20);
        config
    }

    fn orchestrator(&self, config: OrchestratorConfig) -> Arc<Orchestrator> {
        Arc::new(Orchestrator::new(
            config,
            Arc::clone(&self.store) as Arc<dyn JobStore>,
            Arc::clone(&self.agent) as Arc<dyn ferry_core::AcquisitionAgent>,
            Arc::new(ContainerValidator::new(ValidatorConfig::default())),
            Arc::clone(&self.blobs) as Arc<dyn ferry_core::BlobStore>,
        ))
    }

    fn dispatcher(&self, config: OrchestratorConfig, workers: usize) -> Dispatcher {
        Dispatcher::new(
            DispatcherConfig {
                worker_pool_size: workers,
                queue_capacity: 16,
                shutdown_grace: Duration::from_secs(1),
            },
            self.orchestrator(config),
        )
    }

    fn get(&self, id: &str) -> Job {
        self.store
            .get(id)
            .expect("Failed to read job")
            .expect("Job should exist")
    }

    async fn wait_for_terminal(&self, id: &str, timeout: Duration) -> Job {
        let start = Instant::now();
        loop {
            let job = self.get(id);
            if job.is_terminal() {
                return job;
            }
            if start.elapsed() > timeout {
                panic!("job {} stuck in {} after {:?}", id, job.state, timeout);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

#[tokio::test]
async fn test_integrity_failures_then_success_reaches_ready() {
    let h = TestHarness::new();
    h.agent.script(
        "video-A",
        vec![
            ScriptedFetch::bytes(vec![0u8; 10]),
            ScriptedFetch::bytes(fixtures::mp4_bytes_without_moov(128 * 1024)),
            ScriptedFetch::bytes(fixtures::large_mp4()),
        ],
    );
    let job = h.store.create(CreateJobRequest::new("video-A")).unwrap();

    h.orchestrator(h.orchestrator_config()).run(job.clone()).await;

    let done = h.get(&job.id);
    assert_eq!(done.state, JobState::Ready);
    assert_eq!(done.attempt, 3);
    assert_eq!(done.progress_percent, 100);
    assert!(done.error_detail.is_none());

    let location = done.artifact_location.expect("ready job has a location");
    let key = location.trim_start_matches("mock://");
    assert_eq!(key, format!("downloads/{}/video-A.mp4", job.id));
    assert_eq!(h.blobs.object(key).unwrap(), fixtures::large_mp4());
    assert_eq!(h.agent.calls("video-A"), 3);
}

#[tokio::test]
async fn test_always_short_artifact_fails_after_max_attempts() {
    let h = TestHarness::new();
    h.agent
        .script("video-B", vec![ScriptedFetch::bytes(vec![0u8; 10])]);
    let job = h.store.create(CreateJobRequest::new("video-B")).unwrap();

    h.orchestrator(h.orchestrator_config()).run(job.clone()).await;

    let done = h.get(&job.id);
    assert_eq!(done.state, JobState::Failed);
    assert_eq!(done.attempt, 3);
    assert_eq!(h.agent.calls("video-B"), 3);
    assert!(done.artifact_location.is_none());

    let detail = done.error_detail.expect("failed job has a detail");
    assert!(detail.contains("integrity"), "detail: {}", detail);
    assert!(detail.contains("after 3 attempts"), "detail: {}", detail);
    assert_eq!(h.blobs.object_count(), 0);
}

#[tokio::test]
async fn test_progress_is_monotonic_and_states_follow_graph() {
    let h = TestHarness::new();
    h.agent.script(
        "video-M",
        vec![
            ScriptedFetch::truncated(fixtures::mp4_bytes(256 * 1024)),
            ScriptedFetch::bytes(fixtures::large_mp4()),
        ],
    );
    let job = h.store.create(CreateJobRequest::new("video-M")).unwrap();

    h.orchestrator(h.orchestrator_config()).run(job.clone()).await;

    let writes = h.store.writes_for(&job.id);
    assert!(writes.len() > 4);
    assert_eq!(writes[0].state, JobState::Pending);

    for pair in writes.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        assert!(
            next.progress_percent >= prev.progress_percent,
            "progress went from {} to {}",
            prev.progress_percent,
            next.progress_percent
        );
        assert!(next.attempt >= prev.attempt);
        assert_ne!(next.state, JobState::Pending);
        assert!(!prev.state.is_terminal());
        if !next.is_terminal() {
            assert!(next.artifact_location.is_none() && next.error_detail.is_none());
        }
    }

    let last = writes.last().unwrap();
    assert_eq!(last.state, JobState::Ready);
    assert_eq!(last.attempt, 2);

    let seen: Vec<JobState> = writes.iter().map(|j| j.state).collect();
    for state in [JobState::Acquiring, JobState::Verifying, JobState::Uploading] {
        assert!(seen.contains(&state), "never entered {}", state);
    }
}

#[tokio::test]
async fn test_lost_stage_writes_still_reach_ready() {
    let h = TestHarness::new();
    h.agent
        .script("video-L", vec![ScriptedFetch::bytes(fixtures::large_mp4())]);
    h.store.fail_next_write(Some(JobState::Verifying));
    h.store.fail_next_write(None);
    let job = h.store.create(CreateJobRequest::new("video-L")).unwrap();

    h.orchestrator(h.orchestrator_config()).run(job.clone()).await;

    let done = h.get(&job.id);
    assert_eq!(done.state, JobState::Ready, "detail: {:?}", done.error_detail);
    assert_eq!(done.attempt, 1);
    assert!(done.artifact_location.is_some());
    assert_eq!(h.blobs.object_count(), 1);
    assert_eq!(h.store.pending_failures(), 0);

    let seen: Vec<JobState> = h.store.writes_for(&job.id).iter().map(|j| j.state).collect();
    assert!(seen.contains(&JobState::Verifying), "writes: {:?}", seen);
    assert!(seen.contains(&JobState::Uploading), "writes: {:?}", seen);
}

#[tokio::test]
async fn test_lost_uploading_write_still_reaches_ready() {
    let h = TestHarness::new();
    h.agent
        .script("video-U", vec![ScriptedFetch::bytes(fixtures::large_mp4())]);
    h.store.fail_next_write(Some(JobState::Acquiring));
    h.store.fail_next_write(Some(JobState::Uploading));
    let job = h.store.create(CreateJobRequest::new("video-U")).unwrap();

    h.orchestrator(h.orchestrator_config()).run(job.clone()).await;

    let done = h.get(&job.id);
    assert_eq!(done.state, JobState::Ready, "detail: {:?}", done.error_detail);
    assert_eq!(done.attempt, 1);
    assert_eq!(done.progress_percent, 100);
    assert_eq!(h.store.pending_failures(), 0);

    // The record still walked the whole graph in order.
    let writes = h.store.writes_for(&job.id);
    for pair in writes.windows(2) {
        assert!(pair[0].state.can_transition_to(pair[1].state));
        assert!(pair[1].progress_percent >= pair[0].progress_percent);
    }
}

#[tokio::test]
async fn test_panicking_agent_fails_job_and_frees_worker() {
    let h = TestHarness::new();
    h.agent
        .script("video-boom", vec![ScriptedFetch::panics("extractor crashed")]);
    h.agent
        .script("video-next", vec![ScriptedFetch::bytes(fixtures::large_mp4())]);

    let config = OrchestratorConfig {
        per_job_timeout: Duration::from_millis(200),
        ..h.orchestrator_config()
    };
    let dispatcher = h.dispatcher(config, 1);
    dispatcher.start().await;

    let job = assert_ok!(dispatcher.submit("video-boom"));
    let done = h.wait_for_terminal(&job.id, Duration::from_secs(2)).await;
    assert_eq!(done.state, JobState::Failed);
    let detail = done.error_detail.expect("failed job has a detail");
    assert!(detail.contains("panicked"), "detail: {}", detail);

    // The single worker is free for the next job.
    let next = assert_ok!(dispatcher.submit("video-next"));
    let done = h.wait_for_terminal(&next.id, Duration::from_secs(5)).await;
    assert_eq!(done.state, JobState::Ready);

    let mut status = dispatcher.status().await;
    for _ in 0..100 {
        if status.active_jobs == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        status = dispatcher.status().await;
    }
    assert_eq!(status.active_jobs, 0);
    assert!(status.active_job_ids.is_empty());

    let started = Instant::now();
    dispatcher.stop().await;
    assert!(started.elapsed() < Duration::from_millis(500));
}

#[tokio::test]
async fn test_not_found_fails_without_retry() {
    let h = TestHarness::new();
    h.agent.script("video-404", vec![ScriptedFetch::not_found()]);
    let job = h.store.create(CreateJobRequest::new("video-404")).unwrap();

    h.orchestrator(h.orchestrator_config()).run(job.clone()).await;

    let done = h.get(&job.id);
    assert_eq!(done.state, JobState::Failed);
    assert_eq!(done.attempt, 1);
    assert!(done.error_detail.unwrap().starts_with("invalid reference"));
}

#[tokio::test]
async fn test_storage_failure_is_not_retried() {
    let h = TestHarness::new();
    h.blobs.fail_puts(true);
    h.agent
        .script("video-S", vec![ScriptedFetch::bytes(fixtures::large_mp4())]);
    let job = h.store.create(CreateJobRequest::new("video-S")).unwrap();

    h.orchestrator(h.orchestrator_config()).run(job.clone()).await;

    let done = h.get(&job.id);
    assert_eq!(done.state, JobState::Failed);
    assert_eq!(done.attempt, 1);
    assert_eq!(h.agent.calls("video-S"), 1);
    assert!(done.error_detail.unwrap().starts_with("storage failure"));
}

#[tokio::test]
async fn test_hung_agent_fails_within_deadline() {
    let h = TestHarness::new();
    h.agent.script("video-hang", vec![ScriptedFetch::hang()]);

    let config = OrchestratorConfig {
        per_job_timeout: Duration::from_millis(300),
        ..h.orchestrator_config()
    };
    let dispatcher = h.dispatcher(config, 1);
    dispatcher.start().await;

    let started = Instant::now();
    let job = assert_ok!(dispatcher.submit("video-hang"));
    let done = h.wait_for_terminal(&job.id, Duration::from_secs(5)).await;

    assert_eq!(done.state, JobState::Failed);
    assert!(done.error_detail.unwrap().starts_with("deadline exceeded"));
    assert!(started.elapsed() < Duration::from_secs(3));

    // Scratch space is released on the timeout path too.
    let leftovers = std::fs::read_dir(h.temp_dir.path().join("work"))
        .map(|d| d.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0);

    dispatcher.stop().await;
}

#[tokio::test]
async fn test_submitted_job_is_immediately_readable() {
    let h = TestHarness::new();
    h.agent
        .script("video-R", vec![ScriptedFetch::bytes(fixtures::large_mp4())]);
    let dispatcher = h.dispatcher(h.orchestrator_config(), 2);
    dispatcher.start().await;

    let job = assert_ok!(dispatcher.submit("video-R"));
    let read = h.get(&job.id);
    assert_eq!(read.reference, "video-R");

    let done = h.wait_for_terminal(&job.id, Duration::from_secs(5)).await;
    assert_eq!(done.state, JobState::Ready);
    dispatcher.stop().await;
}

#[tokio::test]
async fn test_pool_sized_batch_all_terminate() {
    let h = TestHarness::new();
    let workers = 3;
    for i in 0..workers {
        let reference = format!("video-{}", i);
        let step = if i % 2 == 0 {
            ScriptedFetch::bytes_after(fixtures::large_mp4(), Duration::from_millis(50))
        } else {
            ScriptedFetch::bytes(vec![0u8; 10])
        };
        h.agent.script(&reference, vec![step]);
    }

    let dispatcher = h.dispatcher(h.orchestrator_config(), workers);
    dispatcher.start().await;

    let ids: Vec<String> = (0..workers)
        .map(|i| dispatcher.submit(&format!("video-{}", i)).unwrap().id)
        .collect();

    for (i, id) in ids.iter().enumerate() {
        let done = h.wait_for_terminal(id, Duration::from_secs(10)).await;
        let expected = if i % 2 == 0 {
            JobState::Ready
        } else {
            JobState::Failed
        };
        assert_eq!(done.state, expected);
    }
    assert!(h.agent.peak_in_flight() <= workers);
    dispatcher.stop().await;
}

#[tokio::test]
async fn test_terminal_records_survive_reopen() {
    let h = TestHarness::new();
    h.agent
        .script("video-P", vec![ScriptedFetch::bytes(fixtures::large_mp4())]);
    let job = h.store.create(CreateJobRequest::new("video-P")).unwrap();
    h.orchestrator(h.orchestrator_config()).run(job.clone()).await;

    let reopened = SqliteJobStore::new(&h.temp_dir.path().join("jobs.db")).unwrap();
    let stored = reopened.get(&job.id).unwrap().unwrap();
    assert_eq!(stored.state, JobState::Ready);
    assert!(stored.artifact_location.is_some());
    assert_eq!(
        reopened
            .count(&JobFilter::new().with_state(JobState::Ready))
            .unwrap(),
        1
    );
}
