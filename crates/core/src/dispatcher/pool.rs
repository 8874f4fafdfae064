//! Bounded worker pool in front of the orchestrator.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{broadcast, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

use crate::job::{
    validate_reference, CreateJobRequest, Job, JobFilter, JobState, JobStore, JobUpdate,
};
use crate::metrics;
use crate::orchestrator::{Orchestrator, PipelineFailure};

use super::types::{DispatchError, DispatcherConfig, DispatcherStatus};

/// How often `stop` checks whether workers have drained.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// A job handed to the queue.
#[derive(Debug)]
struct QueuedJob {
    job_id: String,
    enqueued_at: Instant,
}

#[derive(Default)]
struct DispatchStats {
    active: AtomicU64,
    total_processed: AtomicU64,
}

/// State shared by every worker.
#[derive(Clone)]
struct WorkerContext {
    orchestrator: Arc<Orchestrator>,
    store: Arc<dyn JobStore>,
    active: Arc<Mutex<HashSet<String>>>,
    stats: Arc<DispatchStats>,
}

/// Releases a worker's claim on its job however the worker exits.
struct ActiveGuard {
    job_id: String,
    active: Arc<Mutex<HashSet<String>>>,
    stats: Arc<DispatchStats>,
}

impl ActiveGuard {
    /// Claim `job_id`, or `None` if another worker already holds it.
    fn claim(context: &WorkerContext, job_id: &str) -> Option<Self> {
        let inserted = context
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(job_id.to_string());
        if !inserted {
            return None;
        }
        context.stats.active.fetch_add(1, Ordering::SeqCst);
        Some(Self {
            job_id: job_id.to_string(),
            active: Arc::clone(&context.active),
            stats: Arc::clone(&context.stats),
        })
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            error!(job_id = %self.job_id, "Worker panicked");
        }
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.job_id);
        self.stats.active.fetch_sub(1, Ordering::SeqCst);
        self.stats.total_processed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Accepts submissions and runs them on a bounded pool of workers.
///
/// Saturation policy: a queue slot is reserved before the job record is
/// created. When the queue is full the submission is rejected with
/// [`DispatchError::Busy`] and no record exists for it.
pub struct Dispatcher {
    config: DispatcherConfig,
    context: WorkerContext,
    queue_tx: mpsc::Sender<QueuedJob>,
    queue_rx: Mutex<Option<mpsc::Receiver<QueuedJob>>>,
    semaphore: Arc<Semaphore>,
    running: Arc<AtomicBool>,
    closed: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
}

impl Dispatcher {
    /// Create a new dispatcher. Nothing runs until [`Dispatcher::start`].
    pub fn new(config: DispatcherConfig, orchestrator: Arc<Orchestrator>) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity.max(1));
        let (shutdown_tx, _) = broadcast::channel(1);
        let store = Arc::clone(orchestrator.store());

        Self {
            semaphore: Arc::new(Semaphore::new(config.worker_pool_size.max(1))),
            config,
            context: WorkerContext {
                orchestrator,
                store,
                active: Arc::new(Mutex::new(HashSet::new())),
                stats: Arc::new(DispatchStats::default()),
            },
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            running: Arc::new(AtomicBool::new(false)),
            closed: AtomicBool::new(false),
            shutdown_tx,
        }
    }

    /// Accept a reference and return its `Pending` record.
    ///
    /// Returns as soon as the record exists; the record is readable before
    /// any worker touches it.
    pub fn submit(&self, reference: &str) -> Result<Job, DispatchError> {
        let reference = validate_reference(reference).map_err(|reason| {
            metrics::JOBS_REJECTED
                .with_label_values(&["invalid_reference"])
                .inc();
            DispatchError::InvalidReference(reason)
        })?;

        if self.closed.load(Ordering::SeqCst) {
            return Err(DispatchError::ShuttingDown);
        }

        let slot = self.queue_tx.try_reserve().map_err(|e| match e {
            TrySendError::Full(()) => {
                metrics::JOBS_REJECTED.with_label_values(&["busy"]).inc();
                DispatchError::Busy {
                    capacity: self.config.queue_capacity,
                }
            }
            TrySendError::Closed(()) => DispatchError::ShuttingDown,
        })?;

        // Dropping `slot` on error gives the queue space back.
        let job = self
            .context
            .store
            .create(CreateJobRequest::new(reference))
            .inspect_err(|_| {
                metrics::JOBS_REJECTED.with_label_values(&["store"]).inc();
            })?;

        slot.send(QueuedJob {
            job_id: job.id.clone(),
            enqueued_at: Instant::now(),
        });
        metrics::JOBS_SUBMITTED.inc();
        info!(job_id = %job.id, reference = %job.reference, "Job submitted");

        Ok(job)
    }

    /// Start the dispatch loop, recovering jobs left over from a previous run.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Dispatcher already running");
            return;
        }

        let queue_rx = self
            .queue_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(queue_rx) = queue_rx else {
            warn!("Dispatcher cannot be restarted after stop");
            self.running.store(false, Ordering::SeqCst);
            return;
        };

        info!(
            workers = self.config.worker_pool_size,
            queue_capacity = self.config.queue_capacity,
            "Starting dispatcher"
        );

        self.recover_interrupted();
        self.spawn_dispatch_loop(queue_rx);
        self.requeue_pending();

        info!("Dispatcher started");
    }

    /// Stop taking work and wait up to the grace period for running jobs.
    pub async fn stop(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Dispatcher not running");
            return;
        }

        info!("Stopping dispatcher");
        let _ = self.shutdown_tx.send(());

        let deadline = Instant::now() + self.config.shutdown_grace;
        while self.context.stats.active.load(Ordering::SeqCst) > 0 {
            if Instant::now() >= deadline {
                warn!(
                    active = self.context.stats.active.load(Ordering::SeqCst),
                    "Grace period elapsed with jobs still running"
                );
                break;
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }

        info!("Dispatcher stopped");
    }

    /// Get current dispatcher status.
    pub async fn status(&self) -> DispatcherStatus {
        let mut active_job_ids: Vec<String> = self
            .context
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect();
        active_job_ids.sort();

        DispatcherStatus {
            running: self.running.load(Ordering::Relaxed),
            worker_pool_size: self.config.worker_pool_size,
            queue_capacity: self.config.queue_capacity,
            active_jobs: self.context.stats.active.load(Ordering::Relaxed) as usize,
            queued_jobs: self
                .config
                .queue_capacity
                .saturating_sub(self.queue_tx.capacity()),
            total_processed: self.context.stats.total_processed.load(Ordering::Relaxed),
            active_job_ids,
        }
    }

    /// Fail jobs a previous process left mid-pipeline.
    fn recover_interrupted(&self) {
        let detail = PipelineFailure::internal("interrupted by service restart").detail();

        for state in [JobState::Acquiring, JobState::Verifying, JobState::Uploading] {
            for job in self.list_all(state) {
                match self
                    .context
                    .store
                    .update(&job.id, JobUpdate::failed(detail.clone()))
                {
                    Ok(_) => info!(job_id = %job.id, state = %state, "Failed interrupted job"),
                    Err(e) => error!(job_id = %job.id, error = %e, "Failed to recover job"),
                }
            }
        }
    }

    /// Put `Pending` records back on the queue, oldest first.
    fn requeue_pending(&self) {
        let mut pending = self.list_all(JobState::Pending);
        if pending.is_empty() {
            return;
        }
        pending.reverse();
        info!(count = pending.len(), "Re-queueing pending jobs");

        let queue_tx = self.queue_tx.clone();
        tokio::spawn(async move {
            for job in pending {
                let queued = QueuedJob {
                    job_id: job.id,
                    enqueued_at: Instant::now(),
                };
                if queue_tx.send(queued).await.is_err() {
                    break;
                }
            }
        });
    }

    fn list_all(&self, state: JobState) -> Vec<Job> {
        let filter = JobFilter::new().with_state(state);
        let total = match self.context.store.count(&filter) {
            Ok(n) => n,
            Err(e) => {
                error!(state = %state, error = %e, "Failed to count jobs");
                return Vec::new();
            }
        };
        self.context
            .store
            .list(&filter.with_limit(total))
            .unwrap_or_else(|e| {
                error!(state = %state, error = %e, "Failed to list jobs");
                Vec::new()
            })
    }

    /// Spawn the loop that pairs worker permits with queued jobs.
    fn spawn_dispatch_loop(&self, mut queue_rx: mpsc::Receiver<QueuedJob>) {
        let semaphore = Arc::clone(&self.semaphore);
        let context = self.context.clone();
        let running = Arc::clone(&self.running);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!("Dispatch loop started");
            loop {
                // Take a permit first so queued jobs stay in the queue while
                // every worker is busy.
                let permit = tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };

                let queued = tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    queued = queue_rx.recv() => match queued {
                        Some(queued) => queued,
                        None => break,
                    },
                };

                if !running.load(Ordering::Relaxed) {
                    break;
                }
                Self::spawn_worker(context.clone(), queued, permit);
            }
            info!("Dispatch loop stopped");
        });
    }

    fn spawn_worker(context: WorkerContext, queued: QueuedJob, permit: OwnedSemaphorePermit) {
        tokio::spawn(async move {
            let _permit = permit;
            let job_id = queued.job_id;

            let Some(_guard) = ActiveGuard::claim(&context, &job_id) else {
                warn!(job_id = %job_id, "Job already has a worker, dropping duplicate");
                return;
            };
            metrics::QUEUE_WAIT
                .with_label_values(&[])
                .observe(queued.enqueued_at.elapsed().as_secs_f64());

            match context.store.get(&job_id) {
                Ok(Some(job)) if job.state == JobState::Pending => {
                    context.orchestrator.run(job).await;
                }
                Ok(Some(job)) => {
                    debug!(job_id = %job_id, state = %job.state, "Skipping job that is no longer pending");
                }
                Ok(None) => warn!(job_id = %job_id, "Queued job vanished from store"),
                Err(e) => error!(job_id = %job_id, error = %e, "Failed to load queued job"),
            }
        });
    }
}
