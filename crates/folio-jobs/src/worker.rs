//! Job worker and runner for processing background jobs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, Notify, RwLock};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use folio_core::{defaults, Job, JobRepository, JobType, Result};

use crate::handler::{JobContext, JobHandler, JobResult};

/// Configuration for the job worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Polling interval in milliseconds when the queue is empty.
    pub poll_interval_ms: u64,
    /// Maximum number of concurrent jobs.
    pub max_concurrent_jobs: usize,
    /// Whether to enable job processing.
    pub enabled: bool,
    /// Age after which a running claim is treated as orphaned.
    pub stale_claim_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: defaults::JOB_POLL_INTERVAL_MS,
            max_concurrent_jobs: defaults::JOB_MAX_CONCURRENT,
            enabled: true,
            stale_claim_secs: defaults::JOB_STALE_CLAIM_SECS,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `JOB_WORKER_ENABLED` | `true` | Enable/disable job processing |
    /// | `JOB_MAX_CONCURRENT` | `4` | Max concurrent jobs |
    /// | `JOB_POLL_INTERVAL_MS` | `1000` | Polling interval when queue is empty |
    /// | `JOB_STALE_CLAIM_SECS` | `900` | Age at which a running claim is released |
    pub fn from_env() -> Self {
        let enabled = std::env::var("JOB_WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let max_concurrent_jobs = std::env::var("JOB_MAX_CONCURRENT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::JOB_MAX_CONCURRENT)
            .max(1);

        let poll_interval_ms = std::env::var("JOB_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::JOB_POLL_INTERVAL_MS);

        let stale_claim_secs = std::env::var("JOB_STALE_CLAIM_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::JOB_STALE_CLAIM_SECS);

        Self {
            poll_interval_ms,
            max_concurrent_jobs,
            enabled,
            stale_claim_secs,
        }
    }

    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_stale_claim_secs(mut self, secs: u64) -> Self {
        self.stale_claim_secs = secs;
        self
    }
}

/// Event emitted by the job worker.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// A job attempt was started.
    JobStarted {
        job_id: Uuid,
        job_type: JobType,
        attempt: i32,
    },
    /// A job completed successfully.
    JobCompleted { job_id: Uuid, job_type: JobType },
    /// An attempt failed and the job was rescheduled with backoff.
    RetryScheduled {
        job_id: Uuid,
        job_type: JobType,
        attempt: i32,
        error: String,
    },
    /// A job failed permanently.
    JobFailed {
        job_id: Uuid,
        job_type: JobType,
        error: String,
    },
    /// Worker started.
    WorkerStarted,
    /// Worker stopped.
    WorkerStopped,
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
}

impl WorkerHandle {
    /// Signal the worker to shut down gracefully.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| folio_core::Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }
}

type HandlerMap = Arc<RwLock<HashMap<JobType, Arc<dyn JobHandler>>>>;

/// Job worker that processes jobs from the queue.
///
/// Handlers bound their own attempt duration (see
/// [`ExtractionHandler::with_timeout`](crate::ExtractionHandler::with_timeout));
/// the worker only routes outcomes back to the repository.
pub struct JobWorker {
    jobs: Arc<dyn JobRepository>,
    config: WorkerConfig,
    handlers: HandlerMap,
    event_tx: broadcast::Sender<WorkerEvent>,
    notify: Option<Arc<Notify>>,
}

impl JobWorker {
    pub fn new(jobs: Arc<dyn JobRepository>, config: WorkerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        Self {
            jobs,
            config,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
            notify: None,
        }
    }

    /// Wake from the idle sleep as soon as the repository signals new work.
    pub fn with_notify(mut self, notify: Arc<Notify>) -> Self {
        self.notify = Some(notify);
        self
    }

    /// Register a handler for a job type.
    pub async fn register_handler<H: JobHandler + 'static>(&self, handler: H) {
        let job_type = handler.job_type();
        let mut handlers = self.handlers.write().await;
        handlers.insert(job_type, Arc::new(handler));
        debug!(?job_type, "Registered job handler");
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();

        tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
        }
    }

    /// Run the worker loop.
    ///
    /// Claims up to `max_concurrent_jobs` at a time and processes them
    /// concurrently. Only sleeps when the queue has nothing runnable.
    ///
    /// Between batches, claims older than `stale_claim_secs` are released so
    /// jobs held by a worker that died mid-attempt run again. A batch is
    /// always drained first, so this worker never holds a claim at that point.
    #[instrument(skip(self, shutdown_rx))]
    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!(subsystem = "jobs", "Job worker is disabled, not starting");
            return;
        }

        info!(
            subsystem = "jobs",
            component = "worker",
            poll_interval_ms = self.config.poll_interval_ms,
            max_concurrent = self.config.max_concurrent_jobs,
            "Job worker started"
        );

        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let max_concurrent = self.config.max_concurrent_jobs.max(1);
        let stale_after = Duration::from_secs(self.config.stale_claim_secs);
        let reclaim_every = stale_after.min(Duration::from_secs(60));
        let mut last_reclaim: Option<Instant> = None;

        loop {
            if shutdown_rx.try_recv().is_ok() {
                info!(subsystem = "jobs", "Job worker received shutdown signal");
                break;
            }

            if last_reclaim.map_or(true, |at| at.elapsed() >= reclaim_every) {
                self.reclaim_stale(stale_after).await;
                last_reclaim = Some(Instant::now());
            }

            let mut claimed = 0;
            let mut tasks = tokio::task::JoinSet::new();

            for _ in 0..max_concurrent {
                match self.claim_job().await {
                    Some(job) => {
                        claimed += 1;
                        let worker = self.clone_refs();
                        tasks.spawn(async move {
                            worker.execute_job(job).await;
                        });
                    }
                    None => break,
                }
            }

            if claimed == 0 {
                let notify = self.notify.clone();
                let wake = async move {
                    match notify {
                        Some(n) => n.notified().await,
                        None => std::future::pending::<()>().await,
                    }
                };
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!(subsystem = "jobs", "Job worker received shutdown signal");
                        break;
                    }
                    _ = wake => {}
                    _ = sleep(poll_interval) => {}
                }
            } else {
                debug!(subsystem = "jobs", claimed, "Processing concurrent job batch");
                while let Some(result) = tasks.join_next().await {
                    if let Err(e) = result {
                        error!(subsystem = "jobs", error = ?e, "Job task panicked");
                    }
                }
            }
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!(subsystem = "jobs", component = "worker", "Job worker stopped");
    }

    /// Release orphaned claims and settle the jobs that ran out of attempts.
    async fn reclaim_stale(&self, stale_after: Duration) {
        let abandoned = match self.jobs.reclaim_stale(stale_after).await {
            Ok(jobs) => jobs,
            Err(e) => {
                error!(subsystem = "jobs", error = %e, "Failed to reclaim stale jobs");
                return;
            }
        };

        for job in abandoned {
            let handler = {
                let handlers = self.handlers.read().await;
                handlers.get(&job.job_type).cloned()
            };
            if let Some(handler) = handler {
                handler.on_abandoned(&job).await;
            }
            let error = job.error_message.clone().unwrap_or_default();
            warn!(
                subsystem = "jobs",
                component = "worker",
                job_id = %job.id,
                job_type = ?job.job_type,
                attempts = job.attempts,
                "Abandoned job failed after its claim expired"
            );
            let _ = self.event_tx.send(WorkerEvent::JobFailed {
                job_id: job.id,
                job_type: job.job_type,
                error,
            });
        }
    }

    /// Claim the next runnable job without processing it.
    async fn claim_job(&self) -> Option<Job> {
        let job_types: Vec<JobType> = {
            let handlers = self.handlers.read().await;
            handlers.keys().copied().collect()
        };
        if job_types.is_empty() {
            return None;
        }

        match self.jobs.claim_next_for_types(&job_types).await {
            Ok(job) => job,
            Err(e) => {
                error!(subsystem = "jobs", error = %e, "Failed to claim job");
                None
            }
        }
    }

    fn clone_refs(&self) -> JobWorkerRef {
        JobWorkerRef {
            jobs: self.jobs.clone(),
            handlers: self.handlers.clone(),
            event_tx: self.event_tx.clone(),
        }
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    pub async fn pending_count(&self) -> Result<i64> {
        self.jobs.pending_count().await
    }
}

/// Reference bundle for executing a single job in a spawned task.
struct JobWorkerRef {
    jobs: Arc<dyn JobRepository>,
    handlers: HandlerMap,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl JobWorkerRef {
    async fn execute_job(self, job: Job) {
        let start = Instant::now();
        let job_id = job.id;
        let job_type = job.job_type;
        let attempt = job.attempts;
        let final_attempt = job.is_final_attempt();

        info!(
            subsystem = "jobs",
            component = "worker",
            job_id = %job_id,
            ?job_type,
            attempt,
            max_attempts = job.max_attempts,
            "Processing job"
        );
        let _ = self.event_tx.send(WorkerEvent::JobStarted {
            job_id,
            job_type,
            attempt,
        });

        let handler = {
            let handlers = self.handlers.read().await;
            handlers.get(&job_type).cloned()
        };

        let result = match handler {
            Some(handler) => handler.execute(JobContext::new(job)).await,
            None => {
                warn!(?job_type, "No handler registered for job type");
                JobResult::Failed(format!("No handler for job type: {}", job_type.as_str()))
            }
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            JobResult::Success(result_data) => {
                if let Err(e) = self.jobs.complete(job_id, result_data).await {
                    error!(error = %e, job_id = %job_id, "Failed to mark job as completed");
                } else {
                    info!(
                        subsystem = "jobs",
                        job_id = %job_id,
                        ?job_type,
                        duration_ms,
                        "Job completed successfully"
                    );
                    let _ = self
                        .event_tx
                        .send(WorkerEvent::JobCompleted { job_id, job_type });
                }
            }
            JobResult::Failed(error) => self.record_failure(job_id, job_type, error).await,
            JobResult::Retry(error) if final_attempt => {
                self.record_failure(job_id, job_type, error).await
            }
            JobResult::Retry(error) => {
                if let Err(e) = self.jobs.fail(job_id, &error, true).await {
                    error!(error = %e, job_id = %job_id, "Failed to reschedule job");
                } else {
                    warn!(
                        subsystem = "jobs",
                        job_id = %job_id,
                        ?job_type,
                        attempt,
                        %error,
                        duration_ms,
                        "Job attempt failed, retry scheduled"
                    );
                    let _ = self.event_tx.send(WorkerEvent::RetryScheduled {
                        job_id,
                        job_type,
                        attempt,
                        error,
                    });
                }
            }
        }
    }

    async fn record_failure(&self, job_id: Uuid, job_type: JobType, error: String) {
        if let Err(e) = self.jobs.fail(job_id, &error, false).await {
            error!(error = %e, job_id = %job_id, "Failed to mark job as failed");
            return;
        }
        warn!(
            subsystem = "jobs",
            job_id = %job_id,
            ?job_type,
            %error,
            "Job failed"
        );
        let _ = self.event_tx.send(WorkerEvent::JobFailed {
            job_id,
            job_type,
            error,
        });
    }
}

/// Builder for creating a job worker with handlers.
pub struct WorkerBuilder {
    jobs: Arc<dyn JobRepository>,
    config: WorkerConfig,
    handlers: Vec<Box<dyn JobHandler>>,
    notify: Option<Arc<Notify>>,
}

impl WorkerBuilder {
    pub fn new(jobs: Arc<dyn JobRepository>) -> Self {
        Self {
            jobs,
            config: WorkerConfig::default(),
            handlers: Vec::new(),
            notify: None,
        }
    }

    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_handler<H: JobHandler + 'static>(mut self, handler: H) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    pub fn with_notify(mut self, notify: Arc<Notify>) -> Self {
        self.notify = Some(notify);
        self
    }

    /// Build and return the worker.
    pub async fn build(self) -> JobWorker {
        let mut worker = JobWorker::new(self.jobs, self.config);
        if let Some(notify) = self.notify {
            worker = worker.with_notify(notify);
        }

        {
            let mut handlers = worker.handlers.write().await;
            for handler in self.handlers {
                handlers.insert(handler.job_type(), Arc::from(handler));
            }
        }

        worker
    }
}
