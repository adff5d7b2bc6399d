//! Startup wiring: pick the extraction dispatch strategy once.

use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{info, warn};

use folio_core::JobRepository;
use folio_jobs::{
    ExtractionDispatcher, ExtractionHandler, ExtractionPipeline, InlineDispatcher,
    QueueDispatcher, WorkerBuilder, WorkerConfig, WorkerHandle,
};

use crate::config::ServerConfig;

/// The chosen dispatcher and, in queue mode, the local worker.
pub struct DispatchSetup {
    pub dispatcher: Arc<dyn ExtractionDispatcher>,
    pub worker: Option<WorkerHandle>,
}

/// Probe the durable queue and choose a dispatcher.
///
/// Queue mode needs `JOB_QUEUE_ENABLED` and a successful probe; anything
/// else falls back to inline extraction. In queue mode a worker is started
/// here unless `worker_config.enabled` is false, in which case another
/// process is expected to drain the queue.
pub async fn select_dispatcher(
    config: &ServerConfig,
    worker_config: WorkerConfig,
    jobs: Arc<dyn JobRepository>,
    job_notify: Option<Arc<Notify>>,
    pipeline: ExtractionPipeline,
) -> DispatchSetup {
    if !config.job_queue_enabled {
        info!(
            subsystem = "api",
            component = "bootstrap",
            "Job queue disabled by configuration, extracting inline"
        );
        return inline(pipeline);
    }

    if let Err(e) = jobs.probe().await {
        warn!(
            subsystem = "api",
            component = "bootstrap",
            error = %e,
            "Job queue probe failed, falling back to inline extraction"
        );
        return inline(pipeline);
    }

    let worker = if worker_config.enabled {
        let handler = ExtractionHandler::new(pipeline).with_timeout(config.job_timeout());
        let mut builder = WorkerBuilder::new(jobs.clone())
            .with_config(worker_config)
            .with_handler(handler);
        if let Some(notify) = job_notify {
            builder = builder.with_notify(notify);
        }
        let handle = builder.build().await.start();
        info!(subsystem = "api", component = "bootstrap", "Job worker started");
        Some(handle)
    } else {
        info!(
            subsystem = "api",
            component = "bootstrap",
            "Job worker disabled; queued jobs wait for an external worker"
        );
        None
    };

    info!(
        subsystem = "api",
        component = "bootstrap",
        dispatch_mode = "queue",
        max_attempts = config.job_max_attempts,
        backoff_base_ms = config.job_backoff_base_ms,
        "Extraction dispatcher selected"
    );
    DispatchSetup {
        dispatcher: Arc::new(QueueDispatcher::new(jobs, config.enqueue_options())),
        worker,
    }
}

fn inline(pipeline: ExtractionPipeline) -> DispatchSetup {
    info!(
        subsystem = "api",
        component = "bootstrap",
        dispatch_mode = "inline",
        "Extraction dispatcher selected"
    );
    DispatchSetup {
        dispatcher: Arc::new(InlineDispatcher::new(pipeline)),
        worker: None,
    }
}
