//! ExtractionHandler: runs one queued extraction attempt through the pipeline.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{error, warn};
use uuid::Uuid;

use folio_core::{defaults, Error, Job, JobType, MaterialLedger, MaterialStatus, Transition};

use crate::handler::{JobContext, JobHandler, JobResult};
use crate::pipeline::{Attempt, AttemptOutcome, ExtractionPipeline};

pub struct ExtractionHandler {
    pipeline: ExtractionPipeline,
    timeout: Duration,
}

impl ExtractionHandler {
    pub fn new(pipeline: ExtractionPipeline) -> Self {
        Self {
            pipeline,
            timeout: Duration::from_secs(defaults::JOB_TIMEOUT_SECS),
        }
    }

    /// Bound each attempt to `timeout`; an attempt that exceeds it is retried.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Material id from the job row, falling back to the payload.
    fn material_id(job: &Job) -> Option<Uuid> {
        job.material_id.or_else(|| {
            job.payload
                .as_ref()?
                .get("material_id")?
                .as_str()
                .and_then(|s| s.parse().ok())
        })
    }
}

#[async_trait]
impl JobHandler for ExtractionHandler {
    fn job_type(&self) -> JobType {
        JobType::Extraction
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        let Some(material_id) = Self::material_id(&ctx.job) else {
            return JobResult::Failed("Extraction job has no material id".into());
        };
        let attempt = Attempt::queued(ctx.attempt(), ctx.job.max_attempts, self.timeout);

        match self.pipeline.run(material_id, attempt).await {
            Ok(AttemptOutcome::Completed(material)) => JobResult::Success(Some(json!({
                "material_id": material.id,
                "word_count": material.word_count,
                "page_count": material.page_count,
            }))),
            Ok(AttemptOutcome::Failed(material)) => JobResult::Failed(
                material
                    .error_message
                    .unwrap_or_else(|| "extraction failed".to_string()),
            ),
            Ok(AttemptOutcome::Retry { error }) => JobResult::Retry(error),
            Err(e @ (Error::NotFound(_) | Error::Conflict(_) | Error::InvalidTransition { .. })) => {
                // Deleted, or already handled by a concurrent attempt.
                warn!(
                    subsystem = "jobs",
                    component = "extraction_handler",
                    job_id = %ctx.job.id,
                    material_id = %material_id,
                    error = %e,
                    "Extraction job skipped"
                );
                JobResult::Failed(e.to_string())
            }
            Err(e) => {
                error!(
                    subsystem = "jobs",
                    component = "extraction_handler",
                    job_id = %ctx.job.id,
                    material_id = %material_id,
                    error = %e,
                    "Could not record extraction outcome"
                );
                if e.is_retryable() && !ctx.is_final_attempt() {
                    return JobResult::Retry(e.to_string());
                }
                self.abandon(material_id, &e).await;
                JobResult::Failed(e.to_string())
            }
        }
    }

    async fn on_abandoned(&self, job: &Job) {
        let Some(material_id) = Self::material_id(job) else {
            return;
        };
        let cause = Error::Job(
            job.error_message
                .clone()
                .unwrap_or_else(|| "extraction abandoned".to_string()),
        );
        self.abandon(material_id, &cause).await;
    }
}

impl ExtractionHandler {
    /// Best-effort `failed` for a material the last attempt left in
    /// `processing`, so the owner can re-trigger it.
    async fn abandon(&self, material_id: Uuid, cause: &Error) {
        let ledger = self.pipeline.ledger();
        match ledger.get(material_id).await {
            Ok(Some(material)) if material.status == MaterialStatus::Processing => {
                let fail = Transition::Fail {
                    error: cause.to_string(),
                };
                if let Err(e) = ledger.transition(material_id, fail).await {
                    warn!(
                        subsystem = "jobs",
                        component = "extraction_handler",
                        material_id = %material_id,
                        error = %e,
                        "Could not mark abandoned material failed"
                    );
                }
            }
            _ => {}
        }
    }
}
