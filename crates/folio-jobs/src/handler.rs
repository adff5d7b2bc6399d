//! Job handler framework.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use folio_core::{Job, JobType};

/// Context provided to job handlers.
pub struct JobContext {
    /// The claimed job; `attempts` already counts the attempt in flight.
    pub job: Job,
}

impl JobContext {
    pub fn new(job: Job) -> Self {
        Self { job }
    }

    /// The material this job refers to, if any.
    pub fn material_id(&self) -> Option<Uuid> {
        self.job.material_id
    }

    pub fn payload(&self) -> Option<&JsonValue> {
        self.job.payload.as_ref()
    }

    /// 1-based number of the attempt in flight.
    pub fn attempt(&self) -> i32 {
        self.job.attempts
    }

    pub fn is_final_attempt(&self) -> bool {
        self.job.is_final_attempt()
    }
}

/// Result of job execution.
#[derive(Debug, Clone, PartialEq)]
pub enum JobResult {
    /// Job completed successfully with optional result data.
    Success(Option<JsonValue>),
    /// Job failed permanently; the queue will not re-attempt it.
    Failed(String),
    /// Attempt failed transiently; the queue re-attempts after backoff
    /// while attempts remain.
    Retry(String),
}

/// Trait for job handlers.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The job type this handler processes.
    fn job_type(&self) -> JobType;

    /// Execute one attempt of the job.
    async fn execute(&self, ctx: JobContext) -> JobResult;

    fn can_handle(&self, job_type: JobType) -> bool {
        self.job_type() == job_type
    }

    /// Called when the queue gives up on a job whose worker stopped
    /// mid-attempt. `job` is already `failed`.
    async fn on_abandoned(&self, _job: &Job) {}
}
