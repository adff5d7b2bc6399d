//! Job repository implementation.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::{postgres::PgRow, Pool, Postgres, Row};
use tokio::sync::Notify;
use tracing::{debug, warn};
use uuid::Uuid;

use folio_core::{
    new_v7, EnqueueOptions, Error, Job, JobRepository, JobType, Result, STALE_CLAIM_ERROR,
};

const JOB_COLUMNS: &str = "id, material_id, job_type, status, payload, result, error_message, \
     attempts, max_attempts, backoff_base_ms, run_after, created_at, started_at, completed_at";

/// PostgreSQL implementation of JobRepository.
#[derive(Clone)]
pub struct PgJobRepository {
    pool: Pool<Postgres>,
    /// Woken whenever a job becomes runnable so idle workers skip their poll sleep.
    notify: Arc<Notify>,
}

impl PgJobRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            notify: Arc::new(Notify::new()),
        }
    }

    /// Create a repository sharing an existing notify handle.
    pub fn with_notify(pool: Pool<Postgres>, notify: Arc<Notify>) -> Self {
        Self { pool, notify }
    }

    /// Notification handle for event-driven worker waking.
    pub fn job_notify(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    fn parse_job_row(row: &PgRow) -> Result<Job> {
        let job_type: String = row.get("job_type");
        let status: String = row.get("status");
        Ok(Job {
            id: row.get("id"),
            material_id: row.get("material_id"),
            job_type: job_type.parse()?,
            status: status.parse()?,
            payload: row.get("payload"),
            result: row.get("result"),
            error_message: row.get("error_message"),
            attempts: row.get("attempts"),
            max_attempts: row.get("max_attempts"),
            backoff_base_ms: row.get("backoff_base_ms"),
            run_after: row.get("run_after"),
            created_at: row.get("created_at"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
        })
    }
}

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn enqueue(
        &self,
        material_id: Option<Uuid>,
        job_type: JobType,
        payload: Option<JsonValue>,
        options: EnqueueOptions,
    ) -> Result<Uuid> {
        let job_id = new_v7();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO job_queue
                 (id, material_id, job_type, status, payload, max_attempts, backoff_base_ms,
                  run_after, created_at)
             VALUES ($1, $2, $3, 'pending', $4, $5, $6, $7, $7)",
        )
        .bind(job_id)
        .bind(material_id)
        .bind(job_type.as_str())
        .bind(&payload)
        .bind(options.max_attempts)
        .bind(options.backoff_base_ms as i64)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        self.notify.notify_waiters();
        Ok(job_id)
    }

    async fn enqueue_deduplicated(
        &self,
        material_id: Uuid,
        job_type: JobType,
        payload: Option<JsonValue>,
        options: EnqueueOptions,
    ) -> Result<Option<Uuid>> {
        let job_id = new_v7();
        let now = Utc::now();

        // idx_job_queue_material_active allows one pending or running job per
        // material and type; a concurrent duplicate hits the conflict arm.
        let inserted = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO job_queue
                 (id, material_id, job_type, status, payload, max_attempts, backoff_base_ms,
                  run_after, created_at)
             VALUES ($1, $2, $3, 'pending', $4, $5, $6, $7, $7)
             ON CONFLICT (material_id, job_type) WHERE status IN ('pending', 'running')
             DO NOTHING
             RETURNING id",
        )
        .bind(job_id)
        .bind(material_id)
        .bind(job_type.as_str())
        .bind(&payload)
        .bind(options.max_attempts)
        .bind(options.backoff_base_ms as i64)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        if inserted.is_some() {
            self.notify.notify_waiters();
        } else {
            debug!(
                subsystem = "db",
                component = "job_queue",
                material_id = %material_id,
                "Job already queued for material, skipping"
            );
        }
        Ok(inserted)
    }

    async fn claim_next_for_types(&self, job_types: &[JobType]) -> Result<Option<Job>> {
        let now = Utc::now();
        let type_strings: Vec<String> = job_types
            .iter()
            .map(|jt| jt.as_str().to_string())
            .collect();

        // FOR UPDATE SKIP LOCKED lets several workers claim concurrently
        // without handing out the same row twice.
        let query = format!(
            "UPDATE job_queue
             SET status = 'running', started_at = $1, attempts = attempts + 1
             WHERE id = (
                 SELECT id FROM job_queue
                 WHERE status = 'pending'
                   AND run_after <= $1
                   AND (cardinality($2::text[]) = 0 OR job_type = ANY($2))
                 ORDER BY run_after ASC, created_at ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {JOB_COLUMNS}"
        );

        let row = sqlx::query(&query)
            .bind(now)
            .bind(&type_strings)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        row.as_ref().map(Self::parse_job_row).transpose()
    }

    async fn complete(&self, job_id: Uuid, result: Option<JsonValue>) -> Result<()> {
        sqlx::query(
            "UPDATE job_queue
             SET status = 'completed', completed_at = $1, result = $2
             WHERE id = $3",
        )
        .bind(Utc::now())
        .bind(&result)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn fail(&self, job_id: Uuid, error: &str, retryable: bool) -> Result<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let query = format!("SELECT {JOB_COLUMNS} FROM job_queue WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&query)
            .bind(job_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(Error::Database)?
            .ok_or_else(|| Error::NotFound(format!("job {job_id}")))?;
        let job = Self::parse_job_row(&row)?;

        if retryable && !job.is_final_attempt() {
            let delay = chrono::Duration::from_std(job.backoff_delay())
                .map_err(|e| Error::Internal(e.to_string()))?;
            sqlx::query(
                "UPDATE job_queue
                 SET status = 'pending', error_message = $1, started_at = NULL, run_after = $2
                 WHERE id = $3",
            )
            .bind(error)
            .bind(now + delay)
            .bind(job_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        } else {
            sqlx::query(
                "UPDATE job_queue
                 SET status = 'failed', completed_at = $1, error_message = $2
                 WHERE id = $3",
            )
            .bind(now)
            .bind(error)
            .bind(job_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }

    async fn reclaim_stale(&self, stale_after: std::time::Duration) -> Result<Vec<Job>> {
        let now = Utc::now();
        let cutoff = now
            - chrono::Duration::from_std(stale_after).map_err(|e| Error::Internal(e.to_string()))?;
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let requeued = sqlx::query(
            "UPDATE job_queue
             SET status = 'pending', started_at = NULL, run_after = $1, error_message = $2
             WHERE status = 'running' AND started_at < $3 AND attempts < max_attempts",
        )
        .bind(now)
        .bind(STALE_CLAIM_ERROR)
        .bind(cutoff)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?
        .rows_affected();

        let query = format!(
            "UPDATE job_queue
             SET status = 'failed', completed_at = $1, error_message = $2
             WHERE status = 'running' AND started_at < $3 AND attempts >= max_attempts
             RETURNING {JOB_COLUMNS}"
        );
        let rows = sqlx::query(&query)
            .bind(now)
            .bind(STALE_CLAIM_ERROR)
            .bind(cutoff)
            .fetch_all(&mut *tx)
            .await
            .map_err(Error::Database)?;
        let abandoned = rows
            .iter()
            .map(Self::parse_job_row)
            .collect::<Result<Vec<_>>>()?;

        tx.commit().await.map_err(Error::Database)?;

        if requeued > 0 || !abandoned.is_empty() {
            warn!(
                subsystem = "db",
                component = "job_queue",
                requeued,
                abandoned = abandoned.len(),
                "Released stale job claims"
            );
        }
        if requeued > 0 {
            self.notify.notify_waiters();
        }
        Ok(abandoned)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        let query = format!("SELECT {JOB_COLUMNS} FROM job_queue WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;
        row.as_ref().map(Self::parse_job_row).transpose()
    }

    async fn pending_count(&self) -> Result<i64> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM job_queue WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Database)?;
        Ok(count.0)
    }

    async fn probe(&self) -> Result<()> {
        sqlx::query("SELECT 1 FROM job_queue LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }
}
