//! In-memory collaborators for tests that run without PostgreSQL.
//!
//! Each type mirrors the semantics of its PostgreSQL counterpart: the
//! ledger enforces the same transition table under a single write lock, and
//! the job queue applies the same claim ordering, attempt counting, and
//! backoff rules.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use tokio::sync::{Notify, RwLock};
use uuid::Uuid;

use folio_core::{
    new_v7, EnqueueOptions, Error, Job, JobRepository, JobStatus, JobType, MaterialLedger,
    MaterialSummary, NewSourceMaterial, ObjectStorage, ProjectDirectory, Result, SourceMaterial,
    StarredMessage, StarredMessageSource, Transition, STALE_CLAIM_ERROR,
};

use crate::file_storage::storage_key;

// =============================================================================
// LEDGER
// =============================================================================

/// Material ledger held in a map behind one lock.
#[derive(Default)]
pub struct MemoryMaterialLedger {
    materials: RwLock<HashMap<Uuid, SourceMaterial>>,
}

impl MemoryMaterialLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully specified record, bypassing `create`.
    pub async fn insert(&self, material: SourceMaterial) {
        self.materials.write().await.insert(material.id, material);
    }

    pub async fn len(&self) -> usize {
        self.materials.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.materials.read().await.is_empty()
    }

    fn sorted(mut materials: Vec<SourceMaterial>) -> Vec<SourceMaterial> {
        materials.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        materials
    }
}

#[async_trait]
impl MaterialLedger for MemoryMaterialLedger {
    async fn create(&self, material: NewSourceMaterial) -> Result<SourceMaterial> {
        let mut materials = self.materials.write().await;
        if materials.contains_key(&material.id) {
            return Err(Error::Conflict(format!("material {} exists", material.id)));
        }
        let record = SourceMaterial::from_new(material, Utc::now());
        materials.insert(record.id, record.clone());
        Ok(record)
    }

    async fn transition(&self, id: Uuid, transition: Transition) -> Result<SourceMaterial> {
        let mut materials = self.materials.write().await;
        let material = materials
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("material {id}")))?;
        material.apply(&transition, Utc::now())?;
        Ok(material.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Option<SourceMaterial>> {
        Ok(self.materials.read().await.get(&id).cloned())
    }

    async fn list_by_project(&self, project_id: Uuid) -> Result<Vec<MaterialSummary>> {
        let materials = self.materials.read().await;
        let matching = materials
            .values()
            .filter(|m| m.project_id == project_id)
            .cloned()
            .collect();
        Ok(Self::sorted(matching)
            .iter()
            .map(MaterialSummary::from)
            .collect())
    }

    async fn list_completed(
        &self,
        project_id: Uuid,
        active_only: bool,
    ) -> Result<Vec<SourceMaterial>> {
        let materials = self.materials.read().await;
        let matching = materials
            .values()
            .filter(|m| {
                m.project_id == project_id && (m.is_active || !active_only) && m.is_available()
            })
            .cloned()
            .collect();
        Ok(Self::sorted(matching))
    }

    async fn set_activation(&self, id: Uuid, is_active: bool) -> Result<SourceMaterial> {
        let mut materials = self.materials.write().await;
        let material = materials
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("material {id}")))?;
        material.is_active = is_active;
        material.updated_at = Utc::now();
        Ok(material.clone())
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        Ok(self.materials.write().await.remove(&id).is_some())
    }
}

// =============================================================================
// OBJECT STORAGE
// =============================================================================

/// Object store held in a map, with switchable read failures.
#[derive(Default)]
pub struct MemoryObjectStorage {
    objects: RwLock<HashMap<String, Vec<u8>>>,
    fail_reads: AtomicBool,
}

impl MemoryObjectStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `read` fail with a storage error.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub async fn contains(&self, reference: &str) -> bool {
        self.objects.read().await.contains_key(reference)
    }
}

#[async_trait]
impl ObjectStorage for MemoryObjectStorage {
    async fn issue_write_location(
        &self,
        owner_id: Uuid,
        material_id: Uuid,
        filename: &str,
    ) -> Result<String> {
        Ok(storage_key(owner_id, material_id, filename))
    }

    async fn write(&self, reference: &str, data: &[u8]) -> Result<()> {
        self.objects
            .write()
            .await
            .insert(reference.to_string(), data.to_vec());
        Ok(())
    }

    async fn read(&self, reference: &str) -> Result<Vec<u8>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::Storage(format!("read failed for {reference}")));
        }
        self.objects
            .read()
            .await
            .get(reference)
            .cloned()
            .ok_or_else(|| Error::Storage(format!("object not found: {reference}")))
    }

    async fn delete(&self, reference: &str) -> Result<()> {
        self.objects.write().await.remove(reference);
        Ok(())
    }
}

// =============================================================================
// PROJECTS
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct ProjectRecord {
    owner_id: Uuid,
    manuscript_words: u64,
    outline_words: u64,
}

/// Project directory held in a map.
#[derive(Default)]
pub struct MemoryProjectDirectory {
    projects: RwLock<HashMap<Uuid, ProjectRecord>>,
}

impl MemoryProjectDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_project(&self, project_id: Uuid, owner_id: Uuid) {
        self.projects.write().await.insert(
            project_id,
            ProjectRecord {
                owner_id,
                manuscript_words: 0,
                outline_words: 0,
            },
        );
    }

    pub async fn set_word_counts(&self, project_id: Uuid, manuscript: u64, outline: u64) {
        if let Some(record) = self.projects.write().await.get_mut(&project_id) {
            record.manuscript_words = manuscript;
            record.outline_words = outline;
        }
    }
}

#[async_trait]
impl ProjectDirectory for MemoryProjectDirectory {
    async fn project_owner(&self, project_id: Uuid) -> Result<Option<Uuid>> {
        Ok(self
            .projects
            .read()
            .await
            .get(&project_id)
            .map(|p| p.owner_id))
    }

    async fn manuscript_word_count(&self, project_id: Uuid) -> Result<u64> {
        Ok(self
            .projects
            .read()
            .await
            .get(&project_id)
            .map(|p| p.manuscript_words)
            .unwrap_or(0))
    }

    async fn outline_word_count(&self, project_id: Uuid) -> Result<u64> {
        Ok(self
            .projects
            .read()
            .await
            .get(&project_id)
            .map(|p| p.outline_words)
            .unwrap_or(0))
    }
}

/// Starred messages held in a list.
#[derive(Default)]
pub struct MemoryStarredMessages {
    messages: RwLock<Vec<(Uuid, StarredMessage)>>,
}

impl MemoryStarredMessages {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn star(&self, project_id: Uuid, message: StarredMessage) {
        self.messages.write().await.push((project_id, message));
    }
}

#[async_trait]
impl StarredMessageSource for MemoryStarredMessages {
    async fn recent_starred(
        &self,
        project_id: Uuid,
        session_id: Uuid,
        limit: usize,
    ) -> Result<Vec<StarredMessage>> {
        let messages = self.messages.read().await;
        let mut matching: Vec<StarredMessage> = messages
            .iter()
            .filter(|(p, m)| *p == project_id && m.session_id == session_id)
            .map(|(_, m)| m.clone())
            .collect();
        matching.sort_by(|a, b| b.starred_at.cmp(&a.starred_at).then(b.id.cmp(&a.id)));
        matching.truncate(limit);
        Ok(matching)
    }
}

// =============================================================================
// JOB QUEUE
// =============================================================================

/// Job queue held in a map.
pub struct MemoryJobRepository {
    jobs: RwLock<HashMap<Uuid, Job>>,
    notify: Arc<Notify>,
    available: AtomicBool,
}

impl Default for MemoryJobRepository {
    fn default() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            notify: Arc::new(Notify::new()),
            available: AtomicBool::new(true),
        }
    }
}

impl MemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `probe` fail, simulating a deployment without the queue schema.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn job_notify(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    pub async fn all(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        jobs
    }

    /// Make every pending job runnable now, skipping backoff delays.
    pub async fn release_delayed(&self) {
        let now = Utc::now();
        for job in self.jobs.write().await.values_mut() {
            if job.status == JobStatus::Pending {
                job.run_after = now;
            }
        }
    }

    fn new_job(
        material_id: Option<Uuid>,
        job_type: JobType,
        payload: Option<JsonValue>,
        options: EnqueueOptions,
    ) -> Job {
        let now = Utc::now();
        Job {
            id: new_v7(),
            material_id,
            job_type,
            status: JobStatus::Pending,
            payload,
            result: None,
            error_message: None,
            attempts: 0,
            max_attempts: options.max_attempts,
            backoff_base_ms: options.backoff_base_ms as i64,
            run_after: now,
            created_at: now,
            started_at: None,
            completed_at: None,
        }
    }
}

#[async_trait]
impl JobRepository for MemoryJobRepository {
    async fn enqueue(
        &self,
        material_id: Option<Uuid>,
        job_type: JobType,
        payload: Option<JsonValue>,
        options: EnqueueOptions,
    ) -> Result<Uuid> {
        let job = Self::new_job(material_id, job_type, payload, options);
        let id = job.id;
        self.jobs.write().await.insert(id, job);
        self.notify.notify_waiters();
        Ok(id)
    }

    async fn enqueue_deduplicated(
        &self,
        material_id: Uuid,
        job_type: JobType,
        payload: Option<JsonValue>,
        options: EnqueueOptions,
    ) -> Result<Option<Uuid>> {
        let mut jobs = self.jobs.write().await;
        let duplicate = jobs.values().any(|j| {
            j.material_id == Some(material_id)
                && j.job_type == job_type
                && matches!(j.status, JobStatus::Pending | JobStatus::Running)
        });
        if duplicate {
            return Ok(None);
        }
        let job = Self::new_job(Some(material_id), job_type, payload, options);
        let id = job.id;
        jobs.insert(id, job);
        drop(jobs);
        self.notify.notify_waiters();
        Ok(Some(id))
    }

    async fn claim_next_for_types(&self, job_types: &[JobType]) -> Result<Option<Job>> {
        let now = Utc::now();
        let mut jobs = self.jobs.write().await;
        let next = jobs
            .values()
            .filter(|j| {
                j.status == JobStatus::Pending
                    && j.run_after <= now
                    && (job_types.is_empty() || job_types.contains(&j.job_type))
            })
            .min_by(|a, b| {
                a.run_after
                    .cmp(&b.run_after)
                    .then(a.created_at.cmp(&b.created_at))
                    .then(a.id.cmp(&b.id))
            })
            .map(|j| j.id);

        Ok(next.and_then(|id| {
            jobs.get_mut(&id).map(|job| {
                job.status = JobStatus::Running;
                job.started_at = Some(now);
                job.attempts += 1;
                job.clone()
            })
        }))
    }

    async fn complete(&self, job_id: Uuid, result: Option<JsonValue>) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(&job_id)
            .ok_or_else(|| Error::NotFound(format!("job {job_id}")))?;
        job.status = JobStatus::Completed;
        job.completed_at = Some(Utc::now());
        job.result = result;
        Ok(())
    }

    async fn fail(&self, job_id: Uuid, error: &str, retryable: bool) -> Result<()> {
        let now = Utc::now();
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(&job_id)
            .ok_or_else(|| Error::NotFound(format!("job {job_id}")))?;
        job.error_message = Some(error.to_string());
        if retryable && !job.is_final_attempt() {
            let delay = chrono::Duration::from_std(job.backoff_delay())
                .map_err(|e| Error::Internal(e.to_string()))?;
            job.status = JobStatus::Pending;
            job.started_at = None;
            job.run_after = now + delay;
        } else {
            job.status = JobStatus::Failed;
            job.completed_at = Some(now);
        }
        Ok(())
    }

    async fn reclaim_stale(&self, stale_after: std::time::Duration) -> Result<Vec<Job>> {
        let now = Utc::now();
        let cutoff = now
            - chrono::Duration::from_std(stale_after).map_err(|e| Error::Internal(e.to_string()))?;
        let mut abandoned = Vec::new();
        let mut requeued = false;

        let mut jobs = self.jobs.write().await;
        for job in jobs.values_mut() {
            let stale = job.status == JobStatus::Running
                && job.started_at.is_some_and(|started| started < cutoff);
            if !stale {
                continue;
            }
            job.error_message = Some(STALE_CLAIM_ERROR.to_string());
            if job.is_final_attempt() {
                job.status = JobStatus::Failed;
                job.completed_at = Some(now);
                abandoned.push(job.clone());
            } else {
                job.status = JobStatus::Pending;
                job.started_at = None;
                job.run_after = now;
                requeued = true;
            }
        }
        drop(jobs);

        if requeued {
            self.notify.notify_waiters();
        }
        Ok(abandoned)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        Ok(self.jobs.read().await.get(&job_id).cloned())
    }

    async fn pending_count(&self) -> Result<i64> {
        Ok(self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .count() as i64)
    }

    async fn probe(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Job("job queue unavailable".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::{ExtractedContent, MaterialFormat, MaterialStatus};
    use serde_json::json;

    fn new_material(project_id: Uuid) -> NewSourceMaterial {
        let id = new_v7();
        NewSourceMaterial {
            id,
            project_id,
            owner_id: Uuid::new_v4(),
            title: "Research".to_string(),
            original_filename: "research.txt".to_string(),
            format: MaterialFormat::PlainText,
            mime_type: "text/plain".to_string(),
            size_bytes: 10,
            storage_key: format!("uploads/x/{id}/research.txt"),
        }
    }

    fn content(text: &str) -> ExtractedContent {
        ExtractedContent {
            text: text.to_string(),
            word_count: text.split_whitespace().count() as i64,
            page_count: None,
            author: None,
            metadata: json!({}),
        }
    }

    #[tokio::test]
    async fn test_ledger_lifecycle() {
        let ledger = MemoryMaterialLedger::new();
        let project = Uuid::new_v4();
        let created = ledger.create(new_material(project)).await.unwrap();
        assert_eq!(created.status, MaterialStatus::Pending);

        ledger
            .transition(created.id, Transition::StartProcessing)
            .await
            .unwrap();
        let done = ledger
            .transition(created.id, Transition::Complete(content("a b c")))
            .await
            .unwrap();
        assert_eq!(done.status, MaterialStatus::Completed);
        assert_eq!(ledger.list_completed(project, true).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_ledger_rejects_double_start() {
        let ledger = MemoryMaterialLedger::new();
        let created = ledger.create(new_material(Uuid::new_v4())).await.unwrap();
        ledger
            .transition(created.id, Transition::StartProcessing)
            .await
            .unwrap();
        let err = ledger
            .transition(created.id, Transition::StartProcessing)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTransition {
                from: MaterialStatus::Processing,
                to: MaterialStatus::Processing
            }
        ));
    }

    #[tokio::test]
    async fn test_ledger_unknown_id() {
        let ledger = MemoryMaterialLedger::new();
        let err = ledger
            .transition(Uuid::new_v4(), Transition::StartProcessing)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(matches!(
            ledger.set_activation(Uuid::new_v4(), false).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_completed_excludes_inactive() {
        let ledger = MemoryMaterialLedger::new();
        let project = Uuid::new_v4();
        let m = ledger.create(new_material(project)).await.unwrap();
        ledger.transition(m.id, Transition::StartProcessing).await.unwrap();
        ledger
            .transition(m.id, Transition::Complete(content("x")))
            .await
            .unwrap();
        ledger.set_activation(m.id, false).await.unwrap();
        assert!(ledger.list_completed(project, true).await.unwrap().is_empty());
        assert_eq!(ledger.list_completed(project, false).await.unwrap().len(), 1);
        assert_eq!(ledger.list_by_project(project).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_job_dedup_and_claim() {
        let repo = MemoryJobRepository::new();
        let material = Uuid::new_v4();
        let first = repo
            .enqueue_deduplicated(material, JobType::Extraction, None, EnqueueOptions::default())
            .await
            .unwrap();
        let second = repo
            .enqueue_deduplicated(material, JobType::Extraction, None, EnqueueOptions::default())
            .await
            .unwrap();
        assert!(first.is_some());
        assert!(second.is_none());

        let job = repo.claim_next_for_types(&[]).await.unwrap().unwrap();
        assert_eq!(job.attempts, 1);
        assert_eq!(job.status, JobStatus::Running);
        assert!(repo.claim_next_for_types(&[]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_job_retry_then_final_failure() {
        let repo = MemoryJobRepository::new();
        let options = EnqueueOptions {
            max_attempts: 2,
            backoff_base_ms: 0,
        };
        let id = repo
            .enqueue(None, JobType::Extraction, None, options)
            .await
            .unwrap();

        repo.claim_next_for_types(&[]).await.unwrap().unwrap();
        repo.fail(id, "io", true).await.unwrap();
        assert_eq!(repo.get(id).await.unwrap().unwrap().status, JobStatus::Pending);

        repo.claim_next_for_types(&[]).await.unwrap().unwrap();
        repo.fail(id, "io", true).await.unwrap();
        let job = repo.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 2);
    }

    #[tokio::test]
    async fn test_job_backoff_delays_claim() {
        let repo = MemoryJobRepository::new();
        let id = repo
            .enqueue(None, JobType::Extraction, None, EnqueueOptions::default())
            .await
            .unwrap();
        repo.claim_next_for_types(&[]).await.unwrap().unwrap();
        repo.fail(id, "io", true).await.unwrap();

        assert!(repo.claim_next_for_types(&[]).await.unwrap().is_none());
        repo.release_delayed().await;
        assert!(repo.claim_next_for_types(&[]).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_permanent_failure_skips_retry() {
        let repo = MemoryJobRepository::new();
        let id = repo
            .enqueue(None, JobType::Extraction, None, EnqueueOptions::default())
            .await
            .unwrap();
        repo.claim_next_for_types(&[]).await.unwrap().unwrap();
        repo.fail(id, "unsupported", false).await.unwrap();
        assert_eq!(repo.get(id).await.unwrap().unwrap().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_reclaim_stale_requeues_or_abandons() {
        let repo = MemoryJobRepository::new();
        let opts = |max_attempts| EnqueueOptions {
            max_attempts,
            backoff_base_ms: 0,
        };
        let retryable = repo
            .enqueue(Some(Uuid::new_v4()), JobType::Extraction, None, opts(3))
            .await
            .unwrap();
        repo.claim_next_for_types(&[]).await.unwrap().unwrap();
        let exhausted = repo
            .enqueue(Some(Uuid::new_v4()), JobType::Extraction, None, opts(1))
            .await
            .unwrap();
        repo.claim_next_for_types(&[]).await.unwrap().unwrap();

        let fresh = repo
            .reclaim_stale(std::time::Duration::from_secs(60))
            .await
            .unwrap();
        assert!(fresh.is_empty());

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let abandoned = repo
            .reclaim_stale(std::time::Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(abandoned.len(), 1);
        assert_eq!(abandoned[0].id, exhausted);

        let job = repo.get(retryable).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.error_message.as_deref(), Some(STALE_CLAIM_ERROR));
        let job = repo.get(exhausted).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);

        let reclaimed = repo.claim_next_for_types(&[]).await.unwrap().unwrap();
        assert_eq!(reclaimed.id, retryable);
        assert_eq!(reclaimed.attempts, 2);
    }

    #[tokio::test]
    async fn test_starred_most_recent_first() {
        let source = MemoryStarredMessages::new();
        let project = Uuid::new_v4();
        let session = Uuid::new_v4();
        let base = Utc::now();
        for i in 0..7 {
            source
                .star(
                    project,
                    StarredMessage {
                        id: Uuid::new_v4(),
                        session_id: session,
                        role: "assistant".to_string(),
                        content: format!("turn {i}"),
                        starred_at: base + chrono::Duration::seconds(i),
                    },
                )
                .await;
        }
        let recent = source.recent_starred(project, session, 5).await.unwrap();
        assert_eq!(recent.len(), 5);
        assert_eq!(recent[0].content, "turn 6");
        assert_eq!(recent[4].content, "turn 2");
    }
}
