//! Core traits for folio abstractions.
//!
//! These traits define the interfaces that concrete implementations
//! must satisfy, enabling pluggable backends and testability.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// MATERIAL LEDGER
// =============================================================================

/// Authoritative record of every uploaded material and its lifecycle state.
///
/// `transition` is the single mutation point for status and extraction
/// result fields. Implementations must apply it atomically: a concurrent
/// reader sees either the record before the transition or after it.
#[async_trait]
pub trait MaterialLedger: Send + Sync {
    /// Insert a new material in `pending` state.
    async fn create(&self, material: NewSourceMaterial) -> Result<SourceMaterial>;

    /// Apply a lifecycle transition.
    ///
    /// Returns `InvalidTransition` when the current status is not an allowed
    /// source for the transition's target, and `NotFound` for unknown ids.
    async fn transition(&self, id: Uuid, transition: Transition) -> Result<SourceMaterial>;

    /// Fetch one material including its extracted text.
    async fn get(&self, id: Uuid) -> Result<Option<SourceMaterial>>;

    /// List a project's materials without extracted text, oldest first.
    async fn list_by_project(&self, project_id: Uuid) -> Result<Vec<MaterialSummary>>;

    /// Completed materials with text, ordered by `created_at` then id.
    /// With `active_only`, deactivated materials are left out.
    async fn list_completed(
        &self,
        project_id: Uuid,
        active_only: bool,
    ) -> Result<Vec<SourceMaterial>>;

    /// Set the activation flag, returning the updated record.
    async fn set_activation(&self, id: Uuid, is_active: bool) -> Result<SourceMaterial>;

    /// Remove a material. Returns false if it did not exist.
    async fn delete(&self, id: Uuid) -> Result<bool>;
}

// =============================================================================
// OBJECT STORAGE
// =============================================================================

/// Byte store holding uploaded documents.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Reserve a writable reference for a material's upload.
    async fn issue_write_location(
        &self,
        owner_id: Uuid,
        material_id: Uuid,
        filename: &str,
    ) -> Result<String>;

    /// Write data at a previously issued reference.
    async fn write(&self, reference: &str, data: &[u8]) -> Result<()>;

    /// Read data at the specified reference.
    async fn read(&self, reference: &str) -> Result<Vec<u8>>;

    /// Delete data at the specified reference. Missing objects are not an error.
    async fn delete(&self, reference: &str) -> Result<()>;
}

// =============================================================================
// PROJECT COLLABORATORS
// =============================================================================

/// Read-only view of the project records owned by the rest of the product.
#[async_trait]
pub trait ProjectDirectory: Send + Sync {
    /// Owning user of a project, or `None` if the project is unknown.
    async fn project_owner(&self, project_id: Uuid) -> Result<Option<Uuid>>;

    /// Total words across the project's manuscript chapters.
    async fn manuscript_word_count(&self, project_id: Uuid) -> Result<u64>;

    /// Total words across the project's outline.
    async fn outline_word_count(&self, project_id: Uuid) -> Result<u64>;
}

/// Source of conversation turns the user starred.
#[async_trait]
pub trait StarredMessageSource: Send + Sync {
    /// Most recently starred turns for a session, newest first.
    async fn recent_starred(
        &self,
        project_id: Uuid,
        session_id: Uuid,
        limit: usize,
    ) -> Result<Vec<StarredMessage>>;
}

// =============================================================================
// JOB REPOSITORY TRAITS
// =============================================================================

/// Repository for job queue operations.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Queue a new job.
    async fn enqueue(
        &self,
        material_id: Option<Uuid>,
        job_type: JobType,
        payload: Option<JsonValue>,
        options: EnqueueOptions,
    ) -> Result<Uuid>;

    /// Queue a job unless one of the same type is already pending or running
    /// for the material. Returns `None` when deduplicated.
    async fn enqueue_deduplicated(
        &self,
        material_id: Uuid,
        job_type: JobType,
        payload: Option<JsonValue>,
        options: EnqueueOptions,
    ) -> Result<Option<Uuid>>;

    /// Claim the next runnable job of the given types (empty = any type).
    ///
    /// Claiming increments the job's attempt counter.
    async fn claim_next_for_types(&self, job_types: &[JobType]) -> Result<Option<Job>>;

    /// Mark a job as completed.
    async fn complete(&self, job_id: Uuid, result: Option<JsonValue>) -> Result<()>;

    /// Record a failed attempt.
    ///
    /// When `retryable` and attempts remain, the job returns to `pending`
    /// with `run_after` pushed out by its backoff; otherwise it is marked
    /// `failed`.
    async fn fail(&self, job_id: Uuid, error: &str, retryable: bool) -> Result<()>;

    /// Release claims older than `stale_after` whose worker never reported.
    ///
    /// Jobs with attempts left return to `pending` and run again at once;
    /// exhausted jobs are marked `failed` and returned so their handler can
    /// settle whatever the lost attempt left behind.
    async fn reclaim_stale(&self, stale_after: std::time::Duration) -> Result<Vec<Job>>;

    /// Get a job by ID.
    async fn get(&self, job_id: Uuid) -> Result<Option<Job>>;

    /// Count of pending jobs.
    async fn pending_count(&self) -> Result<i64>;

    /// Check the queue backend is reachable and its schema is present.
    async fn probe(&self) -> Result<()>;
}

// =============================================================================
// FORMAT EXTRACTORS
// =============================================================================

/// Converts one document format's raw bytes into plain text.
///
/// Extractors are pure: they hold no shared mutable state and perform no
/// I/O beyond reading the bytes they are given.
pub trait FormatExtractor: Send + Sync {
    /// The format this extractor handles.
    fn format(&self) -> MaterialFormat;

    /// Extract text and advisory metadata.
    fn extract(&self, data: &[u8]) -> Result<ExtractedDocument>;

    /// Human-readable name of this extractor.
    fn name(&self) -> &str;
}
