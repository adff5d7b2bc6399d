//! Core data models for folio.
//!
//! These types are shared across all folio crates and represent the source
//! material lifecycle, extraction results, and the background job queue.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::defaults;
use crate::error::{Error, Result};

// =============================================================================
// MATERIAL LIFECYCLE
// =============================================================================

/// Processing state of a source material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaterialStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// Every allowed `(from, to)` pair. `Failed -> Pending` is only ever taken on
/// an explicit caller retry, never by the dispatcher itself.
const ALLOWED_TRANSITIONS: &[(MaterialStatus, MaterialStatus)] = &[
    (MaterialStatus::Pending, MaterialStatus::Processing),
    (MaterialStatus::Processing, MaterialStatus::Completed),
    (MaterialStatus::Processing, MaterialStatus::Failed),
    (MaterialStatus::Failed, MaterialStatus::Pending),
];

impl MaterialStatus {
    pub const ALL: [MaterialStatus; 4] = [
        MaterialStatus::Pending,
        MaterialStatus::Processing,
        MaterialStatus::Completed,
        MaterialStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MaterialStatus::Pending => "pending",
            MaterialStatus::Processing => "processing",
            MaterialStatus::Completed => "completed",
            MaterialStatus::Failed => "failed",
        }
    }

    /// Whether the lifecycle table allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: MaterialStatus) -> bool {
        ALLOWED_TRANSITIONS
            .iter()
            .any(|&(from, to)| from == self && to == next)
    }

    /// Statuses from which `target` may be reached.
    pub fn sources_of(target: MaterialStatus) -> Vec<MaterialStatus> {
        Self::ALL
            .into_iter()
            .filter(|s| s.can_transition_to(target))
            .collect()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MaterialStatus::Completed | MaterialStatus::Failed)
    }
}

impl fmt::Display for MaterialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MaterialStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(MaterialStatus::Pending),
            "processing" => Ok(MaterialStatus::Processing),
            "completed" => Ok(MaterialStatus::Completed),
            "failed" => Ok(MaterialStatus::Failed),
            other => Err(Error::InvalidInput(format!(
                "unknown material status: {other}"
            ))),
        }
    }
}

/// Result payload written on a successful extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedContent {
    pub text: String,
    pub word_count: i64,
    pub page_count: Option<i32>,
    pub author: Option<String>,
    pub metadata: JsonValue,
}

/// A requested lifecycle change together with its payload.
///
/// The ledger's `transition` method is the only writer of status and result
/// fields; each variant fully determines the fields it writes.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// `pending -> processing`, taken when an attempt starts.
    StartProcessing,
    /// `processing -> completed` with the extraction result.
    Complete(ExtractedContent),
    /// `processing -> failed` with a human-readable reason.
    Fail { error: String },
    /// `failed -> pending`, the explicit caller retry.
    Requeue,
}

/// Column values written by one transition.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionRecord {
    pub status: MaterialStatus,
    pub extracted_text: Option<String>,
    pub word_count: i64,
    pub page_count: Option<i32>,
    pub author: Option<String>,
    pub extraction_metadata: JsonValue,
    pub error_message: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Transition {
    pub fn target(&self) -> MaterialStatus {
        match self {
            Transition::StartProcessing => MaterialStatus::Processing,
            Transition::Complete(_) => MaterialStatus::Completed,
            Transition::Fail { .. } => MaterialStatus::Failed,
            Transition::Requeue => MaterialStatus::Pending,
        }
    }

    /// Fields this transition writes. Text is present only for `Complete`,
    /// an error message only for `Fail`.
    pub fn record(&self, now: DateTime<Utc>) -> TransitionRecord {
        let empty = TransitionRecord {
            status: self.target(),
            extracted_text: None,
            word_count: 0,
            page_count: None,
            author: None,
            extraction_metadata: JsonValue::Object(Default::default()),
            error_message: None,
            processed_at: None,
        };
        match self {
            Transition::StartProcessing | Transition::Requeue => empty,
            Transition::Complete(content) => TransitionRecord {
                extracted_text: Some(content.text.clone()),
                word_count: content.word_count,
                page_count: content.page_count,
                author: content.author.clone(),
                extraction_metadata: content.metadata.clone(),
                processed_at: Some(now),
                ..empty
            },
            Transition::Fail { error } => TransitionRecord {
                error_message: Some(error.clone()),
                processed_at: Some(now),
                ..empty
            },
        }
    }
}

// =============================================================================
// FORMATS
// =============================================================================

/// Document formats with a registered extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterialFormat {
    Pdf,
    Docx,
    PlainText,
    Epub,
}

impl MaterialFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaterialFormat::Pdf => "pdf",
            MaterialFormat::Docx => "docx",
            MaterialFormat::PlainText => "plain_text",
            MaterialFormat::Epub => "epub",
        }
    }

    /// Canonical MIME type for this format.
    pub fn mime_type(&self) -> &'static str {
        match self {
            MaterialFormat::Pdf => "application/pdf",
            MaterialFormat::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            MaterialFormat::PlainText => "text/plain",
            MaterialFormat::Epub => "application/epub+zip",
        }
    }

    /// Map a declared MIME type (parameters ignored) to a format.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "application/pdf" | "application/x-pdf" => Some(MaterialFormat::Pdf),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                Some(MaterialFormat::Docx)
            }
            "text/plain" | "text/markdown" | "text/x-markdown" => Some(MaterialFormat::PlainText),
            "application/epub+zip" => Some(MaterialFormat::Epub),
            _ => None,
        }
    }

    /// Map a filename's extension to a format.
    pub fn from_filename(filename: &str) -> Option<Self> {
        let (_, ext) = filename.rsplit_once('.')?;
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(MaterialFormat::Pdf),
            "docx" => Some(MaterialFormat::Docx),
            "txt" | "text" | "md" | "markdown" => Some(MaterialFormat::PlainText),
            "epub" => Some(MaterialFormat::Epub),
            _ => None,
        }
    }

    /// Resolve the declared format: MIME type first, then the extension.
    pub fn resolve(mime: &str, filename: &str) -> Option<Self> {
        Self::from_mime(mime).or_else(|| Self::from_filename(filename))
    }
}

impl fmt::Display for MaterialFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MaterialFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pdf" => Ok(MaterialFormat::Pdf),
            "docx" => Ok(MaterialFormat::Docx),
            "plain_text" => Ok(MaterialFormat::PlainText),
            "epub" => Ok(MaterialFormat::Epub),
            other => Err(Error::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Raw output of a format extractor.
///
/// Metadata is advisory; every optional field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedDocument {
    pub text: String,
    pub title: Option<String>,
    pub author: Option<String>,
    pub page_count: Option<i32>,
    pub metadata: serde_json::Map<String, JsonValue>,
}

// =============================================================================
// SOURCE MATERIALS
// =============================================================================

/// One uploaded reference document and its processing state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMaterial {
    pub id: Uuid,
    pub project_id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub original_filename: String,
    pub format: MaterialFormat,
    pub mime_type: String,
    pub size_bytes: i64,
    pub storage_key: String,
    pub status: MaterialStatus,
    pub error_message: Option<String>,
    pub extracted_text: Option<String>,
    pub word_count: i64,
    pub page_count: Option<i32>,
    pub author: Option<String>,
    pub extraction_metadata: JsonValue,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl SourceMaterial {
    /// Build the initial pending record for a newly issued upload slot.
    pub fn from_new(new: NewSourceMaterial, now: DateTime<Utc>) -> Self {
        Self {
            id: new.id,
            project_id: new.project_id,
            owner_id: new.owner_id,
            title: new.title,
            original_filename: new.original_filename,
            format: new.format,
            mime_type: new.mime_type,
            size_bytes: new.size_bytes,
            storage_key: new.storage_key,
            status: MaterialStatus::Pending,
            error_message: None,
            extracted_text: None,
            word_count: 0,
            page_count: None,
            author: None,
            extraction_metadata: JsonValue::Object(Default::default()),
            is_active: true,
            created_at: now,
            updated_at: now,
            processed_at: None,
        }
    }

    /// Apply a transition in place, rejecting pairs outside the lifecycle table.
    pub fn apply(&mut self, transition: &Transition, now: DateTime<Utc>) -> Result<()> {
        let target = transition.target();
        if !self.status.can_transition_to(target) {
            return Err(Error::InvalidTransition {
                from: self.status,
                to: target,
            });
        }
        let record = transition.record(now);
        self.status = record.status;
        self.extracted_text = record.extracted_text;
        self.word_count = record.word_count;
        self.page_count = record.page_count;
        self.author = record.author;
        self.extraction_metadata = record.extraction_metadata;
        self.error_message = record.error_message;
        self.processed_at = record.processed_at;
        self.updated_at = now;
        Ok(())
    }

    /// Eligible for context assembly and search.
    pub fn is_available(&self) -> bool {
        self.status == MaterialStatus::Completed && self.extracted_text.is_some()
    }
}

/// Fields supplied when a material row is created.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSourceMaterial {
    pub id: Uuid,
    pub project_id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub original_filename: String,
    pub format: MaterialFormat,
    pub mime_type: String,
    pub size_bytes: i64,
    pub storage_key: String,
}

/// Listing view of a material without its extracted text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialSummary {
    pub id: Uuid,
    pub project_id: Uuid,
    pub title: String,
    pub original_filename: String,
    pub format: MaterialFormat,
    pub size_bytes: i64,
    pub status: MaterialStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub word_count: i64,
    pub page_count: Option<i32>,
    pub author: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl From<&SourceMaterial> for MaterialSummary {
    fn from(m: &SourceMaterial) -> Self {
        Self {
            id: m.id,
            project_id: m.project_id,
            title: m.title.clone(),
            original_filename: m.original_filename.clone(),
            format: m.format,
            size_bytes: m.size_bytes,
            status: m.status,
            error_message: m.error_message.clone(),
            word_count: m.word_count,
            page_count: m.page_count,
            author: m.author.clone(),
            is_active: m.is_active,
            created_at: m.created_at,
            updated_at: m.updated_at,
            processed_at: m.processed_at,
        }
    }
}

/// Response to an upload slot request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadSlot {
    pub material_id: Uuid,
    pub write_reference: String,
}

/// A prior conversation turn the user marked as important.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StarredMessage {
    pub id: Uuid,
    pub session_id: Uuid,
    pub role: String,
    pub content: String,
    pub starred_at: DateTime<Utc>,
}

// =============================================================================
// JOB TYPES
// =============================================================================

/// Status of a job in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(Error::Job(format!("unknown job status: {other}"))),
        }
    }
}

/// Type of job to process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Convert an uploaded material to plain text
    Extraction,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Extraction => "extraction",
        }
    }
}

impl FromStr for JobType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "extraction" => Ok(JobType::Extraction),
            other => Err(Error::Job(format!("unknown job type: {other}"))),
        }
    }
}

/// Retry policy attached to a job at enqueue time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnqueueOptions {
    pub max_attempts: i32,
    pub backoff_base_ms: u64,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            max_attempts: defaults::JOB_MAX_ATTEMPTS,
            backoff_base_ms: defaults::JOB_BACKOFF_BASE_MS,
        }
    }
}

/// A job in the processing queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub material_id: Option<Uuid>,
    pub job_type: JobType,
    pub status: JobStatus,
    pub payload: Option<JsonValue>,
    pub result: Option<JsonValue>,
    pub error_message: Option<String>,
    /// Attempts started so far, including the one in flight.
    pub attempts: i32,
    pub max_attempts: i32,
    pub backoff_base_ms: i64,
    pub run_after: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Error recorded on a job whose claim expired without a report from its
/// worker.
pub const STALE_CLAIM_ERROR: &str = "claim expired: worker stopped without reporting";

impl Job {
    /// Whether the attempt in flight is the last one the policy allows.
    pub fn is_final_attempt(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Delay before the next attempt: `base * 2^(attempts - 1)`, capped.
    pub fn backoff_delay(&self) -> std::time::Duration {
        let exponent = self.attempts.saturating_sub(1).clamp(0, 20) as u32;
        let base = self.backoff_base_ms.max(0) as u64;
        let delay = base
            .saturating_mul(1u64 << exponent)
            .min(defaults::JOB_BACKOFF_MAX_MS);
        std::time::Duration::from_millis(delay)
    }
}
