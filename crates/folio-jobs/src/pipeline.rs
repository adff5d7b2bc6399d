//! One extraction attempt for one material.
//!
//! The pipeline drives the material lifecycle: it moves a pending material
//! to `processing`, reads the stored bytes, runs the registered extractor on
//! a blocking thread, and records `completed` or `failed` through the ledger.
//! It never writes status itself outside [`MaterialLedger::transition`].
//!
//! A transient failure (storage, I/O, timeout) on a queued attempt that is
//! not the last one leaves the material in `processing` and reports
//! [`AttemptOutcome::Retry`]; every other failure is written as `failed`.
//!
//! Parsers run on blocking threads that a timeout cannot cancel. A timed-out
//! parse keeps its parser slot until it returns, so at most
//! `parser_slots` parses are ever running, abandoned ones included.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value as JsonValue;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

use folio_core::{
    defaults, Error, ExtractedContent, ExtractedDocument, MaterialLedger, MaterialStatus,
    ObjectStorage, Result, SourceMaterial, Transition,
};

use crate::extraction::ExtractorRegistry;

/// How the attempt being run was scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    /// 1-based attempt number.
    pub number: i32,
    /// Attempts the retry policy allows in total.
    pub max_attempts: i32,
    /// Upper bound on the attempt's duration; `None` means unbounded.
    pub timeout: Option<Duration>,
}

impl Attempt {
    /// The single, unbounded attempt of the inline dispatch path.
    pub fn inline() -> Self {
        Self {
            number: 1,
            max_attempts: 1,
            timeout: None,
        }
    }

    /// An attempt run by the queue worker.
    pub fn queued(number: i32, max_attempts: i32, timeout: Duration) -> Self {
        Self {
            number,
            max_attempts,
            timeout: Some(timeout),
        }
    }

    pub fn is_final(&self) -> bool {
        self.number >= self.max_attempts
    }

    /// Re-attempts continue a material already left in `processing`.
    fn resumes_processing(&self) -> bool {
        self.number > 1
    }
}

/// What an attempt did to the material.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// Extraction succeeded and the material is `completed`.
    Completed(SourceMaterial),
    /// Extraction failed and the material is `failed`.
    Failed(SourceMaterial),
    /// Transient failure; the material stays `processing` for another attempt.
    Retry { error: String },
}

/// Runs extraction attempts against the ledger, storage, and extractor registry.
#[derive(Clone)]
pub struct ExtractionPipeline {
    ledger: Arc<dyn MaterialLedger>,
    storage: Arc<dyn ObjectStorage>,
    registry: Arc<ExtractorRegistry>,
    parser_slots: Arc<Semaphore>,
}

impl ExtractionPipeline {
    pub fn new(
        ledger: Arc<dyn MaterialLedger>,
        storage: Arc<dyn ObjectStorage>,
        registry: Arc<ExtractorRegistry>,
    ) -> Self {
        Self {
            ledger,
            storage,
            registry,
            parser_slots: Arc::new(Semaphore::new(defaults::EXTRACTION_PARSER_SLOTS)),
        }
    }

    /// Limit how many parsers may run at once across every attempt.
    pub fn with_parser_slots(mut self, slots: usize) -> Self {
        self.parser_slots = Arc::new(Semaphore::new(slots.max(1)));
        self
    }

    pub fn available_parser_slots(&self) -> usize {
        self.parser_slots.available_permits()
    }

    pub fn ledger(&self) -> &Arc<dyn MaterialLedger> {
        &self.ledger
    }

    /// Run one attempt.
    ///
    /// Errors are returned only when the attempt could not start or its
    /// outcome could not be recorded (unknown material, material not in a
    /// runnable state, ledger failure). Extraction failures are outcomes.
    pub async fn run(&self, material_id: Uuid, attempt: Attempt) -> Result<AttemptOutcome> {
        let start = Instant::now();
        let material = self.begin(material_id, attempt).await?;

        let extracted = match attempt.timeout {
            Some(limit) => match tokio::time::timeout(limit, self.extract(&material)).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(format!(
                    "extraction exceeded {}s",
                    limit.as_secs()
                ))),
            },
            None => self.extract(&material).await,
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        match extracted {
            Ok(content) => {
                let word_count = content.word_count;
                let material = self
                    .ledger
                    .transition(material_id, Transition::Complete(content))
                    .await?;
                info!(
                    subsystem = "jobs",
                    component = "pipeline",
                    material_id = %material_id,
                    format = %material.format,
                    word_count,
                    attempt = attempt.number,
                    duration_ms,
                    "Material extraction completed"
                );
                Ok(AttemptOutcome::Completed(material))
            }
            Err(e) if e.is_retryable() && !attempt.is_final() => {
                warn!(
                    subsystem = "jobs",
                    component = "pipeline",
                    material_id = %material_id,
                    attempt = attempt.number,
                    max_attempts = attempt.max_attempts,
                    duration_ms,
                    error = %e,
                    "Extraction attempt failed, will retry"
                );
                Ok(AttemptOutcome::Retry {
                    error: e.to_string(),
                })
            }
            Err(e) => {
                let error = e.to_string();
                let material = self
                    .ledger
                    .transition(
                        material_id,
                        Transition::Fail {
                            error: error.clone(),
                        },
                    )
                    .await?;
                info!(
                    subsystem = "jobs",
                    component = "pipeline",
                    material_id = %material_id,
                    format = %material.format,
                    attempt = attempt.number,
                    duration_ms,
                    error = %error,
                    "Material extraction failed"
                );
                Ok(AttemptOutcome::Failed(material))
            }
        }
    }

    /// Move the material into `processing`, or confirm a re-attempt may
    /// continue one already there.
    async fn begin(&self, material_id: Uuid, attempt: Attempt) -> Result<SourceMaterial> {
        let material = self
            .ledger
            .get(material_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("material {material_id}")))?;

        match material.status {
            MaterialStatus::Pending => {
                self.ledger
                    .transition(material_id, Transition::StartProcessing)
                    .await
            }
            MaterialStatus::Processing if attempt.resumes_processing() => {
                debug!(
                    subsystem = "jobs",
                    component = "pipeline",
                    material_id = %material_id,
                    attempt = attempt.number,
                    "Resuming material left in processing"
                );
                Ok(material)
            }
            status => Err(Error::Conflict(format!(
                "material {material_id} is {status}, not runnable"
            ))),
        }
    }

    async fn extract(&self, material: &SourceMaterial) -> Result<ExtractedContent> {
        let data = self.storage.read(&material.storage_key).await?;

        let permit = self
            .parser_slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Internal("extraction parser slots closed".to_string()))?;

        let registry = self.registry.clone();
        let format = material.format;
        let document = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            registry.extract(format, &data)
        })
            .await
            .map_err(|e| Error::ExtractionFailed(format!("extractor aborted: {e}")))??;

        debug!(
            subsystem = "jobs",
            component = "pipeline",
            material_id = %material.id,
            format = %format,
            chars = document.text.len(),
            "Extractor returned"
        );
        into_content(document, format.as_str())
    }
}

/// Convert extractor output into the ledger payload, adding the derived
/// word count and metadata common to every format.
fn into_content(document: ExtractedDocument, format: &str) -> Result<ExtractedContent> {
    if document.text.trim().is_empty() {
        return Err(Error::ExtractionFailed(
            "document contains no extractable text".to_string(),
        ));
    }

    let word_count = document.text.split_whitespace().count() as i64;
    let mut metadata = document.metadata;
    metadata.insert("format".into(), format.into());
    metadata.insert("char_count".into(), document.text.chars().count().into());
    metadata
        .entry("line_count")
        .or_insert_with(|| document.text.lines().count().into());
    metadata.insert(
        "content_hash".into(),
        format!("blake3:{}", blake3::hash(document.text.as_bytes())).into(),
    );
    if let Some(pages) = document.page_count {
        metadata.insert("page_count".into(), pages.into());
    }
    if let Some(title) = &document.title {
        metadata.insert("title".into(), title.clone().into());
    }

    Ok(ExtractedContent {
        text: document.text,
        word_count,
        page_count: document.page_count,
        author: document.author,
        metadata: JsonValue::Object(metadata),
    })
}
