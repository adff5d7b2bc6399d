//! Extraction dispatch strategies.
//!
//! One strategy is chosen at startup: [`QueueDispatcher`] when the durable
//! job queue answers its probe, [`InlineDispatcher`] otherwise. Callers hold
//! an `Arc<dyn ExtractionDispatcher>` and never branch on the mode.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info};
use uuid::Uuid;

use folio_core::{EnqueueOptions, JobRepository, JobType, Result};

use crate::pipeline::{Attempt, AttemptOutcome, ExtractionPipeline};

/// Which dispatch strategy is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    Queue,
    Inline,
}

impl DispatchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchMode::Queue => "queue",
            DispatchMode::Inline => "inline",
        }
    }
}

impl fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Starts extraction for a material without waiting for it to finish.
#[async_trait]
pub trait ExtractionDispatcher: Send + Sync {
    fn mode(&self) -> DispatchMode;

    /// Hand the material to the strategy. Returns once the work is queued or
    /// spawned; extraction outcomes are written to the ledger, never returned.
    async fn dispatch(&self, material_id: Uuid) -> Result<()>;
}

// =============================================================================
// QUEUE
// =============================================================================

/// Enqueues a durable extraction job; the worker pool runs the attempts.
pub struct QueueDispatcher {
    jobs: Arc<dyn JobRepository>,
    options: EnqueueOptions,
}

impl QueueDispatcher {
    pub fn new(jobs: Arc<dyn JobRepository>, options: EnqueueOptions) -> Self {
        Self { jobs, options }
    }
}

#[async_trait]
impl ExtractionDispatcher for QueueDispatcher {
    fn mode(&self) -> DispatchMode {
        DispatchMode::Queue
    }

    async fn dispatch(&self, material_id: Uuid) -> Result<()> {
        let queued = self
            .jobs
            .enqueue_deduplicated(
                material_id,
                JobType::Extraction,
                Some(json!({ "material_id": material_id })),
                self.options,
            )
            .await?;

        match queued {
            Some(job_id) => debug!(
                subsystem = "jobs",
                component = "dispatcher",
                material_id = %material_id,
                job_id = %job_id,
                max_attempts = self.options.max_attempts,
                "Extraction job queued"
            ),
            None => debug!(
                subsystem = "jobs",
                component = "dispatcher",
                material_id = %material_id,
                "Extraction already queued for material"
            ),
        }
        Ok(())
    }
}

// =============================================================================
// INLINE
// =============================================================================

type InFlight = Arc<Mutex<HashSet<Uuid>>>;

/// Removes the material from the in-flight set when the attempt ends,
/// including by panic.
struct InFlightGuard {
    in_flight: InFlight,
    material_id: Uuid,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.material_id);
    }
}

/// Runs exactly one attempt on a detached task. No retry, no timeout.
pub struct InlineDispatcher {
    pipeline: ExtractionPipeline,
    in_flight: InFlight,
}

impl InlineDispatcher {
    pub fn new(pipeline: ExtractionPipeline) -> Self {
        Self {
            pipeline,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Materials with an attempt currently running in this process.
    pub fn in_flight(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    fn claim(&self, material_id: Uuid) -> Option<InFlightGuard> {
        let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        set.insert(material_id).then(|| InFlightGuard {
            in_flight: self.in_flight.clone(),
            material_id,
        })
    }
}

#[async_trait]
impl ExtractionDispatcher for InlineDispatcher {
    fn mode(&self) -> DispatchMode {
        DispatchMode::Inline
    }

    async fn dispatch(&self, material_id: Uuid) -> Result<()> {
        let Some(guard) = self.claim(material_id) else {
            debug!(
                subsystem = "jobs",
                component = "dispatcher",
                material_id = %material_id,
                "Inline extraction already running for material"
            );
            return Ok(());
        };

        let pipeline = self.pipeline.clone();
        tokio::spawn(async move {
            let _guard = guard;
            match pipeline.run(material_id, Attempt::inline()).await {
                Ok(AttemptOutcome::Completed(_)) | Ok(AttemptOutcome::Failed(_)) => {}
                Ok(AttemptOutcome::Retry { error }) => {
                    // Inline attempts are final; the pipeline does not retry them.
                    error!(
                        subsystem = "jobs",
                        component = "dispatcher",
                        material_id = %material_id,
                        error = %error,
                        "Inline attempt requested a retry"
                    );
                }
                Err(e) => error!(
                    subsystem = "jobs",
                    component = "dispatcher",
                    material_id = %material_id,
                    error = %e,
                    "Inline extraction could not run"
                ),
            }
        });

        info!(
            subsystem = "jobs",
            component = "dispatcher",
            material_id = %material_id,
            "Inline extraction started"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use folio_core::{
        JobStatus, MaterialFormat, MaterialLedger, MaterialStatus, NewSourceMaterial,
        ObjectStorage, SourceMaterial,
    };
    use folio_db::{MemoryJobRepository, MemoryMaterialLedger, MemoryObjectStorage};

    use crate::extraction::ExtractorRegistry;

    async fn seed(
        ledger: &MemoryMaterialLedger,
        storage: &MemoryObjectStorage,
        format: MaterialFormat,
        data: &[u8],
    ) -> Uuid {
        let id = Uuid::new_v4();
        let key = format!("uploads/o/{id}/doc");
        ledger
            .create(NewSourceMaterial {
                id,
                project_id: Uuid::new_v4(),
                owner_id: Uuid::new_v4(),
                title: "doc".to_string(),
                original_filename: "doc".to_string(),
                format,
                mime_type: format.mime_type().to_string(),
                size_bytes: data.len() as i64,
                storage_key: key.clone(),
            })
            .await
            .unwrap();
        storage.write(&key, data).await.unwrap();
        id
    }

    async fn wait_terminal(ledger: &MemoryMaterialLedger, id: Uuid) -> SourceMaterial {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let material = ledger.get(id).await.unwrap().unwrap();
                if matches!(
                    material.status,
                    MaterialStatus::Completed | MaterialStatus::Failed
                ) {
                    return material;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("material did not reach a terminal state")
    }

    fn inline(
        ledger: Arc<MemoryMaterialLedger>,
        storage: Arc<MemoryObjectStorage>,
    ) -> InlineDispatcher {
        InlineDispatcher::new(ExtractionPipeline::new(
            ledger,
            storage,
            Arc::new(ExtractorRegistry::with_defaults()),
        ))
    }

    #[test]
    fn test_dispatch_mode_names() {
        assert_eq!(DispatchMode::Queue.as_str(), "queue");
        assert_eq!(DispatchMode::Inline.to_string(), "inline");
        assert_eq!(serde_json::to_value(DispatchMode::Queue).unwrap(), "queue");
    }

    #[tokio::test]
    async fn test_queue_dispatch_enqueues_once() {
        let jobs = Arc::new(MemoryJobRepository::new());
        let dispatcher = QueueDispatcher::new(jobs.clone(), EnqueueOptions::default());
        assert_eq!(dispatcher.mode(), DispatchMode::Queue);

        let material_id = Uuid::new_v4();
        dispatcher.dispatch(material_id).await.unwrap();
        dispatcher.dispatch(material_id).await.unwrap();

        let queued = jobs.all().await;
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].material_id, Some(material_id));
        assert_eq!(queued[0].status, JobStatus::Pending);
        assert_eq!(queued[0].max_attempts, 3);
        assert_eq!(queued[0].backoff_base_ms, 2000);
    }

    #[tokio::test]
    async fn test_inline_dispatch_completes_material() {
        let ledger = Arc::new(MemoryMaterialLedger::new());
        let storage = Arc::new(MemoryObjectStorage::new());
        let id = seed(&ledger, &storage, MaterialFormat::PlainText, b"inline words here").await;

        let dispatcher = inline(ledger.clone(), storage.clone());
        assert_eq!(dispatcher.mode(), DispatchMode::Inline);
        dispatcher.dispatch(id).await.unwrap();

        let material = wait_terminal(&ledger, id).await;
        assert_eq!(material.status, MaterialStatus::Completed);
        assert_eq!(material.word_count, 3);
    }

    #[tokio::test]
    async fn test_inline_dispatch_records_failure_without_retry() {
        let ledger = Arc::new(MemoryMaterialLedger::new());
        let storage = Arc::new(MemoryObjectStorage::new());
        let id = seed(&ledger, &storage, MaterialFormat::PlainText, b"text").await;
        storage.set_fail_reads(true);

        let dispatcher = inline(ledger.clone(), storage.clone());
        dispatcher.dispatch(id).await.unwrap();

        let material = wait_terminal(&ledger, id).await;
        assert_eq!(material.status, MaterialStatus::Failed);
        assert!(material.extracted_text.is_none());
        assert!(material.error_message.is_some());
    }

    #[tokio::test]
    async fn test_inline_dispatch_unsupported_content_fails() {
        let ledger = Arc::new(MemoryMaterialLedger::new());
        let storage = Arc::new(MemoryObjectStorage::new());
        let id = seed(&ledger, &storage, MaterialFormat::Epub, b"not an archive").await;

        let dispatcher = inline(ledger.clone(), storage.clone());
        dispatcher.dispatch(id).await.unwrap();

        let material = wait_terminal(&ledger, id).await;
        assert_eq!(material.status, MaterialStatus::Failed);
    }

    #[tokio::test]
    async fn test_inline_in_flight_cleared_after_attempt() {
        let ledger = Arc::new(MemoryMaterialLedger::new());
        let storage = Arc::new(MemoryObjectStorage::new());
        let id = seed(&ledger, &storage, MaterialFormat::PlainText, b"a b").await;

        let dispatcher = inline(ledger.clone(), storage.clone());
        dispatcher.dispatch(id).await.unwrap();
        wait_terminal(&ledger, id).await;

        tokio::time::timeout(Duration::from_secs(5), async {
            while dispatcher.in_flight() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("in-flight entry not released");
    }

    #[test]
    fn test_inline_claim_is_exclusive() {
        let dispatcher = inline(
            Arc::new(MemoryMaterialLedger::new()),
            Arc::new(MemoryObjectStorage::new()),
        );
        let id = Uuid::new_v4();
        let guard = dispatcher.claim(id).expect("first claim");
        assert!(dispatcher.claim(id).is_none());
        assert_eq!(dispatcher.in_flight(), 1);
        drop(guard);
        assert!(dispatcher.claim(id).is_some());
    }
}
