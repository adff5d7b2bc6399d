//! # folio-jobs
//!
//! Extraction for folio: per-format extractors, the pipeline that runs one
//! extraction attempt against the ledger, and the two dispatch strategies.
//!
//! This crate provides:
//! - Format extractors for PDF, DOCX, plain text, and EPUB
//! - A registry mapping each [`MaterialFormat`] to its extractor
//! - The durable-queue worker with bounded, backed-off retries
//! - Broadcast [`WorkerEvent`]s for job observability
//! - [`QueueDispatcher`] and [`InlineDispatcher`], chosen once at startup
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use folio_jobs::{ExtractionHandler, ExtractionPipeline, ExtractorRegistry, WorkerBuilder};
//!
//! let pipeline = ExtractionPipeline::new(ledger, storage, Arc::new(ExtractorRegistry::with_defaults()));
//! let worker = WorkerBuilder::new(jobs)
//!     .with_handler(ExtractionHandler::new(pipeline))
//!     .build()
//!     .await;
//! let handle = worker.start();
//! // ...
//! handle.shutdown().await?;
//! ```

pub mod adapters;
pub mod dispatch;
pub mod extraction;
pub mod extraction_handler;
pub mod handler;
pub mod pipeline;
pub mod worker;

// Re-export core types
pub use folio_core::*;

pub use adapters::{DocxExtractor, EpubExtractor, PdfExtractor, PlainTextExtractor};
pub use dispatch::{DispatchMode, ExtractionDispatcher, InlineDispatcher, QueueDispatcher};
pub use extraction::ExtractorRegistry;
pub use extraction_handler::ExtractionHandler;
pub use handler::{JobContext, JobHandler, JobResult};
pub use pipeline::{Attempt, AttemptOutcome, ExtractionPipeline};
pub use worker::{JobWorker, WorkerBuilder, WorkerConfig, WorkerEvent, WorkerHandle};
