//! Centralized default constants for folio.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates reference these constants instead of defining their own magic
//! numbers. Organized by domain area.

// =============================================================================
// CONTEXT BUDGET
// =============================================================================

/// Total word ceiling for one generation request (manuscript + outline +
/// overhead + reference material).
pub const TOTAL_BUDGET_WORDS: u64 = 600_000;

/// Words reserved for prompt scaffolding and instructions.
pub const CONTEXT_OVERHEAD_WORDS: u64 = 3_000;

/// Maximum starred conversation turns folded into a context bundle.
pub const STARRED_MESSAGE_LIMIT: usize = 5;

// =============================================================================
// GREP SEARCH
// =============================================================================

/// Maximum matches reported per material before scanning stops.
pub const GREP_MAX_MATCHES_PER_SOURCE: usize = 10;

/// Lines of context captured on each side of a match.
pub const GREP_CONTEXT_LINES: usize = 2;

// =============================================================================
// UPLOADS
// =============================================================================

/// Largest accepted upload (50 MiB).
pub const MAX_UPLOAD_BYTES: i64 = 50 * 1024 * 1024;

/// Fallback MIME type when none is declared.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

// =============================================================================
// EXTRACTION
// =============================================================================

/// Ceiling on bytes decompressed out of one DOCX or EPUB package (128 MiB).
pub const MAX_DECOMPRESSED_BYTES: u64 = 128 * 1024 * 1024;

/// Parsers allowed to run at once, including ones whose attempt timed out.
pub const EXTRACTION_PARSER_SLOTS: usize = 4;

// =============================================================================
// JOB QUEUE
// =============================================================================

/// Attempts per extraction job before the material is marked failed.
pub const JOB_MAX_ATTEMPTS: i32 = 3;

/// Base delay for exponential retry backoff (attempt n waits base * 2^(n-1)).
pub const JOB_BACKOFF_BASE_MS: u64 = 2_000;

/// Upper bound on a single backoff delay (10 minutes).
pub const JOB_BACKOFF_MAX_MS: u64 = 600_000;

/// Polling interval when the queue is empty.
pub const JOB_POLL_INTERVAL_MS: u64 = 1_000;

/// Maximum concurrent jobs per worker.
pub const JOB_MAX_CONCURRENT: usize = 4;

/// Per-attempt time limit for queue-backed extraction.
pub const JOB_TIMEOUT_SECS: u64 = 300;

/// A running job whose claim is older than this is treated as orphaned by a
/// dead worker and reclaimed (15 minutes).
pub const JOB_STALE_CLAIM_SECS: u64 = 900;

/// Capacity of the worker event broadcast channel.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// SERVER
// =============================================================================

/// Default HTTP server port.
pub const SERVER_PORT: u16 = 3000;

/// Default on-disk root for the filesystem object store.
pub const FILE_STORAGE_PATH: &str = "/var/lib/folio/files";
