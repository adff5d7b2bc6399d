//! Error types for folio.

use thiserror::Error;

use crate::models::MaterialStatus;

/// Result type alias using folio's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for folio operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found (material, project, job)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller does not own the resource
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Declared format has no extractor
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Parser failed or content was unreadable
    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    /// Lifecycle transition not present in the allowed table
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: MaterialStatus,
        to: MaterialStatus,
    },

    /// Operation conflicts with the resource's current state
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Object storage read/write failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Job queue error
    #[error("Job error: {0}")]
    Job(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Operation exceeded its time limit
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether a queue-backed attempt that hit this error may be re-attempted.
    ///
    /// Transient infrastructure failures are retryable. Format and parser
    /// failures are deterministic for the same bytes and are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Database(_)
                | Error::Storage(_)
                | Error::Io(_)
                | Error::Timeout(_)
                | Error::Job(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
