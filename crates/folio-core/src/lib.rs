//! # folio-core
//!
//! Core types, traits, and abstractions for folio source materials.
//!
//! This crate provides the foundational data structures and trait definitions
//! that the other folio crates depend on: the material lifecycle state machine,
//! the error taxonomy, and the collaborator traits (ledger, object storage,
//! job queue, project directory, format extractors).

pub mod defaults;
pub mod error;
pub mod file_safety;
pub mod models;
pub mod traits;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use file_safety::{contradicts_declared, sanitize_filename, sniff_format};
pub use models::*;
pub use traits::*;
pub use uuid_utils::new_v7;
