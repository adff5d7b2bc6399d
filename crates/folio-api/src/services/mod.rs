//! Service layer for business logic.

pub mod material_service;

pub use material_service::{MaterialService, UploadRequest};
