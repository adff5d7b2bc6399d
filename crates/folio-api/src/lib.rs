//! # folio-api
//!
//! HTTP surface for folio source materials: upload slots, extraction
//! dispatch, listing, activation, deletion, context budget and assembly,
//! and grep search. Business logic lives in [`services::MaterialService`];
//! handlers only translate HTTP to service calls.

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod services;
pub mod telemetry;

pub use bootstrap::{select_dispatcher, DispatchSetup};
pub use config::{LogConfig, LogFormat, ServerConfig};
pub use error::ApiError;
pub use routes::{router, AppState};
pub use services::{MaterialService, UploadRequest};
