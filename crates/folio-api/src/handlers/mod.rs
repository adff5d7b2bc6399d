//! HTTP handlers.
//!
//! Every `/api/v1` route identifies its caller through the `X-User-Id`
//! header set by the authentication proxy in front of this service.

pub mod context;
pub mod materials;

use axum::async_trait;
use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::Json;
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use crate::error::ApiError;
use crate::routes::AppState;

/// Header carrying the authenticated caller id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerId(pub Uuid);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CallerId {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| ApiError::Unauthorized("missing X-User-Id header".to_string()))?;
        value
            .to_str()
            .ok()
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .map(CallerId)
            .ok_or_else(|| ApiError::Unauthorized("invalid X-User-Id header".to_string()))
    }
}

pub async fn health(State(state): State<AppState>) -> Json<JsonValue> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "dispatch_mode": state.service.dispatch_mode(),
    }))
}
