//! Upload, lifecycle, and listing endpoints.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use folio_core::{MaterialSummary, SourceMaterial, UploadSlot};

use super::CallerId;
use crate::error::ApiError;
use crate::routes::AppState;
use crate::services::UploadRequest;

pub async fn request_upload_slot(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
    Path(project_id): Path<Uuid>,
    Json(body): Json<UploadRequest>,
) -> Result<(StatusCode, Json<UploadSlot>), ApiError> {
    let slot = state
        .service
        .request_upload_slot(caller, project_id, body)
        .await?;
    Ok((StatusCode::CREATED, Json(slot)))
}

pub async fn list_materials(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
    Path(project_id): Path<Uuid>,
) -> Result<Json<Vec<MaterialSummary>>, ApiError> {
    Ok(Json(state.service.list_materials(caller, project_id).await?))
}

pub async fn get_material(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
    Path(id): Path<Uuid>,
) -> Result<Json<SourceMaterial>, ApiError> {
    Ok(Json(state.service.get_material(caller, id).await?))
}

pub async fn put_content(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    state.service.put_content(caller, id, &body).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Returns 202 as soon as the material is handed to the dispatcher.
pub async fn start_processing(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<JsonValue>), ApiError> {
    state.service.start_processing(caller, id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "material_id": id,
            "dispatch_mode": state.service.dispatch_mode(),
        })),
    ))
}

pub async fn toggle_activation(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
    Path(id): Path<Uuid>,
) -> Result<Json<JsonValue>, ApiError> {
    let is_active = state.service.toggle_activation(caller, id).await?;
    Ok(Json(json!({ "material_id": id, "is_active": is_active })))
}

pub async fn delete_material(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.service.delete_material(caller, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
