//! Budget, context assembly, and search endpoints.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use folio_context::{ContextBudget, ContextBundle, SourceMatches};

use super::CallerId;
use crate::error::ApiError;
use crate::routes::AppState;

#[derive(Debug, Deserialize)]
pub struct ContextQuery {
    #[serde(default)]
    pub session_id: Option<Uuid>,
}

/// A bundle plus the block rendered from it.
#[derive(Debug, Serialize)]
pub struct AssembledContext {
    #[serde(flatten)]
    pub bundle: ContextBundle,
    pub rendered: String,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

pub async fn context_budget(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
    Path(project_id): Path<Uuid>,
) -> Result<Json<ContextBudget>, ApiError> {
    Ok(Json(state.service.context_budget(caller, project_id).await?))
}

pub async fn assemble_context(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
    Path(project_id): Path<Uuid>,
    Query(query): Query<ContextQuery>,
) -> Result<Json<AssembledContext>, ApiError> {
    let bundle = state
        .service
        .assemble_context(caller, project_id, query.session_id)
        .await?;
    let rendered = bundle.render();
    Ok(Json(AssembledContext { bundle, rendered }))
}

pub async fn search(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
    Path(project_id): Path<Uuid>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<SourceMatches>>, ApiError> {
    Ok(Json(state.service.search(caller, project_id, &query.q).await?))
}
