//! Router construction and shared state.

use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::handlers::{self, context, materials, USER_ID_HEADER};
use crate::services::MaterialService;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: MaterialService,
}

/// Time-ordered (UUIDv7) request correlation ids.
#[derive(Clone, Default)]
struct MakeRequestUuidV7;

impl MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = folio_core::new_v7().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static(USER_ID_HEADER),
        ])
        .max_age(Duration::from_secs(3600))
}

pub fn router(state: AppState, config: &ServerConfig) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        // Materials scoped to a project
        .route(
            "/api/v1/projects/:project_id/materials",
            get(materials::list_materials),
        )
        .route(
            "/api/v1/projects/:project_id/materials/upload-slot",
            post(materials::request_upload_slot),
        )
        // Context
        .route(
            "/api/v1/projects/:project_id/context-budget",
            get(context::context_budget),
        )
        .route(
            "/api/v1/projects/:project_id/context",
            get(context::assemble_context),
        )
        .route("/api/v1/projects/:project_id/search", get(context::search))
        // Single material
        .route(
            "/api/v1/materials/:id",
            get(materials::get_material).delete(materials::delete_material),
        )
        .route("/api/v1/materials/:id/content", put(materials::put_content))
        .route(
            "/api/v1/materials/:id/process",
            post(materials::start_processing),
        )
        .route(
            "/api/v1/materials/:id/toggle",
            post(materials::toggle_activation),
        )
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
        .layer(cors_layer(&config.allowed_origins))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(config.body_limit()))
        .layer(CatchPanicLayer::new())
        .with_state(state)
}
