//! HTTP surface over in-memory collaborators with inline extraction.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use serde_json::{json, Value as JsonValue};
use tower::ServiceExt;
use uuid::Uuid;

use folio_api::{router, AppState, MaterialService, ServerConfig};
use folio_db::{
    MemoryMaterialLedger, MemoryObjectStorage, MemoryProjectDirectory, MemoryStarredMessages,
    StarredMessage,
};
use folio_jobs::{ExtractionPipeline, ExtractorRegistry, InlineDispatcher};

const STORY: &str = "Chapter One\n\nThe house was quiet.\nThe ghost wrote all night\nby candlelight.\nMorning came.";

struct TestApp {
    app: Router,
    owner: Uuid,
    project: Uuid,
    session: Uuid,
}

async fn test_app() -> TestApp {
    let ledger = Arc::new(MemoryMaterialLedger::new());
    let storage = Arc::new(MemoryObjectStorage::new());
    let projects = Arc::new(MemoryProjectDirectory::new());
    let starred = Arc::new(MemoryStarredMessages::new());

    let owner = Uuid::new_v4();
    let project = Uuid::new_v4();
    let session = Uuid::new_v4();
    projects.add_project(project, owner).await;
    projects.set_word_counts(project, 10_000, 2_000).await;
    starred
        .star(
            project,
            StarredMessage {
                id: Uuid::new_v4(),
                session_id: session,
                role: "assistant".to_string(),
                content: "Keep the ghost ambiguous.".to_string(),
                starred_at: Utc::now(),
            },
        )
        .await;

    let pipeline = ExtractionPipeline::new(
        ledger.clone(),
        storage.clone(),
        Arc::new(ExtractorRegistry::with_defaults()),
    );
    let service = MaterialService::new(
        ledger,
        storage,
        projects,
        starred,
        Arc::new(InlineDispatcher::new(pipeline)),
    );

    TestApp {
        app: router(AppState { service }, &ServerConfig::default()),
        owner,
        project,
        session,
    }
}

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    user: Option<Uuid>,
    body: Option<Body>,
    content_type: &str,
) -> (StatusCode, JsonValue) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header("x-user-id", user.to_string());
    }
    let request = match body {
        Some(body) => builder.header("content-type", content_type).body(body),
        None => builder.body(Body::empty()),
    }
    .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        JsonValue::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(JsonValue::Null)
    };
    (status, value)
}

async fn get(t: &TestApp, uri: &str) -> (StatusCode, JsonValue) {
    send(&t.app, Method::GET, uri, Some(t.owner), None, "").await
}

async fn post_json(t: &TestApp, uri: &str, body: JsonValue) -> (StatusCode, JsonValue) {
    send(
        &t.app,
        Method::POST,
        uri,
        Some(t.owner),
        Some(Body::from(body.to_string())),
        "application/json",
    )
    .await
}

async fn upload(t: &TestApp, filename: &str, data: &[u8]) -> Uuid {
    let (status, slot) = post_json(
        t,
        &format!("/api/v1/projects/{}/materials/upload-slot", t.project),
        json!({ "filename": filename, "size_bytes": data.len() }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{slot}");
    let id: Uuid = slot["material_id"].as_str().unwrap().parse().unwrap();
    assert!(slot["write_reference"].as_str().unwrap().contains(&id.to_string()));

    let (status, _) = send(
        &t.app,
        Method::PUT,
        &format!("/api/v1/materials/{id}/content"),
        Some(t.owner),
        Some(Body::from(data.to_vec())),
        "application/octet-stream",
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    id
}

async fn wait_for_status(t: &TestApp, id: Uuid, expected: &str) -> JsonValue {
    for _ in 0..200 {
        let (status, material) = get(t, &format!("/api/v1/materials/{id}")).await;
        assert_eq!(status, StatusCode::OK);
        if material["status"] == expected {
            return material;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("material {id} never reached {expected}");
}

#[tokio::test]
async fn test_health_reports_dispatch_mode() {
    let t = test_app().await;
    let (status, body) = send(&t.app, Method::GET, "/health", None, None, "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["dispatch_mode"], "inline");
}

#[tokio::test]
async fn test_missing_or_invalid_caller_is_unauthorized() {
    let t = test_app().await;
    let uri = format!("/api/v1/projects/{}/materials", t.project);

    let (status, body) = send(&t.app, Method::GET, &uri, None, None, "").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].as_str().unwrap().contains("X-User-Id"));

    let request = Request::builder()
        .uri(&uri)
        .header("x-user-id", "not-a-uuid")
        .body(Body::empty())
        .unwrap();
    let response = t.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_upload_process_assemble_search_delete() {
    let t = test_app().await;
    let id = upload(&t, "Ghost Notes.txt", STORY.as_bytes()).await;

    let (status, listed) = get(&t, &format!("/api/v1/projects/{}/materials", t.project)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["status"], "pending");
    assert!(listed[0].get("extracted_text").is_none());

    let (status, accepted) = post_json(&t, &format!("/api/v1/materials/{id}/process"), json!({})).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(accepted["dispatch_mode"], "inline");

    let material = wait_for_status(&t, id, "completed").await;
    assert_eq!(material["title"], "Ghost Notes");
    assert!(material["extracted_text"].as_str().unwrap().contains("The ghost wrote all night"));
    let words = material["word_count"].as_i64().unwrap();
    assert_eq!(words, STORY.split_whitespace().count() as i64);

    // Budget: 600000 - 10000 - 2000 - 3000
    let (status, budget) = get(&t, &format!("/api/v1/projects/{}/context-budget", t.project)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(budget["available_for_sources"], 585_000);
    assert_eq!(budget["active_source_words"], words);
    assert_eq!(budget["total_source_words"], words);

    let (status, context) = get(
        &t,
        &format!("/api/v1/projects/{}/context?session_id={}", t.project, t.session),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(context["sources"].as_array().unwrap().len(), 1);
    assert_eq!(context["sources"][0]["material_id"], id.to_string());
    assert_eq!(context["starred_messages"].as_array().unwrap().len(), 1);
    assert_eq!(context["budget"]["source_words_used"], words);
    let rendered = context["rendered"].as_str().unwrap();
    assert!(rendered.contains("--- Ghost Notes"));
    assert!(rendered.contains("[assistant] Keep the ghost ambiguous."));

    let (status, hits) = get(&t, &format!("/api/v1/projects/{}/search?q=GHOST", t.project)).await;
    assert_eq!(status, StatusCode::OK);
    let hits = hits.as_array().unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["source_title"], "Ghost Notes");
    assert_eq!(hits[0]["matches"][0]["line_number"], 4);
    assert_eq!(
        hits[0]["matches"][0]["context"],
        "\nThe house was quiet.\nThe ghost wrote all night\nby candlelight.\nMorning came."
    );

    let (status, hits) = get(&t, &format!("/api/v1/projects/{}/search?q=vampire", t.project)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(hits, json!([]));

    // Reprocessing a completed material is rejected.
    let (status, _) = post_json(&t, &format!("/api/v1/materials/{id}/process"), json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, toggled) = post_json(&t, &format!("/api/v1/materials/{id}/toggle"), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(toggled["is_active"], false);
    let (_, context) = get(&t, &format!("/api/v1/projects/{}/context", t.project)).await;
    assert!(context["sources"].as_array().unwrap().is_empty());
    assert!(context["starred_messages"].as_array().unwrap().is_empty());

    let (status, _) = send(
        &t.app,
        Method::DELETE,
        &format!("/api/v1/materials/{id}"),
        Some(t.owner),
        None,
        "",
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = get(&t, &format!("/api/v1/materials/{id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, listed) = get(&t, &format!("/api/v1/projects/{}/materials", t.project)).await;
    assert_eq!(listed, json!([]));
}

#[tokio::test]
async fn test_failed_extraction_is_recorded_and_retryable() {
    let t = test_app().await;
    let (status, slot) = post_json(
        &t,
        &format!("/api/v1/projects/{}/materials/upload-slot", t.project),
        json!({ "filename": "notes.txt", "size_bytes": 3 }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id: Uuid = slot["material_id"].as_str().unwrap().parse().unwrap();

    // No content was ever written: the storage read fails.
    let (status, _) = post_json(&t, &format!("/api/v1/materials/{id}/process"), json!({})).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let material = wait_for_status(&t, id, "failed").await;
    assert!(material["error_message"].as_str().is_some());
    assert!(material["extracted_text"].is_null());

    let (status, _) = send(
        &t.app,
        Method::PUT,
        &format!("/api/v1/materials/{id}/content"),
        Some(t.owner),
        Some(Body::from("late")),
        "text/plain",
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = post_json(&t, &format!("/api/v1/materials/{id}/process"), json!({})).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    wait_for_status(&t, id, "failed").await;
}

#[tokio::test]
async fn test_upload_slot_errors() {
    let t = test_app().await;
    let uri = format!("/api/v1/projects/{}/materials/upload-slot", t.project);

    let (status, body) = post_json(&t, &uri, json!({ "filename": "data.xlsx", "size_bytes": 10 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("Unsupported format"));

    let (status, _) = post_json(&t, &uri, json!({ "filename": "notes.txt", "size_bytes": 0 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &t.app,
        Method::POST,
        &uri,
        Some(Uuid::new_v4()),
        Some(Body::from(json!({ "filename": "notes.txt", "size_bytes": 10 }).to_string())),
        "application/json",
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = post_json(
        &t,
        &format!("/api/v1/projects/{}/materials/upload-slot", Uuid::new_v4()),
        json!({ "filename": "notes.txt", "size_bytes": 10 }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
