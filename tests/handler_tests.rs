//! Smoke tests for the HTTP handler surface
//!
//! Each endpoint gets at least one test against a fresh fabric:
//! - Valid requests return 2xx
//! - Validation failures map to structured 400s before any I/O
//! - Compliance blocks and permission denials map to their status codes
//!
//! Run with: `cargo test --test handler_tests`

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::json;
use tempfile::TempDir;
use tower::ServiceExt;

use memfabric::config::FabricConfig;
use memfabric::fabric::MemoryFabric;
use memfabric::handlers::build_router;

// =============================================================================
// Test infrastructure
// =============================================================================

/// Self-contained harness with a fresh temp ledger
struct Harness {
    fabric: Arc<MemoryFabric>,
    _dir: TempDir,
}

impl Harness {
    fn new() -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let config = FabricConfig {
            storage_path: dir.path().to_path_buf(),
            ..FabricConfig::default()
        };
        let fabric = MemoryFabric::bootstrap(config).expect("bootstrap fabric");
        Self { fabric, _dir: dir }
    }

    fn app(&self) -> Router {
        build_router(self.fabric.clone())
    }
}

fn get(path: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(path)
        .body(Body::empty())
        .unwrap()
}

fn post_json(path: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

// =============================================================================
// Health and metrics
// =============================================================================

#[tokio::test]
async fn test_health_endpoints_respond() {
    let harness = Harness::new();

    let response = harness.app().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["ports"].as_array().unwrap().len(), 4);

    let live = harness.app().oneshot(get("/health/live")).await.unwrap();
    assert_eq!(live.status(), StatusCode::OK);

    let ready = harness.app().oneshot(get("/health/ready")).await.unwrap();
    assert_eq!(ready.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_metrics_endpoint_serves_text() {
    let harness = Harness::new();
    let response = harness.app().oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

// =============================================================================
// Events
// =============================================================================

#[tokio::test]
async fn test_events_endpoint_ingests_and_reports_duplicate() {
    let harness = Harness::new();
    let request = json!({
        "idempotency_key": "turn_h001",
        "user_id": "u1",
        "content_raw": "I just got the job offer!",
        "confidence": 0.9,
        "trust_score": 0.9,
    });

    let response = harness
        .app()
        .oneshot(post_json("/api/events", request.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["created"], true);
    assert_ne!(body["state"], "quarantined");

    let duplicate = harness
        .app()
        .oneshot(post_json("/api/events", request))
        .await
        .unwrap();
    let body = body_json(duplicate).await;
    assert_eq!(body["created"], false);
}

#[tokio::test]
async fn test_events_endpoint_rejects_invalid_user_id() {
    let harness = Harness::new();
    let response = harness
        .app()
        .oneshot(post_json(
            "/api/events",
            json!({
                "idempotency_key": "turn_h002",
                "user_id": "u 1/../",
                "content_raw": "x",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_events_endpoint_maps_compliance_block_to_422() {
    let harness = Harness::new();
    let response = harness
        .app()
        .oneshot(post_json(
            "/api/events",
            json!({
                "idempotency_key": "turn_h003",
                "user_id": "u1",
                "content_raw": "my password: hunter2secret",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert_eq!(body["code"], "COMPLIANCE_BLOCKED");
}

// =============================================================================
// Recall
// =============================================================================

#[tokio::test]
async fn test_recall_endpoint_returns_context_pack() {
    let harness = Harness::new();
    harness
        .app()
        .oneshot(post_json(
            "/api/events",
            json!({
                "idempotency_key": "turn_h004",
                "user_id": "u1",
                "content_raw": "my favorite tea is genmaicha",
            }),
        ))
        .await
        .unwrap();

    let response = harness
        .app()
        .oneshot(post_json(
            "/api/recall",
            json!({ "query": "favorite tea", "user_id": "u1" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["relationship_stage"], "stranger");
    assert!(body["context"]["evermemos_memories"].is_array());
    assert!(body["uncertainty"]["score"].as_f64().unwrap() < 1.0);
}

// =============================================================================
// Consolidate and benchmark
// =============================================================================

#[tokio::test]
async fn test_consolidate_endpoint_dry_run() {
    let harness = Harness::new();
    let response = harness
        .app()
        .oneshot(post_json("/api/consolidate", json!({ "dry_run": true })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["dry_run"], true);
    assert!(body["tasks"].is_array());
}

#[tokio::test]
async fn test_benchmark_endpoint_labels_proxy_mode() {
    let harness = Harness::new();
    let response = harness
        .app()
        .oneshot(post_json("/api/benchmark", json!({ "iterations": 1 })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["mode"], "proxy_estimate");
}

// =============================================================================
// Reflect, delete, trace
// =============================================================================

#[tokio::test]
async fn test_reflect_delete_and_trace_flow() {
    let harness = Harness::new();

    let reflect = harness
        .app()
        .oneshot(post_json(
            "/api/reflect",
            json!({ "user_id": "u1", "rule": "keep answers short", "priority": 3 }),
        ))
        .await
        .unwrap();
    assert_eq!(reflect.status(), StatusCode::OK);

    let ingest = harness
        .app()
        .oneshot(post_json(
            "/api/events",
            json!({
                "idempotency_key": "turn_h005",
                "user_id": "u1",
                "content_raw": "weekend plans: climbing",
            }),
        ))
        .await
        .unwrap();
    let memory_id = body_json(ingest).await["memory_id"]
        .as_str()
        .unwrap()
        .to_string();

    // Owner can read the trace; another user cannot
    let owner = harness
        .app()
        .oneshot(get(&format!("/api/trace/{memory_id}?user_id=u1")))
        .await
        .unwrap();
    assert_eq!(owner.status(), StatusCode::OK);

    let other = harness
        .app()
        .oneshot(get(&format!("/api/trace/{memory_id}?user_id=u2")))
        .await
        .unwrap();
    assert_eq!(other.status(), StatusCode::FORBIDDEN);

    let admin = harness
        .app()
        .oneshot(get(&format!("/api/trace/{memory_id}?user_id=u2&admin=true")))
        .await
        .unwrap();
    assert_eq!(admin.status(), StatusCode::OK);

    let deletion = harness
        .app()
        .oneshot(post_json("/api/delete_user", json!({ "user_id": "u1" })))
        .await
        .unwrap();
    assert_eq!(deletion.status(), StatusCode::OK);
    let body = body_json(deletion).await;
    assert_eq!(body["report"]["success"], true);
    assert_eq!(body["deletion_proof"].as_str().unwrap().len(), 64);

    let gone = harness
        .app()
        .oneshot(get(&format!("/api/trace/{memory_id}?user_id=u1&admin=true")))
        .await
        .unwrap();
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);
}
