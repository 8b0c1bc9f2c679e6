//! HTTP adapter integration tests (spec §6.1), grounded in the teacher's
//! `riptide-api/tests/health_check_test.rs`: build the real router against
//! an in-process pool and drive it with `axum_test::TestServer` rather than
//! mocking the handler functions.

use std::sync::Arc;

use axum_test::TestServer;
use ctxpool_core::{ContextPool, PoolConfig};
use ctxpool_driver::FakeDriver;
use ctxpool_service::{http, AppState};
use serde_json::json;

async fn test_server(max_contexts: usize) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let cfg = PoolConfig {
        max_contexts,
        persistent_contexts_path: dir.path().to_path_buf(),
        ..Default::default()
    };
    let driver = Arc::new(FakeDriver::new());
    let pool = Arc::new(ContextPool::new(cfg, driver).await.unwrap());
    // Keep the tempdir alive for the server's lifetime by leaking it; these
    // are short-lived test processes.
    std::mem::forget(dir);
    let app = http::router(AppState { pool });
    TestServer::new(app).unwrap()
}

#[tokio::test]
async fn healthz_reports_ok_when_not_degraded() {
    let server = test_server(5).await;
    let response = server.get("/healthz").await;
    response.assert_status_ok();
}

#[tokio::test]
async fn scrape_mints_a_context_and_returns_success() {
    let server = test_server(5).await;
    let response = server
        .post("/scrape")
        .json(&json!({"url": "https://a.example/"}))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["success"], true);
}

#[tokio::test]
async fn stats_reflects_pool_state_after_a_scrape() {
    let server = test_server(5).await;
    server
        .post("/scrape")
        .json(&json!({"url": "https://a.example/"}))
        .await
        .assert_status_ok();

    let response = server.get("/stats").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["total_contexts"], 1);
    assert_eq!(body["total_requests"], 1);
}

#[tokio::test]
async fn create_and_delete_context_round_trip() {
    let server = test_server(5).await;
    let create_response = server
        .post("/contexts")
        .json(&json!({"tags": ["premium"]}))
        .await;
    create_response.assert_status_ok();
    let body: serde_json::Value = create_response.json();
    let context_id = body["context_id"].as_str().unwrap().to_string();

    server
        .delete(&format!("/contexts/{context_id}"))
        .await
        .assert_status(axum::http::StatusCode::NO_CONTENT);

    // Deleting an already-deleted context is idempotent (spec §8 P8).
    server
        .delete(&format!("/contexts/{context_id}"))
        .await
        .assert_status(axum::http::StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn unknown_tag_update_returns_pool_error_body() {
    let server = test_server(5).await;
    let missing_id = uuid::Uuid::new_v4();
    let response = server
        .post(&format!("/contexts/{missing_id}/tags"))
        .json(&json!(["eu"]))
        .await;
    response.assert_status(axum::http::StatusCode::BAD_GATEWAY);
    let body: serde_json::Value = response.json();
    assert_eq!(body["kind"], "driver_error");
}
