//! The HTTP adapter (spec §6.1): a thin axum layer translating requests
//! into `ContextPool` calls. Mirrors the teacher's `riptide-headless`
//! main.rs routing — `TraceLayer` + `CorsLayer::permissive()`, JSON in and
//! out, errors mapped through one `IntoResponse` impl.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use ctxpool_core::ContextPool;
use ctxpool_types::{PoolError, ScrapeRequest, ScrapeResult};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<ContextPool>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/stats", get(stats))
        .route("/scrape", post(scrape))
        .route("/contexts", post(create_context))
        .route("/contexts/:id", delete(delete_context))
        .route("/contexts/:id/tags", post(update_tags))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Liveness probe. Reports `503` while the pool is `degraded` (spec §4.5
/// step 5: restart retry budget exhausted) so an external load balancer
/// stops routing traffic here until an out-of-band restart succeeds.
async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    if state.pool.stats().await.degraded {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    } else {
        (StatusCode::OK, "ok")
    }
}

async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.pool.stats().await)
}

async fn scrape(
    State(state): State<AppState>,
    Json(request): Json<ScrapeRequest>,
) -> Result<Json<ScrapeResult>, PoolErrorResponse> {
    let result = state.pool.scrape(request).await?;
    Ok(Json(result))
}

#[derive(Deserialize)]
struct CreateContextRequest {
    #[serde(default)]
    tags: BTreeSet<String>,
    #[serde(default)]
    proxy: Option<String>,
    #[serde(default)]
    persistent: bool,
}

#[derive(Serialize)]
struct CreateContextResponse {
    context_id: Uuid,
}

async fn create_context(
    State(state): State<AppState>,
    Json(req): Json<CreateContextRequest>,
) -> Result<Json<CreateContextResponse>, PoolErrorResponse> {
    let context_id = state
        .pool
        .create_context(req.tags, req.proxy, req.persistent)
        .await?;
    Ok(Json(CreateContextResponse { context_id }))
}

async fn delete_context(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, PoolErrorResponse> {
    state.pool.remove_context(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn update_tags(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(tags): Json<BTreeSet<String>>,
) -> Result<StatusCode, PoolErrorResponse> {
    state.pool.add_tags(id, tags).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Wraps `PoolError` so it can be returned directly from a handler; axum
/// only calls `IntoResponse` on the error type of a handler's `Result`.
struct PoolErrorResponse(PoolError);

impl From<PoolError> for PoolErrorResponse {
    fn from(err: PoolError) -> Self {
        Self(err)
    }
}

impl IntoResponse for PoolErrorResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = serde_json::json!({
            "error": self.0.to_string(),
            "kind": self.0.kind(),
        });
        (status, Json(body)).into_response()
    }
}
