use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use crate::state::AppState;

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/arc/health",
    tag = "health",
    responses(
        (status = 200, description = "Gateway is healthy", body = serde_json::Value)
    )
)]
pub async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "engine": state.engine.base_url(),
        "pending_logs": state.logs.pending(),
        "pending_analytics": state.analytics.pending(),
        "running_reindex_tasks": state.reindexer.tasks().len(),
        "functions": state.functions.snapshot().len(),
        "build_profile": if cfg!(debug_assertions) { "debug" } else { "release" },
    }))
}

/// Prometheus text exposition
#[utoipa::path(
    get,
    path = "/arc/metrics",
    tag = "health",
    responses(
        (status = 200, description = "Prometheus metrics", body = String)
    )
)]
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
