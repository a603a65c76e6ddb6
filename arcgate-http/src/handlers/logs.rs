use std::collections::HashMap;
use std::sync::Arc;

use arcgate::logs::{get_log, search_logs, LogQuery};
use arcgate::GatewayError;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::Value;

use crate::state::AppState;

/// Search logged requests across every index
#[utoipa::path(
    get,
    path = "/_logs",
    tag = "logs",
    params(
        ("filter" = Option<String>, Query, description = "search, delete, success or error"),
        ("start_date" = Option<String>, Query, description = "Earliest timestamp"),
        ("end_date" = Option<String>, Query, description = "Latest timestamp"),
        ("start_latency" = Option<u64>, Query, description = "Minimum took (ms)"),
        ("end_latency" = Option<u64>, Query, description = "Maximum took (ms)"),
        ("size" = Option<usize>, Query, description = "Page size"),
        ("offset" = Option<usize>, Query, description = "Page offset")
    ),
    responses(
        (status = 200, description = "Matching log records", body = serde_json::Value),
        (status = 400, description = "Invalid parameters")
    ),
    security(("basic_auth" = []))
)]
pub async fn list_logs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, GatewayError> {
    run(&state, &params, None).await
}

/// Search logged requests of one index
#[utoipa::path(
    get,
    path = "/{index}/_logs",
    tag = "logs",
    params(("index" = String, Path, description = "Index name")),
    responses(
        (status = 200, description = "Matching log records", body = serde_json::Value)
    ),
    security(("basic_auth" = []))
)]
pub async fn index_logs(
    State(state): State<Arc<AppState>>,
    Path(index): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, GatewayError> {
    run(&state, &params, Some(&index)).await
}

/// Get one log record by request id
#[utoipa::path(
    get,
    path = "/log/{id}",
    tag = "logs",
    params(("id" = String, Path, description = "Request id")),
    responses(
        (status = 200, description = "Log record", body = serde_json::Value),
        (status = 404, description = "No such record")
    ),
    security(("basic_auth" = []))
)]
pub async fn get_log_record(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, GatewayError> {
    Ok(Json(
        get_log(&state.engine, &state.config.logs_index, &id).await?,
    ))
}

async fn run(
    state: &AppState,
    params: &HashMap<String, String>,
    index: Option<&str>,
) -> Result<Json<Value>, GatewayError> {
    let query = LogQuery::from_params(params, index)?;
    Ok(Json(
        search_logs(&state.engine, &state.config.logs_index, &query).await?,
    ))
}
