use std::sync::Arc;

use arcgate::reindex::{ReindexConfig, ReindexOutcome, TaskTicket};
use arcgate::{GatewayError, RequestContext};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Response,
    Json,
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;

use super::json_response;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ReindexParams {
    #[serde(default)]
    pub wait_for_completion: Option<bool>,
}

fn parse_config(body: &[u8]) -> Result<ReindexConfig, GatewayError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(ReindexConfig::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| GatewayError::Validation(format!("invalid reindex config: {}", e)))
}

fn outcome_response(outcome: ReindexOutcome) -> Response {
    match outcome {
        ReindexOutcome::Completed {
            source,
            destination,
            operation,
            aliases,
        } => json_response(
            StatusCode::OK,
            &json!({
                "acknowledged": true,
                "source": source,
                "destination": destination,
                "operation": operation,
                "aliases": aliases,
            }),
        ),
        ReindexOutcome::Accepted(ticket) => json_response(
            StatusCode::ACCEPTED,
            &json!({
                "acknowledged": true,
                "taskId": ticket.task_id,
                "source": ticket.source,
                "destination": ticket.destination,
                "operation": ticket.operation,
            }),
        ),
    }
}

async fn run(
    state: &AppState,
    ctx: &RequestContext,
    source: &str,
    destination: Option<String>,
    params: ReindexParams,
    body: &[u8],
) -> Result<Response, GatewayError> {
    let config = parse_config(body)?;
    let outcome = state
        .reindexer
        .reindex(
            &ctx.tenant(),
            source,
            destination,
            config,
            params.wait_for_completion.unwrap_or(true),
        )
        .await?;
    Ok(outcome_response(outcome))
}

/// Reindex into an auto-named index that replaces the source
#[utoipa::path(
    post,
    path = "/_reindex/{source}",
    tag = "reindex",
    params(
        ("source" = String, Path, description = "Source index or alias"),
        ("wait_for_completion" = Option<bool>, Query, description = "Block until the copy finishes (default true)")
    ),
    request_body(content = serde_json::Value, description = "Reindex config"),
    responses(
        (status = 200, description = "Reindex finished", body = serde_json::Value),
        (status = 202, description = "Reindex running as a task", body = serde_json::Value),
        (status = 400, description = "Invalid config or ambiguous alias")
    ),
    security(("basic_auth" = []))
)]
pub async fn reindex(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(source): Path<String>,
    Query(params): Query<ReindexParams>,
    body: Bytes,
) -> Result<Response, GatewayError> {
    run(&state, &ctx, &source, None, params, &body).await
}

/// Copy a source index into a named destination, keeping the source
#[utoipa::path(
    post,
    path = "/_reindex/{source}/{destination}",
    tag = "reindex",
    params(
        ("source" = String, Path, description = "Source index or alias"),
        ("destination" = String, Path, description = "Destination index"),
        ("wait_for_completion" = Option<bool>, Query, description = "Block until the copy finishes (default true)")
    ),
    request_body(content = serde_json::Value, description = "Reindex config"),
    responses(
        (status = 200, description = "Reindex finished", body = serde_json::Value),
        (status = 202, description = "Reindex running as a task", body = serde_json::Value)
    ),
    security(("basic_auth" = []))
)]
pub async fn clone_index(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path((source, destination)): Path<(String, String)>,
    Query(params): Query<ReindexParams>,
    body: Bytes,
) -> Result<Response, GatewayError> {
    run(&state, &ctx, &source, Some(destination), params, &body).await
}

/// Asynchronous reindex tasks still running
#[utoipa::path(
    get,
    path = "/_reindex/tasks",
    tag = "reindex",
    responses(
        (status = 200, description = "Running tasks", body = serde_json::Value)
    ),
    security(("basic_auth" = []))
)]
pub async fn list_tasks(State(state): State<Arc<AppState>>) -> Json<Vec<TaskTicket>> {
    Json(state.reindexer.tasks().list())
}
