use std::sync::Arc;

use arcgate::rules::{Rule, RuleEffects};
use arcgate::GatewayError;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Response,
    Json,
};
use serde_json::{json, Value};

use super::json_response;
use crate::state::AppState;

/// Percolate `term` against the index's rules and prepare their effects.
/// Lookup failures skip rule application.
pub(crate) async fn lookup_effects(
    state: &AppState,
    index: &str,
    term: &str,
) -> Option<RuleEffects> {
    let rules = match state.rules.percolate(index, term).await {
        Ok(rules) => rules,
        Err(e) => {
            tracing::warn!("[rules] percolation failed for {}: {}", index, e);
            return None;
        }
    };
    if rules.is_empty() {
        return None;
    }
    let mut effects = RuleEffects::from_rules(&rules);
    if effects.is_empty() {
        return None;
    }
    effects.fetch_pinned_docs(&state.engine, index).await;
    tracing::debug!(
        index = %index,
        rules = ?effects.applied_rules,
        "[rules] applying query rules"
    );
    Some(effects)
}

/// Get a rule by ID
#[utoipa::path(
    get,
    path = "/{index}/_rule/{id}",
    tag = "rules",
    params(
        ("index" = String, Path, description = "Index name"),
        ("id" = String, Path, description = "Rule ID")
    ),
    responses(
        (status = 200, description = "Rule retrieved", body = serde_json::Value),
        (status = 404, description = "Rule not found")
    ),
    security(("basic_auth" = []))
)]
pub async fn get_rule(
    State(state): State<Arc<AppState>>,
    Path((index, id)): Path<(String, String)>,
) -> Result<Json<Rule>, GatewayError> {
    state
        .rules
        .get(&index, &id)
        .await?
        .map(Json)
        .ok_or_else(|| GatewayError::NotFound(format!("rule {} not found", id)))
}

/// Create or update a rule
#[utoipa::path(
    put,
    path = "/{index}/_rule/{id}",
    tag = "rules",
    params(
        ("index" = String, Path, description = "Index name"),
        ("id" = String, Path, description = "Rule ID")
    ),
    request_body(content = serde_json::Value, description = "Rule data"),
    responses(
        (status = 200, description = "Rule saved", body = serde_json::Value),
        (status = 400, description = "Invalid rule")
    ),
    security(("basic_auth" = []))
)]
pub async fn save_rule(
    State(state): State<Arc<AppState>>,
    Path((index, id)): Path<(String, String)>,
    Json(raw): Json<Value>,
) -> Result<Response, GatewayError> {
    let rule = Rule::from_client(&id, raw)?;
    state.rules.put(&index, &rule).await?;
    Ok(json_response(
        StatusCode::OK,
        &json!({ "id": rule.id, "index": index, "result": "saved" }),
    ))
}

/// Delete a rule
#[utoipa::path(
    delete,
    path = "/{index}/_rule/{id}",
    tag = "rules",
    params(
        ("index" = String, Path, description = "Index name"),
        ("id" = String, Path, description = "Rule ID")
    ),
    responses(
        (status = 200, description = "Rule deleted", body = serde_json::Value),
        (status = 404, description = "Rule not found")
    ),
    security(("basic_auth" = []))
)]
pub async fn delete_rule(
    State(state): State<Arc<AppState>>,
    Path((index, id)): Path<(String, String)>,
) -> Result<Response, GatewayError> {
    if !state.rules.delete(&index, &id).await? {
        return Err(GatewayError::NotFound(format!("rule {} not found", id)));
    }
    Ok(json_response(
        StatusCode::OK,
        &json!({ "id": id, "index": index, "result": "deleted" }),
    ))
}

/// List the rules of an index
#[utoipa::path(
    get,
    path = "/{index}/_rules",
    tag = "rules",
    params(("index" = String, Path, description = "Index name")),
    responses(
        (status = 200, description = "Rules of the index", body = serde_json::Value)
    ),
    security(("basic_auth" = []))
)]
pub async fn list_rules(
    State(state): State<Arc<AppState>>,
    Path(index): Path<String>,
) -> Result<Json<Vec<Rule>>, GatewayError> {
    Ok(Json(state.rules.list(&index).await?))
}
