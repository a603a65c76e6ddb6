use std::collections::HashMap;
use std::sync::Arc;

use arcgate::analytics::{run_view, View, ViewParams};
use arcgate::GatewayError;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::Value;

use crate::state::AppState;

/// Aggregated analytics view
#[utoipa::path(
    get,
    path = "/_analytics/{view}",
    tag = "analytics",
    params(
        ("view" = String, Path, description = "popularsearches, noresultssearches, summary, popularfilters, popularresults, overview, advanced, geoip or latency"),
        ("from" = Option<String>, Query, description = "Start date (YYYY-MM-DD)"),
        ("to" = Option<String>, Query, description = "End date (YYYY-MM-DD)"),
        ("size" = Option<usize>, Query, description = "Number of buckets")
    ),
    responses(
        (status = 200, description = "View result", body = serde_json::Value),
        (status = 404, description = "Unknown view")
    ),
    security(("basic_auth" = []))
)]
pub async fn view(
    State(state): State<Arc<AppState>>,
    Path(view): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, GatewayError> {
    let view: View = view.parse()?;
    let params = ViewParams::from_query(&params)?;
    let index = &state.analytics.config().index;
    Ok(Json(run_view(&state.engine, index, view, &params).await?))
}
