use std::collections::BTreeMap;

use arcgate::analytics::{headers as search_headers, SearchRecord};
use arcgate::context::{AclKey, RemoteIpKey};
use arcgate::functions::{Environment, Reply};
use arcgate::RequestContext;
use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::state::AppState;

pub mod analytics;
pub mod health;
pub mod logs;
pub mod proxy;
pub mod reactivesearch;
pub mod reindex;
pub mod rules;

pub use health::{health, metrics};
pub use proxy::proxy;

pub const ORIGIN_HEADER: &str = "x-origin";

pub(crate) fn json_response(status: StatusCode, body: &Value) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/json; charset=utf-8")],
        body.to_string(),
    )
        .into_response()
}

/// A function's refusal, returned as is.
pub(crate) fn reply_response(reply: Reply) -> Response {
    (
        reply.status,
        [(header::CONTENT_TYPE, "application/json; charset=utf-8")],
        Body::from(reply.body),
    )
        .into_response()
}

/// Headers as a function sees them; repeated values are comma-joined.
pub(crate) fn header_tree(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut out: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        if *name == header::AUTHORIZATION {
            continue;
        }
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        out.entry(name.as_str().to_string())
            .and_modify(|v| {
                v.push_str(", ");
                v.push_str(&value);
            })
            .or_insert(value);
    }
    out
}

pub(crate) fn header_map(tree: &BTreeMap<String, String>) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in tree {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                out.insert(name, value);
            }
            _ => tracing::warn!("[functions] dropping invalid header {}", name),
        }
    }
    out
}

pub(crate) fn function_env(ctx: &RequestContext, query: String, filter: Vec<String>) -> Environment {
    Environment {
        acl: ctx.get::<AclKey>().map(|a| a.to_string()).unwrap_or_default(),
        category: ctx.category().map(|c| c.to_string()).unwrap_or_default(),
        index: ctx.indices(),
        filter,
        query,
        now: Utc::now().timestamp(),
    }
}

/// What a search handler knows about the search it just served.
pub(crate) struct SearchSummary<'a> {
    pub query: String,
    pub filters: Vec<String>,
    pub user_id: Option<String>,
    pub custom_events: Map<String, Value>,
    pub response: &'a Value,
}

/// Record a search session (or an interaction with an earlier one) and
/// return the search id to echo back.
pub(crate) fn record_analytics(
    state: &AppState,
    ctx: &RequestContext,
    headers: &HeaderMap,
    summary: SearchSummary<'_>,
) -> Option<String> {
    if let Some(interaction) = search_headers::interaction(headers) {
        let id = interaction.search_id.clone();
        state.analytics.record_interaction(interaction);
        return Some(id);
    }
    if summary.query.is_empty() && summary.filters.is_empty() {
        return None;
    }

    let search_id = search_headers::search_id(headers).unwrap_or_else(|| Uuid::new_v4().to_string());
    let mut record = SearchRecord::new(search_id.clone(), summary.query, Utc::now())
        .with_response(summary.response, state.analytics.config().hits_snapshot);
    record.indices = ctx.indices();
    record.filters = summary.filters;
    record.user_id = summary.user_id;
    record.ip = ctx.get::<RemoteIpKey>().map(|ip| ip.to_string());
    record.custom_events = summary.custom_events;
    record
        .custom_events
        .extend(search_headers::custom_events(headers));
    state.analytics.record_search(record);
    Some(search_id)
}

pub(crate) fn set_search_id(resp: &mut Response, search_id: Option<String>) {
    if let Some(value) = search_id.and_then(|id| HeaderValue::from_str(&id).ok()) {
        resp.headers_mut().insert(search_headers::SEARCH_ID, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_tree_skips_credentials() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic eDp5"));
        headers.append("x-tag", HeaderValue::from_static("a"));
        headers.append("x-tag", HeaderValue::from_static("b"));
        let tree = header_tree(&headers);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree["x-tag"], "a, b");
        assert_eq!(header_map(&tree)["x-tag"], "a, b");
    }
}
