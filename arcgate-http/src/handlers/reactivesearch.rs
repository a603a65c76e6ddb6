use std::sync::Arc;

use arcgate::access::index_pattern_matches;
use arcgate::analytics::headers as search_headers;
use arcgate::context::{ForwardedBodyKey, ResponseBodyKey};
use arcgate::identity::Grants;
use arcgate::reactivesearch::{response, schema, translate, RSQuery};
use arcgate::{GatewayError, RequestContext};
use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde_json::Value;

use super::rules::lookup_effects;
use super::{record_analytics, set_search_id, SearchSummary};
use crate::interceptors::{before, body_value, function_request, Before};
use crate::state::AppState;

fn parse_query(body: &[u8]) -> Result<RSQuery, GatewayError> {
    serde_json::from_slice(body)
        .map_err(|e| GatewayError::Validation(format!("invalid ReactiveSearch request: {}", e)))
}

/// Narrow every node's returned fields to what the identity may read.
pub fn restrict_fields(rs: &mut RSQuery, grants: &Grants) {
    if grants.include_fields.is_empty() && grants.exclude_fields.is_empty() {
        return;
    }
    for q in rs.query.iter_mut() {
        if !grants.include_fields.is_empty() {
            let requested = q
                .include_fields
                .take()
                .unwrap_or_default()
                .into_iter()
                .filter(|f| f != "*")
                .filter(|f| index_pattern_matches(&grants.include_fields, f))
                .collect::<Vec<_>>();
            q.include_fields = Some(if requested.is_empty() {
                grants.include_fields.clone()
            } else {
                requested
            });
        }
        if !grants.exclude_fields.is_empty() {
            let mut excludes = q.exclude_fields.take().unwrap_or_default();
            for field in &grants.exclude_fields {
                if !excludes.contains(field) {
                    excludes.push(field.clone());
                }
            }
            q.exclude_fields = Some(excludes);
        }
    }
}

fn term_and_filters(rs: &RSQuery) -> (String, Vec<String>) {
    let filters = rs
        .filters()
        .into_iter()
        .map(|(field, value)| match value {
            Value::String(s) => format!("{}={}", field, s),
            other => format!("{}={}", field, other),
        })
        .collect();
    (rs.search_term().unwrap_or_default(), filters)
}

/// Translate and execute a ReactiveSearch request
#[utoipa::path(
    post,
    path = "/{index}/_reactivesearch",
    tag = "reactivesearch",
    params(("index" = String, Path, description = "Index or alias name")),
    request_body(content = serde_json::Value, description = "ReactiveSearch request"),
    responses(
        (status = 200, description = "Responses keyed by query id", body = serde_json::Value),
        (status = 400, description = "Invalid request")
    ),
    security(("basic_auth" = []))
)]
pub async fn search(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(index): Path<String>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, GatewayError> {
    let rs = parse_query(&body)?;
    let (term, filters) = term_and_filters(&rs);

    let request = function_request(&method, format!("/{}/_reactivesearch", index), &headers, &body);
    let intercepted = match before(&state, &ctx, request, term.clone(), filters.clone()).await? {
        Before::Continue(intercepted) => intercepted,
        Before::Reply(resp) => return Ok(resp),
    };
    let mut rs = if intercepted.request.body == body_value(&body) {
        rs
    } else {
        serde_json::from_value(intercepted.request.body.clone()).map_err(|e| {
            GatewayError::Validation(format!("invalid ReactiveSearch request: {}", e))
        })?
    };
    if let Some(identity) = ctx.identity() {
        restrict_fields(&mut rs, identity.grants());
    }

    let translation = translate(&rs)?;
    let ids = translation.executable_ids();
    let payload = translation.msearch_payload();
    ctx.set::<ForwardedBodyKey>(Bytes::from(payload.clone()));

    let settings = rs.settings.clone().unwrap_or_default();
    let rules = async {
        if settings.query_rules_enabled() && !term.is_empty() {
            lookup_effects(&state, &index, &term).await
        } else {
            None
        }
    };
    let (upstream, effects) = tokio::join!(state.engine.msearch(Some(&index), payload), rules);
    let upstream = upstream?;
    ctx.set::<ResponseBodyKey>(upstream.body.clone());

    let (status, mut composed) = response::compose(&ids, upstream.status, &upstream.body)?;
    if let Some(effects) = &effects {
        effects.apply(&mut composed);
    }

    let search_id = if settings.records_analytics() && status.is_success() {
        let first = ids
            .first()
            .and_then(|id| composed.get(id))
            .cloned()
            .unwrap_or(Value::Null);
        record_analytics(
            &state,
            &ctx,
            &headers,
            SearchSummary {
                query: term,
                filters,
                user_id: settings.user_id.clone(),
                custom_events: settings.custom_events.clone().unwrap_or_default(),
                response: &first,
            },
        )
    } else {
        search_headers::search_id(&headers)
    };

    let (status, out_headers, out_body) = match intercepted
        .after(
            &state,
            status,
            &HeaderMap::new(),
            Bytes::from(composed.to_string()),
        )
        .await?
    {
        Ok(parts) => parts,
        Err(resp) => return Ok(resp),
    };

    let mut resp = (
        status,
        out_headers,
        [(header::CONTENT_TYPE, "application/json; charset=utf-8")],
        out_body,
    )
        .into_response();
    set_search_id(&mut resp, search_id);
    Ok(resp)
}

/// Return the engine `_msearch` payload a request translates to
#[utoipa::path(
    post,
    path = "/{index}/_reactivesearch/validate",
    tag = "reactivesearch",
    params(("index" = String, Path, description = "Index or alias name")),
    request_body(content = serde_json::Value, description = "ReactiveSearch request"),
    responses(
        (status = 200, description = "Newline-delimited msearch payload", body = String),
        (status = 400, description = "Invalid request")
    ),
    security(("basic_auth" = []))
)]
pub async fn validate(
    ctx: RequestContext,
    Path(_index): Path<String>,
    body: Bytes,
) -> Result<Response, GatewayError> {
    let mut rs = parse_query(&body)?;
    if let Some(identity) = ctx.identity() {
        restrict_fields(&mut rs, identity.grants());
    }
    let payload = translate(&rs)?.msearch_payload();
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        payload,
    )
        .into_response())
}

/// JSON schema of the ReactiveSearch request body
#[utoipa::path(
    get,
    path = "/_reactivesearch/schema",
    tag = "reactivesearch",
    responses(
        (status = 200, description = "JSON schema", body = serde_json::Value)
    ),
    security(("basic_auth" = []))
)]
pub async fn query_schema() -> Json<Value> {
    Json(schema::rs_query_schema())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rs(v: Value) -> RSQuery {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn test_restrict_fields_intersects_includes() {
        let mut q = rs(json!({"query": [
            {"id": "a", "dataField": ["title"], "includeFields": ["title", "price"]},
            {"id": "b", "dataField": ["title"]}
        ]}));
        let grants = Grants {
            include_fields: vec!["title".into(), "year".into()],
            exclude_fields: vec!["secret".into()],
            ..Grants::unrestricted()
        };
        restrict_fields(&mut q, &grants);
        assert_eq!(q.query[0].include_fields, Some(vec!["title".to_string()]));
        assert_eq!(
            q.query[1].include_fields,
            Some(vec!["title".to_string(), "year".to_string()])
        );
        assert_eq!(q.query[1].exclude_fields, Some(vec!["secret".to_string()]));
    }

    #[test]
    fn test_term_and_filters() {
        let q = rs(json!({"query": [
            {"id": "s", "type": "search", "dataField": ["title"], "value": "harry"},
            {"id": "t", "type": "term", "dataField": "genre", "value": "fantasy"}
        ]}));
        let (term, filters) = term_and_filters(&q);
        assert_eq!(term, "harry");
        assert_eq!(filters, vec!["genre=fantasy".to_string()]);
    }
}
