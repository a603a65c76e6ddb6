use std::sync::Arc;

use arcgate::analytics::headers as search_headers;
use arcgate::context::{ForwardedBodyKey, ResponseBodyKey};
use arcgate::{GatewayError, RequestContext};
use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, Method, Uri},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde_json::Value;

use super::rules::lookup_effects;
use super::{record_analytics, set_search_id, SearchSummary, ORIGIN_HEADER};
use crate::interceptors::{before, function_request, Before};
use crate::state::AppState;

/// Forward any request the gateway has no route of its own for. The
/// upstream status is kept; search responses get query rules applied.
pub async fn proxy(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, GatewayError> {
    let url = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let query = search_headers::search_query(&headers).unwrap_or_default();
    let filters = search_headers::search_filters(&headers);

    let request = function_request(&method, url, &headers, &body);
    let intercepted = match before(&state, &ctx, request, query.clone(), filters.clone()).await? {
        Before::Continue(intercepted) => intercepted,
        Before::Reply(resp) => return Ok(resp),
    };
    let forwarded = intercepted.body();
    ctx.set::<ForwardedBodyKey>(forwarded.clone());

    let is_search = ctx.category().is_some_and(|c| c.is_search());
    let index = ctx.indices().into_iter().next();
    let rules = async {
        match &index {
            Some(index) if is_search && !query.is_empty() => {
                lookup_effects(&state, index, &query).await
            }
            _ => None,
        }
    };
    let upstream = async {
        state
            .engine
            .send(
                intercepted.method()?,
                &intercepted.request.url,
                &intercepted.headers(),
                forwarded,
            )
            .await
    };
    let (upstream, effects) = tokio::join!(upstream, rules);
    let upstream = upstream?;
    ctx.set::<ResponseBodyKey>(upstream.body.clone());

    let (status, mut out_headers, mut out_body) = match intercepted
        .after(&state, upstream.status, &upstream.headers, upstream.body)
        .await?
    {
        Ok(parts) => parts,
        Err(resp) => return Ok(resp),
    };

    let mut parsed: Option<Value> = None;
    if status.is_success() && (is_search || effects.is_some()) {
        parsed = serde_json::from_slice(&out_body).ok();
    }
    if let (Some(effects), Some(body)) = (&effects, parsed.as_mut()) {
        if effects.apply(body) {
            out_body = Bytes::from(body.to_string());
        }
    }

    let search_id = if (is_search && status.is_success())
        || search_headers::interaction(&headers).is_some()
    {
        let empty = Value::Null;
        record_analytics(
            &state,
            &ctx,
            &headers,
            SearchSummary {
                query,
                filters,
                user_id: None,
                custom_events: Default::default(),
                response: parsed.as_ref().unwrap_or(&empty),
            },
        )
    } else {
        None
    };

    out_headers.remove(header::CONTENT_LENGTH);
    out_headers.remove(header::TRANSFER_ENCODING);
    out_headers.insert(ORIGIN_HEADER, HeaderValue::from_static("ES"));
    let mut resp = (status, out_headers, out_body).into_response();
    set_search_id(&mut resp, search_id);
    Ok(resp)
}
