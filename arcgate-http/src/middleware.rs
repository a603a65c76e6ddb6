use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use arcgate::access::{self, Cidr};
use arcgate::classify::classify as classify_request;
use arcgate::context::{
    AclKey, CategoryKey, CredentialKindKey, IdentityKey, IndicesKey, OperationKey, RemoteIpKey,
    RequestBodyKey, RequestIdKey, StartTimeKey, TenantKey,
};
use arcgate::identity::{verify_password, Identity};
use arcgate::routes::clean_path;
use arcgate::types::{Acl, Category};
use arcgate::{GatewayError, RequestContext, DEFAULT_TENANT};
use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderValue, Uri},
    middleware::Next,
    response::Response,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use uuid::Uuid;

use crate::state::AppState;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

type MwResult = Result<Response, GatewayError>;

/// The context attached by [`request_id`].
pub fn context(req: &Request) -> Result<RequestContext, GatewayError> {
    req.extensions()
        .get::<RequestContext>()
        .cloned()
        .ok_or_else(|| GatewayError::Internal("request context missing".to_string()))
}

/// Create the request context and echo its id on the response.
pub async fn request_id(State(state): State<Arc<AppState>>, mut req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let ctx = RequestContext::new();
    ctx.set::<RequestIdKey>(id.clone());
    ctx.set::<StartTimeKey>(Utc::now());
    ctx.set::<TenantKey>(tenant_for(state.config.multi_tenant, req.headers()));
    if let Some(ip) = remote_ip(&req, &state.config.trusted_proxies) {
        ctx.set::<RemoteIpKey>(ip);
    }
    req.extensions_mut().insert(ctx);

    let mut resp = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        resp.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    resp
}

fn tenant_for(multi_tenant: bool, headers: &HeaderMap) -> String {
    if !multi_tenant {
        return DEFAULT_TENANT.to_string();
    }
    headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .map(|h| h.split(':').next().unwrap_or(h).to_ascii_lowercase())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| DEFAULT_TENANT.to_string())
}

/// Socket peer, or the forwarded client when the peer is a trusted proxy.
fn remote_ip(req: &Request, trusted: &[Cidr]) -> Option<IpAddr> {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip());
    let forwarded = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok());
    access::client_ip(peer, forwarded, trusted)
}

/// Classify the request and snapshot its body.
pub async fn classify(State(state): State<Arc<AppState>>, req: Request, next: Next) -> MwResult {
    let ctx = context(&req)?;
    let (parts, body) = req.into_parts();
    let bytes = axum::body::to_bytes(body, state.config.max_body_bytes)
        .await
        .map_err(|e| GatewayError::Validation(format!("failed to read request body: {}", e)))?;

    let path = clean_path(parts.uri.path());
    let c = classify_request(
        &state.routes,
        &parts.method,
        &path,
        parts.uri.query(),
        &bytes,
    );
    tracing::debug!(
        request_id = %ctx.request_id(),
        category = %c.category,
        acl = %c.acl,
        operation = %c.operation,
        route = %c.template,
        "classified request"
    );

    ctx.set::<CategoryKey>(c.category);
    ctx.set::<AclKey>(c.acl);
    ctx.set::<OperationKey>(c.operation);
    ctx.set::<IndicesKey>(c.indices);
    ctx.set::<RequestBodyKey>(bytes.clone());

    Ok(next.run(Request::from_parts(parts, Body::from(bytes))).await)
}

/// `Authorization: Basic` credentials.
pub fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let raw = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = raw.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = BASE64.decode(encoded.trim()).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (user, pass) = text.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

async fn resolve_identity(
    state: &AppState,
    username: &str,
    password: &str,
) -> Result<Arc<Identity>, GatewayError> {
    let invalid = || GatewayError::Unauthorized("invalid username or password".to_string());

    if let Some(master) = state.master.as_ref().filter(|m| m.id() == username) {
        return if verify_password(master.password(), password) {
            Ok(master.clone())
        } else {
            Err(invalid())
        };
    }

    match state.identities.lookup(username).await? {
        Some(identity) if verify_password(identity.password(), password) => Ok(Arc::new(identity)),
        Some(_) => Err(invalid()),
        None => Err(invalid()),
    }
}

/// Resolve Basic credentials to exactly one identity.
pub async fn authenticate(State(state): State<Arc<AppState>>, req: Request, next: Next) -> MwResult {
    let ctx = context(&req)?;
    let (username, password) = basic_credentials(req.headers()).ok_or_else(|| {
        GatewayError::Unauthorized("basic auth credentials are required".to_string())
    })?;
    let identity = resolve_identity(&state, &username, &password).await?;
    ctx.set::<CredentialKindKey>(identity.kind());
    ctx.set::<IdentityKey>(identity);
    Ok(next.run(req).await)
}

fn identity_of(ctx: &RequestContext) -> Result<Arc<Identity>, GatewayError> {
    ctx.identity()
        .ok_or_else(|| GatewayError::Unauthorized("request is not authenticated".to_string()))
}

pub async fn rate_limit(State(state): State<Arc<AppState>>, req: Request, next: Next) -> MwResult {
    let ctx = context(&req)?;
    let identity = identity_of(&ctx)?;
    state
        .limiter
        .check(&identity, ctx.get::<RemoteIpKey>())
        .await?;
    Ok(next.run(req).await)
}

/// Every authorization gate, in order.
pub async fn authorize(State(_state): State<Arc<AppState>>, req: Request, next: Next) -> MwResult {
    let ctx = context(&req)?;
    let identity = identity_of(&ctx)?;
    let referer = req
        .headers()
        .get(header::REFERER)
        .and_then(|v| v.to_str().ok());

    access::check_source(&identity, ctx.get::<RemoteIpKey>())?;
    access::check_referer(&identity, referer)?;
    access::check_indices(&identity, &ctx.indices())?;
    if let Some(category) = ctx.category() {
        access::check_category(&identity, category)?;
    }
    if let Some(op) = ctx.get::<OperationKey>() {
        access::check_operation(&identity, op)?;
    }
    if let Some(acl) = ctx.get::<AclKey>() {
        access::check_acl(&identity, acl)?;
    }
    access::check_expiry(&identity, Utc::now())?;
    Ok(next.run(req).await)
}

fn filters_source(category: Category) -> bool {
    matches!(
        category,
        Category::Search
            | Category::Doc
            | Category::Source
            | Category::Get
            | Category::Mget
            | Category::Explain
    )
}

/// Narrow returned `_source` to the identity's include/exclude fields.
/// ReactiveSearch bodies are filtered by the translator handler instead.
pub async fn source_filter(
    State(_state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> MwResult {
    let ctx = context(&req)?;
    let identity = identity_of(&ctx)?;
    let grants = identity.grants();
    let applies = ctx.category().is_some_and(filters_source)
        && ctx.get::<AclKey>() != Some(Acl::Streams);
    if applies && (!grants.include_fields.is_empty() || !grants.exclude_fields.is_empty()) {
        let uri = with_source_params(req.uri(), &grants.include_fields, &grants.exclude_fields)?;
        *req.uri_mut() = uri;
    }
    Ok(next.run(req).await)
}

/// Append `_source_includes`/`_source_excludes` to the query string.
pub fn with_source_params(
    uri: &Uri,
    include: &[String],
    exclude: &[String],
) -> Result<Uri, GatewayError> {
    let mut query = url::form_urlencoded::Serializer::new(String::new());
    if let Some(existing) = uri.query() {
        for (k, v) in url::form_urlencoded::parse(existing.as_bytes()) {
            if k != "_source_includes" && k != "_source_excludes" {
                query.append_pair(&k, &v);
            }
        }
    }
    if !include.is_empty() {
        query.append_pair("_source_includes", &include.join(","));
    }
    if !exclude.is_empty() {
        query.append_pair("_source_excludes", &exclude.join(","));
    }
    let rebuilt = format!("{}?{}", uri.path(), query.finish());
    rebuilt
        .parse()
        .map_err(|e| GatewayError::Internal(format!("failed to rebuild uri: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_credentials() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Basic Zm9vOmJhcjpiYXo="),
        );
        assert_eq!(
            basic_credentials(&headers),
            Some(("foo".to_string(), "bar:baz".to_string()))
        );

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(basic_credentials(&headers), None);
    }

    #[test]
    fn test_tenant_from_host() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("Shop.Example.com:8000"));
        assert_eq!(tenant_for(true, &headers), "shop.example.com");
        assert_eq!(tenant_for(false, &headers), DEFAULT_TENANT);
    }

    #[test]
    fn test_source_params_replace_existing() {
        let uri: Uri = "/books/_search?q=x&_source_includes=all".parse().unwrap();
        let out = with_source_params(&uri, &["title".into(), "year".into()], &[]).unwrap();
        assert_eq!(out.to_string(), "/books/_search?q=x&_source_includes=title%2Cyear");
    }
}
