//! Response recorder: buffers the response, hands it to the client unchanged
//! and builds the log record off the request path.

use std::sync::Arc;

use arcgate::context::{
    AclKey, ForwardedBodyKey, RequestBodyKey, ResponseBodyKey, StartTimeKey,
};
use arcgate::logs::{diff_bodies, LogRecord, LogWriter, LoggedRequest, LoggedResponse, CLIENT_CLOSED_REQUEST};
use arcgate::reactivesearch::response::extract_took;
use arcgate::types::Acl;
use arcgate::{GatewayError, RequestContext};
use axum::{
    body::Body,
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use bytes::Bytes;
use chrono::Utc;

use crate::middleware::context;
use crate::state::AppState;

/// What is known about a request before its response exists.
struct Pending {
    ctx: RequestContext,
    uri: String,
    method: String,
    headers: HeaderMap,
    diffing: bool,
}

impl Pending {
    fn into_record(self, code: u16, headers: &HeaderMap, body: &[u8]) -> LogRecord {
        let request_body = self.ctx.get::<RequestBodyKey>().unwrap_or_default();
        let took = serde_json::from_slice(body)
            .ok()
            .and_then(|v| extract_took(&v))
            .or_else(|| {
                self.ctx.get::<StartTimeKey>().map(|start| {
                    (Utc::now() - start).num_milliseconds().max(0) as u64
                })
            });

        let (request_changes, response_changes) = if self.diffing {
            (
                self.ctx
                    .get::<ForwardedBodyKey>()
                    .map(|sent| diff_bodies(&request_body, &sent))
                    .filter(|c| !c.is_empty()),
                self.ctx
                    .get::<ResponseBodyKey>()
                    .map(|upstream| diff_bodies(&upstream, body))
                    .filter(|c| !c.is_empty()),
            )
        } else {
            (None, None)
        };

        LogRecord {
            id: self.ctx.request_id(),
            indices: self.ctx.indices(),
            category: self
                .ctx
                .category()
                .map(|c| c.to_string())
                .unwrap_or_default(),
            acl: self
                .ctx
                .get::<AclKey>()
                .map(|a| a.to_string())
                .unwrap_or_default(),
            request: LoggedRequest::new(&self.uri, &self.method, &self.headers, &request_body),
            response: LoggedResponse::new(code, headers, body, took),
            timestamp: self.ctx.get::<StartTimeKey>().unwrap_or_else(Utc::now),
            request_changes,
            response_changes,
        }
    }
}

/// Emits a 499 record when dropped while still armed.
struct CancelGuard {
    logs: LogWriter,
    pending: Option<Pending>,
}

impl CancelGuard {
    fn disarm(&mut self) -> Option<Pending> {
        self.pending.take()
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            tracing::debug!("[recorder] request {} cancelled", pending.ctx.request_id());
            let record = pending.into_record(CLIENT_CLOSED_REQUEST, &HeaderMap::new(), &[]);
            self.logs.submit(record);
        }
    }
}

/// Streams are classified from `?stream=true`, never from client headers.
fn is_stream(ctx: &RequestContext) -> bool {
    ctx.get::<AclKey>() == Some(Acl::Streams)
}

pub async fn record(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    let ctx = context(&req)?;
    if is_stream(&ctx) {
        return Ok(next.run(req).await);
    }

    let mut guard = CancelGuard {
        logs: state.logs.clone(),
        pending: Some(Pending {
            ctx,
            uri: req.uri().to_string(),
            method: req.method().to_string(),
            headers: req.headers().clone(),
            diffing: state.config.enable_diffing,
        }),
    };

    let resp = next.run(req).await;
    let (parts, body) = resp.into_parts();
    let bytes: Bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(b) => b,
        Err(e) => {
            // The guard still holds the request and records a 499 on drop.
            return Err(GatewayError::Internal(format!(
                "failed to buffer response: {}",
                e
            )));
        }
    };

    if let Some(pending) = guard.disarm() {
        let logs = state.logs.clone();
        let code = parts.status.as_u16();
        let headers = parts.headers.clone();
        let body = bytes.clone();
        tokio::spawn(async move {
            logs.submit(pending.into_record(code, &headers, &body));
        });
    }

    Ok(Response::from_parts(parts, Body::from(bytes)))
}
