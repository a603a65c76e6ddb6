//! Before/after function interception around a handler's engine call.

use std::sync::Arc;

use arcgate::functions::{
    run_after, run_before, Environment, Function, FunctionRequest, FunctionResponse, Outcome,
};
use arcgate::{GatewayError, RequestContext};
use axum::{
    http::{HeaderMap, Method, StatusCode},
    response::Response,
};
use bytes::Bytes;
use serde_json::Value;

use crate::handlers::{function_env, header_map, header_tree, reply_response};
use crate::state::AppState;

/// Request as rewritten by the before-functions.
pub struct Intercepted {
    pub request: FunctionRequest,
    env: Environment,
    functions: Arc<Vec<Function>>,
}

pub enum Before {
    Continue(Intercepted),
    /// A function refused the request.
    Reply(Response),
}

/// Body as a function sees it: parsed JSON, else the raw text.
pub fn body_value(body: &[u8]) -> Value {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Value::Null;
    }
    serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}

pub fn body_bytes(value: &Value) -> Bytes {
    match value {
        Value::Null => Bytes::new(),
        Value::String(text) => Bytes::from(text.clone()),
        other => Bytes::from(other.to_string()),
    }
}

impl Intercepted {
    pub fn method(&self) -> Result<Method, GatewayError> {
        Method::from_bytes(self.request.method.as_bytes()).map_err(|_| {
            GatewayError::Validation(format!("invalid method {}", self.request.method))
        })
    }

    pub fn headers(&self) -> HeaderMap {
        header_map(&self.request.headers)
    }

    pub fn body(&self) -> Bytes {
        body_bytes(&self.request.body)
    }

    /// Run the after-functions over an engine response.
    pub async fn after(
        &self,
        state: &AppState,
        status: StatusCode,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<Result<(StatusCode, HeaderMap, Bytes), Response>, GatewayError> {
        if !self.functions.iter().any(|f| !f.executes_before()) {
            return Ok(Ok((status, headers.clone(), body)));
        }
        let mut response = FunctionResponse {
            code: status.as_u16(),
            headers: header_tree(headers),
            body: body_value(&body),
        };
        match run_after(
            &self.functions,
            state.invoker.as_ref(),
            &self.env,
            &self.request,
            &mut response,
        )
        .await?
        {
            Outcome::Reject(reply) => Ok(Err(reply_response(reply))),
            Outcome::Continue => {
                let status = StatusCode::from_u16(response.code).map_err(|_| {
                    GatewayError::Internal(format!("function set invalid status {}", response.code))
                })?;
                Ok(Ok((status, header_map(&response.headers), body_bytes(&response.body))))
            }
        }
    }
}

/// The request as a function sees it.
pub fn function_request(method: &Method, url: String, headers: &HeaderMap, body: &[u8]) -> FunctionRequest {
    FunctionRequest {
        url,
        method: method.to_string(),
        headers: header_tree(headers),
        body: body_value(body),
    }
}

/// Run the before-functions over an inbound request.
pub async fn before(
    state: &AppState,
    ctx: &RequestContext,
    request: FunctionRequest,
    query: String,
    filters: Vec<String>,
) -> Result<Before, GatewayError> {
    let mut intercepted = Intercepted {
        request,
        env: function_env(ctx, query, filters),
        functions: state.functions.snapshot(),
    };
    if intercepted.functions.is_empty() {
        return Ok(Before::Continue(intercepted));
    }
    match run_before(
        &intercepted.functions,
        state.invoker.as_ref(),
        &intercepted.env,
        &mut intercepted.request,
    )
    .await?
    {
        Outcome::Continue => Ok(Before::Continue(intercepted)),
        Outcome::Reject(reply) => Ok(Before::Reply(reply_response(reply))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_body_value_keeps_ndjson_text() {
        let ndjson = b"{\"index\":\"a\"}\n{\"query\":{}}\n";
        let value = body_value(ndjson);
        assert!(value.is_string());
        assert_eq!(body_bytes(&value), Bytes::from_static(ndjson));

        assert_eq!(body_value(b"{\"a\":1}"), json!({"a": 1}));
        assert_eq!(body_value(b"  "), Value::Null);
        assert!(body_bytes(&Value::Null).is_empty());
    }
}
