//! Before/after interceptors backed by external stateless functions.

pub mod expr;
pub mod invoke;
pub mod types;

use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::Notify;

pub use expr::{parse_expression, Environment, Expr};
pub use invoke::{
    DisabledInvoker, FunctionInvoker, FunctionOutput, FunctionRequest, FunctionResponse,
    Invocation, OpenFaasInvoker, Reply,
};
pub use types::{Function, Trigger, TriggerType};

use crate::engine::EngineClient;
use crate::error::{GatewayError, Result};

const MAX_FUNCTIONS: usize = 1000;

/// Immutable snapshot of the deployed functions, swapped wholesale on
/// refresh. Readers hold their `Arc` for the duration of a request.
#[derive(Default)]
pub struct FunctionCache {
    snapshot: RwLock<Arc<Vec<Function>>>,
}

impl FunctionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<Vec<Function>> {
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn replace(&self, functions: Vec<Function>) {
        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(functions);
    }

    /// Reload every function document, keeping index order.
    pub async fn refresh(&self, engine: &EngineClient, index: &str) -> Result<usize> {
        let body = json!({
            "size": MAX_FUNCTIONS,
            "query": { "match_all": {} },
            "sort": ["_doc"]
        });
        let resp = match engine.search(index, &body).await {
            Ok(resp) => resp,
            Err(GatewayError::NotFound(_)) => {
                self.replace(Vec::new());
                return Ok(0);
            }
            Err(e) => return Err(e),
        };
        let mut functions = Vec::new();
        for hit in resp
            .pointer("/hits/hits")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            let mut source = hit.get("_source").cloned().unwrap_or_else(|| json!({}));
            if source.get("name").is_none() && source.get("service").is_none() {
                if let Some(id) = hit.get("_id") {
                    source["name"] = id.clone();
                }
            }
            match serde_json::from_value::<Function>(source) {
                Ok(f) => functions.push(f),
                Err(e) => tracing::warn!("[functions] skipping malformed function: {}", e),
            }
        }
        let count = functions.len();
        self.replace(functions);
        Ok(count)
    }

    /// Refresh on a fixed interval until `shutdown` fires.
    pub async fn run_refresh_loop(
        self: Arc<Self>,
        engine: EngineClient,
        index: String,
        interval: Duration,
        shutdown: Arc<Notify>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.refresh(&engine, &index).await {
                        Ok(n) => tracing::debug!("[functions] refreshed {} functions", n),
                        Err(e) => tracing::error!("[functions] refresh failed: {}", e),
                    }
                }
                _ = shutdown.notified() => break,
            }
        }
    }
}

/// Result of running an interceptor stage.
#[derive(Debug)]
pub enum Outcome {
    Continue,
    /// A function refused the request; its reply becomes the response.
    Reject(Reply),
}

async fn call(
    invoker: &dyn FunctionInvoker,
    function: &Function,
    env: &Environment,
    request: &FunctionRequest,
    response: Option<&FunctionResponse>,
) -> Result<std::result::Result<FunctionOutput, Reply>> {
    let payload = serde_json::to_value(Invocation {
        extra_request_payload: function.extra_request_payload.as_ref(),
        environments: env,
        request: Some(request),
        response,
    })?;
    let reply = invoker.invoke(&function.name, &payload).await?;
    if !reply.status.is_success() {
        tracing::debug!(
            function = %function.name,
            status = reply.status.as_u16(),
            "[functions] function rejected the request"
        );
        return Ok(Err(reply));
    }
    if reply.body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Ok(FunctionOutput::default()));
    }
    let output = serde_json::from_slice(&reply.body).map_err(|e| {
        GatewayError::Internal(format!(
            "function {} returned an invalid reply: {}",
            function.name, e
        ))
    })?;
    Ok(Ok(output))
}

/// Run every applicable before-function in order, folding each one's
/// changes into `request`.
pub async fn run_before(
    functions: &[Function],
    invoker: &dyn FunctionInvoker,
    env: &Environment,
    request: &mut FunctionRequest,
) -> Result<Outcome> {
    for function in functions.iter().filter(|f| f.executes_before()) {
        if !function.applies(env)? {
            continue;
        }
        match call(invoker, function, env, request, None).await? {
            Ok(output) => {
                if let Some(patch) = output.request {
                    patch.apply(request);
                }
            }
            Err(reply) => return Ok(Outcome::Reject(reply)),
        }
    }
    Ok(Outcome::Continue)
}

/// Run every applicable after-function in order, folding each one's
/// changes into `response`.
pub async fn run_after(
    functions: &[Function],
    invoker: &dyn FunctionInvoker,
    env: &Environment,
    request: &FunctionRequest,
    response: &mut FunctionResponse,
) -> Result<Outcome> {
    for function in functions.iter().filter(|f| !f.executes_before()) {
        if !function.applies(env)? {
            continue;
        }
        match call(invoker, function, env, request, Some(response)).await? {
            Ok(output) => {
                if let Some(patch) = output.response {
                    patch.apply(response);
                }
            }
            Err(reply) => return Ok(Outcome::Reject(reply)),
        }
    }
    Ok(Outcome::Continue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use http::StatusCode;
    use std::sync::Mutex;

    struct Scripted {
        calls: Mutex<Vec<(String, Value)>>,
        reply: fn(&str, &Value) -> Reply,
    }

    #[async_trait]
    impl FunctionInvoker for Scripted {
        async fn invoke(&self, name: &str, payload: &Value) -> Result<Reply> {
            self.calls
                .lock()
                .unwrap()
                .push((name.to_string(), payload.clone()));
            Ok((self.reply)(name, payload))
        }
    }

    fn ok(body: Value) -> Reply {
        Reply {
            status: StatusCode::OK,
            body: Bytes::from(body.to_string()),
        }
    }

    fn function(v: Value) -> Function {
        serde_json::from_value(v).unwrap()
    }

    fn env() -> Environment {
        Environment {
            acl: "search".into(),
            category: "search".into(),
            index: vec!["books".into()],
            query: "harry".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_before_functions_chain_in_order() {
        let invoker = Scripted {
            calls: Mutex::new(Vec::new()),
            reply: |name, payload| match name {
                "first" => ok(json!({"request": {"headers": {"x-first": "1"}}})),
                _ => {
                    let seen = payload["request"]["headers"]["x-first"].clone();
                    ok(json!({"request": {"body": {"seen": seen}}}))
                }
            },
        };
        let functions = vec![
            function(json!({"name": "first", "trigger": {"executeBefore": true}})),
            function(json!({"name": "after-only"})),
            function(json!({"name": "second", "trigger": {"executeBefore": true}})),
        ];
        let mut request = FunctionRequest {
            url: "/books/_search".into(),
            method: "POST".into(),
            ..Default::default()
        };
        let outcome = run_before(&functions, &invoker, &env(), &mut request)
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::Continue));
        assert_eq!(request.body, json!({"seen": "1"}));
        let calls = invoker.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].1["environments"]["acl"], "search");
    }

    #[tokio::test]
    async fn test_rejecting_function_stops_chain() {
        let invoker = Scripted {
            calls: Mutex::new(Vec::new()),
            reply: |_, _| Reply {
                status: StatusCode::FORBIDDEN,
                body: Bytes::from_static(b"{\"error\":\"blocked\"}"),
            },
        };
        let functions = vec![
            function(json!({"name": "guard"})),
            function(json!({"name": "never"})),
        ];
        let mut response = FunctionResponse {
            code: 200,
            ..Default::default()
        };
        let outcome = run_after(
            &functions,
            &invoker,
            &env(),
            &FunctionRequest::default(),
            &mut response,
        )
        .await
        .unwrap();
        match outcome {
            Outcome::Reject(reply) => assert_eq!(reply.status, StatusCode::FORBIDDEN),
            Outcome::Continue => panic!("expected rejection"),
        }
        assert_eq!(invoker.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_filter_trigger_skips_function() {
        let invoker = Scripted {
            calls: Mutex::new(Vec::new()),
            reply: |_, _| ok(json!({"response": {"code": 201}})),
        };
        let functions = vec![
            function(json!({"name": "docs", "trigger": {"type": "filter", "expression": "acl == 'docs'"}})),
            function(json!({"name": "books", "trigger": {"type": "filter", "expression": "'books' in index"}})),
        ];
        let mut response = FunctionResponse {
            code: 200,
            ..Default::default()
        };
        run_after(
            &functions,
            &invoker,
            &env(),
            &FunctionRequest::default(),
            &mut response,
        )
        .await
        .unwrap();
        assert_eq!(response.code, 201);
        let calls = invoker.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "books");
    }

    #[test]
    fn test_cache_snapshot_swap() {
        let cache = FunctionCache::new();
        let before = cache.snapshot();
        cache.replace(vec![Function::new("a", None)]);
        assert!(before.is_empty());
        assert_eq!(cache.snapshot().len(), 1);
    }
}
