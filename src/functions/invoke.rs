use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::expr::Environment;
use crate::error::{GatewayError, Result};

/// The request as a function sees it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionRequest {
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Value,
}

/// The response as a function sees it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub code: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Value,
}

/// Payload posted to a function.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Invocation<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_request_payload: Option<&'a Value>,
    pub environments: &'a Environment,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<&'a FunctionRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<&'a FunctionResponse>,
}

/// Changes a function asks for. Every field is optional; absent fields keep
/// the current value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FunctionOutput {
    #[serde(default)]
    pub request: Option<RequestPatch>,
    #[serde(default)]
    pub response: Option<ResponsePatch>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestPatch {
    pub url: Option<String>,
    pub method: Option<String>,
    pub headers: Option<BTreeMap<String, String>>,
    pub body: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponsePatch {
    pub code: Option<u16>,
    pub headers: Option<BTreeMap<String, String>>,
    pub body: Option<Value>,
}

impl RequestPatch {
    pub fn apply(self, req: &mut FunctionRequest) {
        if let Some(url) = self.url {
            req.url = url;
        }
        if let Some(method) = self.method {
            req.method = method.to_uppercase();
        }
        if let Some(headers) = self.headers {
            req.headers = headers;
        }
        if let Some(body) = self.body {
            req.body = body;
        }
    }
}

impl ResponsePatch {
    pub fn apply(self, resp: &mut FunctionResponse) {
        if let Some(code) = self.code {
            resp.code = code;
        }
        if let Some(headers) = self.headers {
            resp.headers = headers;
        }
        if let Some(body) = self.body {
            resp.body = body;
        }
    }
}

/// Raw reply of a function invocation.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: StatusCode,
    pub body: Bytes,
}

#[async_trait]
pub trait FunctionInvoker: Send + Sync {
    async fn invoke(&self, name: &str, payload: &Value) -> Result<Reply>;
}

/// Invokes functions through an OpenFaaS gateway at `/function/{name}`.
pub struct OpenFaasInvoker {
    http: reqwest::Client,
    gateway: String,
}

impl OpenFaasInvoker {
    pub fn new(gateway: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Config(format!("failed to build function client: {}", e)))?;
        Ok(Self {
            http,
            gateway: gateway.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl FunctionInvoker for OpenFaasInvoker {
    async fn invoke(&self, name: &str, payload: &Value) -> Result<Reply> {
        let url = format!("{}/function/{}", self.gateway, urlencoding::encode(name));
        let resp = self
            .http
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                GatewayError::upstream(502, format!("failed to invoke function {}: {}", name, e))
            })?;
        let status = resp.status();
        let body = resp.bytes().await.map_err(|e| {
            GatewayError::upstream(502, format!("failed to read function {} reply: {}", name, e))
        })?;
        Ok(Reply { status, body })
    }
}

/// Invoker used when no OpenFaaS gateway is configured.
pub struct DisabledInvoker;

#[async_trait]
impl FunctionInvoker for DisabledInvoker {
    async fn invoke(&self, name: &str, _payload: &Value) -> Result<Reply> {
        Err(GatewayError::Config(format!(
            "function {} cannot run: OPENFAAS_GATEWAY is not set",
            name
        )))
    }
}
