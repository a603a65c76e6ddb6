//! HTTP client for the backing search engine.
//!
//! Every outbound call goes through [`EngineClient::request`], which applies
//! the cluster credentials, forces `Accept-Encoding: identity` and attaches
//! the per-call deadline. Inbound `Authorization` headers are never forwarded.

use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde_json::{json, Value};
use url::Url;

use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};

/// Request headers that are connection-scoped or replaced by the client.
const STRIPPED_REQUEST_HEADERS: &[&str] = &[
    "authorization",
    "host",
    "content-length",
    "accept-encoding",
    "connection",
    "transfer-encoding",
    "keep-alive",
    "upgrade",
    "proxy-authorization",
];

const STRIPPED_RESPONSE_HEADERS: &[&str] = &[
    "content-length",
    "transfer-encoding",
    "connection",
    "keep-alive",
    "content-encoding",
];

/// A fully buffered engine response.
#[derive(Debug, Clone)]
pub struct EngineResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl EngineResponse {
    pub fn json(&self) -> Result<Value> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

#[derive(Clone)]
pub struct EngineClient {
    http: reqwest::Client,
    base: String,
    credentials: Option<(String, String)>,
    timeout: Duration,
}

impl std::fmt::Debug for EngineClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineClient")
            .field("base", &self.base)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Pull a readable message out of an engine error body.
pub fn upstream_message(body: &[u8]) -> String {
    match serde_json::from_slice::<Value>(body) {
        Ok(v) => v
            .pointer("/error/reason")
            .or_else(|| v.pointer("/error/root_cause/0/reason"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| v.get("error").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| v.to_string()),
        Err(_) => String::from_utf8_lossy(body).into_owned(),
    }
}

impl EngineClient {
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        Self::with_base(
            config.es_cluster_url.clone(),
            config.es_credentials.clone(),
            config.engine_timeout,
        )
    }

    pub fn with_base(
        base: Url,
        credentials: Option<(String, String)>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .no_gzip()
            .build()
            .map_err(|e| GatewayError::Config(format!("failed to build engine client: {}", e)))?;
        Ok(Self {
            http,
            base: base.as_str().trim_end_matches('/').to_string(),
            credentials,
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    pub fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base, path)
        } else {
            format!("{}/{}", self.base, path)
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self
            .http
            .request(method, self.url(path))
            .header(http::header::ACCEPT_ENCODING, "identity")
            .timeout(self.timeout);
        if let Some((user, pass)) = &self.credentials {
            req = req.basic_auth(user, Some(pass));
        }
        req
    }

    /// Forward a raw request. The upstream status is preserved verbatim.
    pub async fn send(
        &self,
        method: Method,
        path_and_query: &str,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<EngineResponse> {
        let mut req = self.request(method, path_and_query);
        for (name, value) in headers {
            if STRIPPED_REQUEST_HEADERS.contains(&name.as_str()) {
                continue;
            }
            req = req.header(name, value);
        }
        if !body.is_empty() {
            req = req.body(body);
        }
        let resp = req.send().await?;
        Self::buffer(resp).await
    }

    async fn buffer(resp: reqwest::Response) -> Result<EngineResponse> {
        let status = resp.status();
        let mut headers = HeaderMap::new();
        for (name, value) in resp.headers() {
            if STRIPPED_RESPONSE_HEADERS.contains(&name.as_str()) {
                continue;
            }
            headers.append(name.clone(), value.clone());
        }
        let body = resp.bytes().await?;
        Ok(EngineResponse {
            status,
            headers,
            body,
        })
    }

    /// JSON round-trip; non-2xx responses become [`GatewayError::Upstream`].
    pub async fn json(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        match self.json_opt(method, path, body).await? {
            Some(v) => Ok(v),
            None => Err(GatewayError::NotFound(format!("{} not found", path))),
        }
    }

    /// Like [`Self::json`] but maps 404 to `None`.
    pub async fn json_opt(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Option<Value>> {
        let mut req = self.request(method, path);
        if let Some(b) = body {
            req = req.json(b);
        }
        let resp = Self::buffer(req.send().await?).await?;
        if resp.status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.is_success() {
            return Err(GatewayError::upstream(
                resp.status.as_u16(),
                upstream_message(&resp.body),
            ));
        }
        if resp.body.is_empty() {
            return Ok(Some(Value::Null));
        }
        Ok(Some(resp.json()?))
    }

    /// Send an `_msearch` payload. The response is returned as-is.
    pub async fn msearch(&self, index: Option<&str>, payload: String) -> Result<EngineResponse> {
        let path = match index {
            Some(i) if !i.is_empty() => format!("/{}/_msearch", i),
            _ => "/_msearch".to_string(),
        };
        let resp = self
            .request(Method::POST, &path)
            .header(http::header::CONTENT_TYPE, "application/x-ndjson")
            .body(payload)
            .send()
            .await?;
        Self::buffer(resp).await
    }

    pub async fn index_exists(&self, index: &str) -> Result<bool> {
        let resp = self.request(Method::HEAD, &format!("/{}", index)).send().await?;
        Ok(resp.status().is_success())
    }

    pub async fn create_index(&self, index: &str, body: &Value) -> Result<Value> {
        self.json(Method::PUT, &format!("/{}", index), Some(body)).await
    }

    pub async fn delete_index(&self, index: &str) -> Result<()> {
        self.json_opt(Method::DELETE, &format!("/{}", index), None)
            .await
            .map(|_| ())
    }

    /// Mappings of a single concrete index.
    pub async fn get_mappings(&self, index: &str) -> Result<Value> {
        let body = self
            .json(Method::GET, &format!("/{}/_mapping", index), None)
            .await?;
        Ok(first_index_entry(&body)
            .and_then(|e| e.get("mappings"))
            .cloned()
            .unwrap_or_else(|| json!({})))
    }

    /// `settings.index` of a single concrete index.
    pub async fn get_settings(&self, index: &str) -> Result<Value> {
        let body = self
            .json(Method::GET, &format!("/{}/_settings", index), None)
            .await?;
        Ok(first_index_entry(&body)
            .and_then(|e| e.pointer("/settings/index"))
            .cloned()
            .unwrap_or_else(|| json!({})))
    }

    pub async fn put_settings(&self, index: &str, settings: &Value) -> Result<()> {
        self.json(Method::PUT, &format!("/{}/_settings", index), Some(settings))
            .await
            .map(|_| ())
    }

    /// Aliases attached to a concrete index.
    pub async fn get_aliases(&self, index: &str) -> Result<Vec<String>> {
        let body = self
            .json_opt(Method::GET, &format!("/{}/_alias", index), None)
            .await?;
        Ok(body
            .as_ref()
            .and_then(first_index_entry)
            .and_then(|e| e.get("aliases"))
            .and_then(Value::as_object)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default())
    }

    /// Concrete indices an alias points at; empty when `name` is not an alias.
    pub async fn resolve_alias(&self, name: &str) -> Result<Vec<String>> {
        let body = self
            .json_opt(Method::GET, &format!("/_alias/{}", name), None)
            .await?;
        Ok(body
            .as_ref()
            .and_then(Value::as_object)
            .map(|m| {
                m.iter()
                    .filter(|(k, _)| k.as_str() != "error" && k.as_str() != "status")
                    .map(|(k, _)| k.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Atomic `_aliases` update.
    pub async fn update_aliases(&self, actions: Vec<Value>) -> Result<()> {
        self.json(
            Method::POST,
            "/_aliases",
            Some(&json!({ "actions": actions })),
        )
        .await
        .map(|_| ())
    }

    /// Every `(alias, index)` pair in the cluster.
    pub async fn cat_aliases(&self) -> Result<Vec<(String, String)>> {
        let body = self
            .json(Method::GET, "/_cat/aliases?format=json", None)
            .await?;
        Ok(body
            .as_array()
            .map(|rows| {
                rows.iter()
                    .filter_map(|row| {
                        let alias = row.get("alias")?.as_str()?;
                        let index = row.get("index")?.as_str()?;
                        Some((alias.to_string(), index.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    pub async fn reindex(&self, body: &Value, wait_for_completion: bool) -> Result<Value> {
        let path = format!("/_reindex?wait_for_completion={}", wait_for_completion);
        let mut req = self.request(Method::POST, &path).json(body);
        if wait_for_completion {
            // Synchronous reindex can outlive the normal per-call deadline.
            req = req.timeout(self.timeout.max(Duration::from_secs(3600)));
        }
        let resp = Self::buffer(req.send().await?).await?;
        if !resp.is_success() {
            return Err(GatewayError::upstream(
                resp.status.as_u16(),
                upstream_message(&resp.body),
            ));
        }
        resp.json()
    }

    pub async fn task(&self, task_id: &str) -> Result<Value> {
        self.json(Method::GET, &format!("/_tasks/{}", task_id), None)
            .await
    }

    pub async fn index_doc(
        &self,
        index: &str,
        id: Option<&str>,
        doc: &Value,
        refresh: bool,
    ) -> Result<Value> {
        let mut path = match id {
            Some(id) => format!("/{}/_doc/{}", index, urlencoding::encode(id)),
            None => format!("/{}/_doc", index),
        };
        if refresh {
            path.push_str("?refresh=wait_for");
        }
        let method = if id.is_some() { Method::PUT } else { Method::POST };
        self.json(method, &path, Some(doc)).await
    }

    /// `_source` of a document, `None` when it does not exist.
    pub async fn get_doc(&self, index: &str, id: &str) -> Result<Option<Value>> {
        let body = self
            .json_opt(
                Method::GET,
                &format!("/{}/_doc/{}", index, urlencoding::encode(id)),
                None,
            )
            .await?;
        Ok(body
            .filter(|b| b.get("found").and_then(Value::as_bool).unwrap_or(true))
            .and_then(|b| b.get("_source").cloned()))
    }

    /// Returns `false` when the document did not exist.
    pub async fn delete_doc(&self, index: &str, id: &str, refresh: bool) -> Result<bool> {
        let mut path = format!("/{}/_doc/{}", index, urlencoding::encode(id));
        if refresh {
            path.push_str("?refresh=wait_for");
        }
        Ok(self.json_opt(Method::DELETE, &path, None).await?.is_some())
    }

    pub async fn search(&self, index: &str, body: &Value) -> Result<Value> {
        self.json(Method::POST, &format!("/{}/_search", index), Some(body))
            .await
    }

    /// `_bulk` with an ndjson payload; returns whether any item failed.
    pub async fn bulk(&self, payload: String) -> Result<bool> {
        let resp = self
            .request(Method::POST, "/_bulk")
            .header(http::header::CONTENT_TYPE, "application/x-ndjson")
            .body(payload)
            .send()
            .await?;
        let resp = Self::buffer(resp).await?;
        if !resp.is_success() {
            return Err(GatewayError::upstream(
                resp.status.as_u16(),
                upstream_message(&resp.body),
            ));
        }
        Ok(resp
            .json()?
            .get("errors")
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    pub async fn update_by_query(&self, index: &str, body: &Value) -> Result<Value> {
        self.json(
            Method::POST,
            &format!("/{}/_update_by_query?conflicts=proceed", index),
            Some(body),
        )
        .await
    }
}

fn first_index_entry(body: &Value) -> Option<&Value> {
    body.as_object().and_then(|m| m.values().next())
}

/// Copy engine response headers onto an outbound header map.
pub fn copy_headers(from: &HeaderMap, to: &mut HeaderMap) {
    for (name, value) in from {
        to.append(HeaderName::clone(name), HeaderValue::clone(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_message_prefers_reason() {
        let body = br#"{"error":{"type":"index_not_found_exception","reason":"no such index [x]"},"status":404}"#;
        assert_eq!(upstream_message(body), "no such index [x]");
        assert_eq!(upstream_message(b"plain failure"), "plain failure");
    }

    #[test]
    fn test_url_join() {
        let client = EngineClient::with_base(
            Url::parse("http://localhost:9200/").unwrap(),
            None,
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(client.url("/_msearch"), "http://localhost:9200/_msearch");
        assert_eq!(client.url("books/_doc/1"), "http://localhost:9200/books/_doc/1");
    }
}
