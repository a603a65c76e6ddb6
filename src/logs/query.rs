use std::collections::HashMap;

use http::Method;
use serde_json::{json, Value};

use crate::engine::EngineClient;
use crate::error::{GatewayError, Result};

const DEFAULT_SIZE: usize = 100;
const MAX_SIZE: usize = 1000;

/// Coarse log filters accepted by the `filter` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFilter {
    Search,
    Delete,
    Success,
    Error,
}

impl LogFilter {
    fn parse(raw: &str) -> Result<Self> {
        match raw {
            "search" => Ok(Self::Search),
            "delete" => Ok(Self::Delete),
            "success" => Ok(Self::Success),
            "error" => Ok(Self::Error),
            other => Err(GatewayError::Validation(format!(
                "invalid filter '{}': expected one of search, delete, success, error",
                other
            ))),
        }
    }

    fn clause(self) -> Value {
        match self {
            Self::Search => json!({ "terms": { "category.keyword": ["search", "reactivesearch", "msearch"] } }),
            Self::Delete => json!({ "term": { "request.method.keyword": "DELETE" } }),
            Self::Success => json!({ "range": { "response.code": { "gte": 200, "lt": 300 } } }),
            Self::Error => json!({ "range": { "response.code": { "gte": 400 } } }),
        }
    }
}

/// Parameters of the log listing routes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogQuery {
    pub indices: Vec<String>,
    pub filter: Option<LogFilter>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub start_latency: Option<u64>,
    pub end_latency: Option<u64>,
    pub search: Option<String>,
    pub size: usize,
    pub offset: usize,
}

fn number<T: std::str::FromStr>(params: &HashMap<String, String>, key: &str) -> Result<Option<T>> {
    params
        .get(key)
        .filter(|v| !v.is_empty())
        .map(|v| {
            v.parse::<T>()
                .map_err(|_| GatewayError::Validation(format!("'{}' must be a non-negative integer", key)))
        })
        .transpose()
}

impl LogQuery {
    pub fn from_params(params: &HashMap<String, String>, index: Option<&str>) -> Result<Self> {
        let size = number::<usize>(params, "size")?.unwrap_or(DEFAULT_SIZE);
        if size > MAX_SIZE {
            return Err(GatewayError::Validation(format!(
                "'size' must not exceed {}",
                MAX_SIZE
            )));
        }
        let query = Self {
            indices: index
                .map(|i| i.split(',').map(str::to_string).collect())
                .unwrap_or_default(),
            filter: params
                .get("filter")
                .filter(|f| !f.is_empty())
                .map(|f| LogFilter::parse(f))
                .transpose()?,
            start_date: params.get("start_date").filter(|v| !v.is_empty()).cloned(),
            end_date: params.get("end_date").filter(|v| !v.is_empty()).cloned(),
            start_latency: number(params, "start_latency")?,
            end_latency: number(params, "end_latency")?,
            search: params
                .get("search_query")
                .or_else(|| params.get("q"))
                .filter(|v| !v.trim().is_empty())
                .cloned(),
            size,
            offset: number(params, "offset")?.unwrap_or(0),
        };
        if let (Some(start), Some(end)) = (query.start_latency, query.end_latency) {
            if start > end {
                return Err(GatewayError::Validation(
                    "'start_latency' must not exceed 'end_latency'".into(),
                ));
            }
        }
        Ok(query)
    }

    /// Engine search body, newest first.
    pub fn to_search_body(&self) -> Value {
        let mut filter = Vec::new();
        if !self.indices.is_empty() {
            filter.push(json!({ "terms": { "indices.keyword": self.indices } }));
        }
        if let Some(f) = self.filter {
            filter.push(f.clause());
        }
        if self.start_date.is_some() || self.end_date.is_some() {
            let mut range = serde_json::Map::new();
            if let Some(start) = &self.start_date {
                range.insert("gte".into(), json!(start));
            }
            if let Some(end) = &self.end_date {
                range.insert("lte".into(), json!(end));
            }
            filter.push(json!({ "range": { "timestamp": range } }));
        }
        if self.start_latency.is_some() || self.end_latency.is_some() {
            let mut range = serde_json::Map::new();
            if let Some(start) = self.start_latency {
                range.insert("gte".into(), json!(start));
            }
            if let Some(end) = self.end_latency {
                range.insert("lte".into(), json!(end));
            }
            filter.push(json!({ "range": { "response.took": range } }));
        }
        let must = match &self.search {
            Some(q) => json!([{
                "simple_query_string": {
                    "query": q,
                    "fields": ["request.uri", "request.body", "response.body"]
                }
            }]),
            None => json!([]),
        };
        json!({
            "from": self.offset,
            "size": self.size,
            "sort": [{ "timestamp": { "order": "desc" } }],
            "query": { "bool": { "filter": filter, "must": must } }
        })
    }
}

async fn search_pattern(engine: &EngineClient, logs_index: &str, body: &Value) -> Result<Value> {
    let path = format!(
        "/{}*/_search?ignore_unavailable=true&allow_no_indices=true",
        logs_index
    );
    match engine.json(Method::POST, &path, Some(body)).await {
        Err(GatewayError::NotFound(_)) => Ok(json!({})),
        other => other,
    }
}

/// `{logs: [...], total}` for a listing query. No log index yet means no logs.
pub async fn search_logs(engine: &EngineClient, logs_index: &str, query: &LogQuery) -> Result<Value> {
    let resp = search_pattern(engine, logs_index, &query.to_search_body()).await?;
    let logs: Vec<Value> = resp
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|h| h.get("_source").cloned())
        .collect();
    let total = resp
        .pointer("/hits/total/value")
        .or_else(|| resp.pointer("/hits/total"))
        .and_then(Value::as_u64)
        .unwrap_or(logs.len() as u64);
    Ok(json!({ "logs": logs, "total": total }))
}

/// A single log record by id.
pub async fn get_log(engine: &EngineClient, logs_index: &str, id: &str) -> Result<Value> {
    let body = json!({ "size": 1, "query": { "ids": { "values": [id] } } });
    let resp = search_pattern(engine, logs_index, &body).await?;
    resp.pointer("/hits/hits/0/_source")
        .cloned()
        .ok_or_else(|| GatewayError::NotFound(format!("log {} not found", id)))
}
