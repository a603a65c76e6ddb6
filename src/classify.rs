//! Request classification: category, acl, operation and indices.

use http::Method;
use serde_json::Value;

use crate::routes::RouteTable;
use crate::types::{Acl, Category, Operation};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub category: Category,
    pub acl: Acl,
    pub operation: Operation,
    /// Empty for cluster-level requests.
    pub indices: Vec<String>,
    /// Template of the matched route.
    pub template: String,
}

impl Classification {
    pub fn is_cluster_level(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Classify a request against the route table.
///
/// `?stream=true` switches the acl to `streams`. Index targets named in
/// `_msearch`, `_bulk`, `_mget` and `_reindex` bodies are added to the path
/// indices, so every target goes through the indices gate.
pub fn classify(
    table: &RouteTable,
    method: &Method,
    path: &str,
    query: Option<&str>,
    body: &[u8],
) -> Classification {
    let (category, mut acl, operation, mut indices, template) = match table.find(method, path) {
        Some(m) => (
            m.spec.category,
            m.spec.acl,
            m.spec.operation_for(method),
            m.indices(),
            m.spec.template.as_str().to_string(),
        ),
        None => (
            Category::Misc,
            Acl::Misc,
            Operation::from_method(method),
            Vec::new(),
            String::new(),
        ),
    };

    if is_stream_request(query) {
        acl = Acl::Streams;
    }

    let from_body = match category {
        Category::Msearch | Category::Bulk => indices_from_ndjson(body),
        Category::Mget => indices_from_mget(body),
        Category::Reindex => indices_from_reindex(body),
        _ => Vec::new(),
    };
    for name in from_body {
        push_unique(&mut indices, &name);
    }

    Classification {
        category,
        acl,
        operation,
        indices,
        template,
    }
}

fn is_stream_request(query: Option<&str>) -> bool {
    query
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .any(|(k, v)| k == "stream" && v == "true")
        })
        .unwrap_or(false)
}

/// Index targets named inside `_msearch` header lines or `_bulk` action lines.
pub fn indices_from_ndjson(body: &[u8]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let text = String::from_utf8_lossy(body);
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        let mut names: Vec<&str> = Vec::new();
        // msearch header: {"index": "books"} or {"index": ["a","b"]}
        match obj.get("index") {
            Some(Value::String(s)) => names.push(s),
            Some(Value::Array(items)) => names.extend(items.iter().filter_map(Value::as_str)),
            _ => {}
        }
        // bulk action: {"index": {"_index": "books"}}
        for action in ["index", "create", "update", "delete"] {
            if let Some(target) = obj
                .get(action)
                .and_then(|a| a.get("_index"))
                .and_then(Value::as_str)
            {
                names.push(target);
            }
        }
        for name in names {
            push_unique(&mut out, name);
        }
    }
    out
}

/// `_index` of each entry in an `_mget` `docs` array.
pub fn indices_from_mget(body: &[u8]) -> Vec<String> {
    let mut out = Vec::new();
    let Ok(value) = serde_json::from_slice::<Value>(body) else {
        return out;
    };
    if let Some(docs) = value.get("docs").and_then(Value::as_array) {
        for name in docs.iter().filter_map(|d| d.get("_index")).filter_map(Value::as_str) {
            push_unique(&mut out, name);
        }
    }
    out
}

/// `source.index` and `dest.index` of an engine `_reindex` body.
pub fn indices_from_reindex(body: &[u8]) -> Vec<String> {
    let mut out = Vec::new();
    let Ok(value) = serde_json::from_slice::<Value>(body) else {
        return out;
    };
    for side in ["source", "dest"] {
        match value.get(side).and_then(|s| s.get("index")) {
            Some(Value::String(name)) => push_unique(&mut out, name),
            Some(Value::Array(items)) => {
                for name in items.iter().filter_map(Value::as_str) {
                    push_unique(&mut out, name);
                }
            }
            _ => {}
        }
    }
    out
}

/// Append each comma-separated name not already present.
fn push_unique(out: &mut Vec<String>, names: &str) {
    for name in names.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        if !out.iter().any(|o| o == name) {
            out.push(name.to_string());
        }
    }
}
