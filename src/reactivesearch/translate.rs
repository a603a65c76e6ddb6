//! ReactiveSearch -> engine `_msearch` translation.

use std::collections::{HashMap, HashSet};

use serde_json::{json, Map, Value};

use super::types::{DataField, Query, QueryType, RSQuery, SortBy};
use super::{aggs, geo, range, react, search, term, validate};
use crate::error::{GatewayError, Result};

/// Custom-query keys a reacting node never inherits.
const NON_INHERITED_KEYS: &[&str] = &["size", "from", "aggs", "_source", "sort", "query"];

/// One translated node.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslatedQuery {
    pub id: String,
    pub index: Option<String>,
    /// Canonical (key-sorted) request body.
    pub body: Value,
    pub executes: bool,
}

impl TranslatedQuery {
    pub fn preference(&self) -> Value {
        let mut line = Map::new();
        if let Some(index) = &self.index {
            line.insert("index".into(), json!(index));
        }
        line.insert("preference".into(), json!(self.id));
        Value::Object(line)
    }
}

#[derive(Debug, Clone)]
pub struct Translation {
    /// Every node, executable or not, in request order.
    pub queries: Vec<TranslatedQuery>,
}

impl Translation {
    pub fn executable(&self) -> impl Iterator<Item = &TranslatedQuery> {
        self.queries.iter().filter(|q| q.executes)
    }

    /// Newline-delimited `{preference}\n{body}\n` pairs for executable nodes.
    pub fn msearch_payload(&self) -> String {
        let mut out = String::new();
        for q in self.executable() {
            out.push_str(&q.preference().to_string());
            out.push('\n');
            out.push_str(&q.body.to_string());
            out.push('\n');
        }
        out
    }

    pub fn executable_ids(&self) -> Vec<String> {
        self.executable().map(|q| q.id.clone()).collect()
    }
}

/// Validate and translate a request.
pub fn translate(rs: &RSQuery) -> Result<Translation> {
    validate::validate(rs)?;
    let mut translator = Translator::new(rs)?;
    let queries = rs
        .query
        .iter()
        .map(|q| translator.translate_node(q))
        .collect::<Result<Vec<_>>>()?;
    Ok(Translation { queries })
}

struct Translator<'a> {
    nodes: HashMap<&'a str, &'a Query>,
    fields: HashMap<&'a str, Vec<DataField>>,
    value_queries: HashMap<String, Option<Value>>,
    composed: HashMap<String, Option<Value>>,
    visiting: HashSet<String>,
}

impl<'a> Translator<'a> {
    fn new(rs: &'a RSQuery) -> Result<Self> {
        let mut nodes = HashMap::new();
        let mut fields = HashMap::new();
        for q in &rs.query {
            nodes.insert(q.id.as_str(), q);
            fields.insert(q.id.as_str(), validate::data_fields(q)?);
        }
        Ok(Self {
            nodes,
            fields,
            value_queries: HashMap::new(),
            composed: HashMap::new(),
            visiting: HashSet::new(),
        })
    }

    fn node(&self, id: &str) -> Result<&'a Query> {
        self.nodes
            .get(id)
            .copied()
            .ok_or_else(|| GatewayError::Validation(format!("unknown query id '{}'", id)))
    }

    fn fields_of(&self, id: &str) -> &[DataField] {
        self.fields.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Query derived from the node's own value; `customQuery.query` replaces it.
    fn value_query(&mut self, id: &str) -> Result<Option<Value>> {
        if let Some(cached) = self.value_queries.get(id) {
            return Ok(cached.clone());
        }
        let q = self.node(id)?;
        let built = if let Some(custom) = q.custom_query.as_ref().and_then(|c| c.get("query")) {
            Some(custom.clone())
        } else {
            let fields = self.fields_of(id);
            match q.query_type {
                QueryType::Search | QueryType::Suggestion => search::build(q, fields)?,
                QueryType::Term => term::build(q, fields),
                QueryType::Range => range::build(q, fields)?,
                QueryType::Geo => geo::build(q, fields)?,
            }
        };
        self.value_queries.insert(id.to_string(), built.clone());
        Ok(built)
    }

    /// React dependencies of a node as boolean clause lists.
    fn react_parts(&mut self, q: &'a Query) -> Result<Option<react::BoolParts>> {
        let Some(expr) = &q.react else {
            return Ok(None);
        };
        let parts = react::compile(expr, &mut |leaf: &str| self.composed_query(leaf))?;
        Ok(Some(parts))
    }

    /// What a node contributes to the nodes reacting to it: its own value
    /// query combined with its own dependencies. Memoised; cycles are rejected.
    fn composed_query(&mut self, id: &str) -> Result<Option<Value>> {
        if let Some(cached) = self.composed.get(id) {
            return Ok(cached.clone());
        }
        if !self.visiting.insert(id.to_string()) {
            return Err(GatewayError::Validation(format!(
                "react dependency cycle through query '{}'",
                id
            )));
        }
        let q = self.node(id)?;
        let own = self.value_query(id)?;
        let composed = match self.react_parts(q)? {
            None => own,
            Some(mut parts) => {
                let own = own.or_else(|| {
                    (q.query_type != QueryType::Term).then(|| json!({ "match_all": {} }))
                });
                parts.must.extend(own);
                parts.into_query()
            }
        };
        self.visiting.remove(id);
        self.composed.insert(id.to_string(), composed.clone());
        Ok(composed)
    }

    /// Query a node runs for its own hits. Term nodes never filter
    /// themselves by their own value.
    fn emitted_query(&mut self, q: &'a Query) -> Result<Value> {
        let query = if q.query_type == QueryType::Term {
            self.react_parts(q)?.and_then(react::BoolParts::into_query)
        } else {
            self.composed_query(&q.id)?
        };
        Ok(query.unwrap_or_else(|| json!({ "match_all": {} })))
    }

    fn inherited_options(&self, q: &Query) -> Map<String, Value> {
        let mut out = Map::new();
        let Some(expr) = &q.react else {
            return out;
        };
        for leaf in react::leaf_ids(expr) {
            let Some(custom) = self
                .nodes
                .get(leaf.as_str())
                .and_then(|n| n.custom_query.as_ref())
                .and_then(Value::as_object)
            else {
                continue;
            };
            for (key, value) in custom {
                if !NON_INHERITED_KEYS.contains(&key.as_str()) {
                    out.insert(key.clone(), value.clone());
                }
            }
        }
        out
    }

    fn translate_node(&mut self, q: &'a Query) -> Result<TranslatedQuery> {
        let query = self.emitted_query(q)?;
        let fields = self.fields_of(&q.id).to_vec();

        let mut body = self.inherited_options(q);
        for (key, value) in options(q, &fields) {
            body.insert(key, value);
        }
        if let Some(custom) = q.custom_query.as_ref().and_then(Value::as_object) {
            for (key, value) in custom {
                if key != "query" {
                    body.insert(key.clone(), value.clone());
                }
            }
        }
        body.insert("query".into(), query);

        if let Some(default) = q.default_query.as_ref().and_then(Value::as_object) {
            for (key, value) in default {
                body.insert(key.clone(), value.clone());
            }
        }

        Ok(TranslatedQuery {
            id: q.id.clone(),
            index: q.index.clone(),
            body: canonicalize(Value::Object(body)),
            executes: q.executes(),
        })
    }
}

/// Size, paging, source filtering, collapse, sort, highlight and aggregations.
fn options(q: &Query, fields: &[DataField]) -> Map<String, Value> {
    let mut out = Map::new();

    match q.query_type {
        QueryType::Term => {
            out.insert("size".into(), json!(0));
        }
        QueryType::Range => {
            out.insert("size".into(), json!(q.size.unwrap_or(0)));
        }
        _ => {
            if let Some(size) = q.size {
                out.insert("size".into(), json!(size));
            }
        }
    }
    if q.query_type != QueryType::Term {
        if let Some(from) = q.from {
            out.insert("from".into(), json!(from));
        }
    }

    let includes = q
        .include_fields
        .clone()
        .filter(|f| !f.is_empty())
        .unwrap_or_else(|| vec!["*".to_string()]);
    let excludes = q.exclude_fields.clone().unwrap_or_default();
    out.insert(
        "_source".into(),
        json!({ "includes": includes, "excludes": excludes }),
    );

    if let Some(field) = &q.distinct_field {
        let mut collapse = Map::new();
        collapse.insert("field".into(), json!(field));
        if let Some(config) = q.distinct_field_config.as_ref().and_then(Value::as_object) {
            for (key, value) in config {
                collapse.insert(key.clone(), value.clone());
            }
        }
        out.insert("collapse".into(), Value::Object(collapse));
    }

    if q.query_type == QueryType::Search {
        if let Some(direction) = q.sort_by.filter(|s| *s != SortBy::Count) {
            let field = q.sort_field.as_deref().unwrap_or("_score");
            out.insert(
                "sort".into(),
                json!([{ field: { "order": direction.as_str() } }]),
            );
        }
    }

    if q.highlight.unwrap_or(false) {
        out.insert("highlight".into(), highlight(q, fields));
    }

    if let Some(aggs) = aggs::build(q, fields) {
        out.insert("aggs".into(), aggs);
    }
    out
}

fn highlight(q: &Query, fields: &[DataField]) -> Value {
    if let Some(custom) = &q.custom_highlight {
        return custom.clone();
    }
    let names: Vec<String> = match &q.highlight_field {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => fields.iter().map(|f| f.field.clone()).collect(),
    };
    let mut field_map = Map::new();
    for name in names {
        field_map.insert(name, json!({}));
    }
    json!({
        "pre_tags": ["<mark>"],
        "post_tags": ["</mark>"],
        "fields": field_map,
    })
}

/// Recursively sort object keys so serialisation is deterministic.
pub fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, canonicalize(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rs(v: Value) -> RSQuery {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn test_basic_search_payload() {
        let t = translate(&rs(json!({
            "query": [{"id": "B", "dataField": ["title"], "value": "harry", "size": 20}]
        })))
        .unwrap();
        let payload = t.msearch_payload();
        let lines: Vec<&str> = payload.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], r#"{"preference":"B"}"#);
        assert!(lines[1].starts_with(
            r#"{"_source":{"excludes":[],"includes":["*"]},"query":{"bool":{"minimum_should_match":1,"should":[{"multi_match":"#
        ));
        assert!(lines[1].ends_with(r#"]}},"size":20}"#));
        assert!(payload.ends_with('\n'));

        let body: Value = serde_json::from_str(lines[1]).unwrap();
        let should = body["query"]["bool"]["should"].as_array().unwrap();
        assert_eq!(should.len(), 4);
        assert!(should
            .iter()
            .all(|c| c["multi_match"]["fields"][0] == "title"));
    }

    #[test]
    fn test_react_and_wraps_dependency() {
        let t = translate(&rs(json!({
            "query": [
                {"id": "B", "dataField": ["title"], "value": "harry", "execute": false},
                {"id": "R", "dataField": ["title"], "react": {"and": "B"}}
            ]
        })))
        .unwrap();
        assert_eq!(t.executable_ids(), vec!["R"]);
        assert_eq!(t.msearch_payload().lines().count(), 2);

        let b_query = t.queries[0].body["query"].clone();
        let r_query = &t.queries[1].body["query"];
        assert_eq!(r_query["bool"]["must"][0], b_query);
        assert_eq!(r_query["bool"]["must"][1], json!({"match_all": {}}));
    }

    #[test]
    fn test_term_node_with_missing_bucket() {
        let t = translate(&rs(json!({
            "query": [{
                "id": "T", "type": "term", "dataField": ["b.raw"],
                "value": ["X"], "showMissing": true, "size": 100
            }]
        })))
        .unwrap();
        let body = &t.queries[0].body;
        assert_eq!(body["query"], json!({"match_all": {}}));
        assert_eq!(body["size"], 0);
        assert_eq!(body["aggs"]["b.raw"]["terms"]["missing"], "N/A");
        assert_eq!(body["aggs"]["b.raw"]["terms"]["size"], 100);
    }

    #[test]
    fn test_term_value_filters_reacting_nodes() {
        let t = translate(&rs(json!({
            "query": [
                {"id": "T", "type": "term", "dataField": "genre", "value": ["fantasy"]},
                {"id": "S", "dataField": "title", "value": "harry", "react": {"and": ["T"]}}
            ]
        })))
        .unwrap();
        let s_query = &t.queries[1].body["query"];
        assert_eq!(s_query["bool"]["must"][0], json!({"terms": {"genre": ["fantasy"]}}));
    }

    #[test]
    fn test_cycles_rejected() {
        let err = translate(&rs(json!({
            "query": [
                {"id": "A", "value": "x", "dataField": "f", "react": {"and": "B"}},
                {"id": "B", "value": "y", "dataField": "f", "react": {"and": "A"}}
            ]
        })))
        .unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_from_ignored_on_term_and_size_defaults() {
        let t = translate(&rs(json!({
            "query": [
                {"id": "T", "type": "term", "dataField": "g", "from": 10, "size": 5},
                {"id": "R", "type": "range", "dataField": "price"}
            ]
        })))
        .unwrap();
        assert!(t.queries[0].body.get("from").is_none());
        assert_eq!(t.queries[0].body["size"], 0);
        assert_eq!(t.queries[1].body["size"], 0);
    }

    #[test]
    fn test_custom_query_inheritance_skips_excluded_keys() {
        let t = translate(&rs(json!({
            "query": [
                {
                    "id": "A", "dataField": "f", "execute": false,
                    "customQuery": {
                        "query": {"term": {"brand": "acme"}},
                        "size": 99,
                        "timeout": "1s"
                    }
                },
                {"id": "B", "dataField": "f", "size": 3, "react": {"and": "A"}}
            ]
        })))
        .unwrap();
        let b = &t.queries[1].body;
        assert_eq!(b["timeout"], "1s");
        assert_eq!(b["size"], 3);
        assert_eq!(b["query"]["bool"]["must"][0], json!({"term": {"brand": "acme"}}));
    }

    #[test]
    fn test_default_query_replaces_query() {
        let t = translate(&rs(json!({
            "query": [{
                "id": "A", "dataField": "f", "value": "x",
                "defaultQuery": {"query": {"match_none": {}}, "track_total_hits": true}
            }]
        })))
        .unwrap();
        let body = &t.queries[0].body;
        assert_eq!(body["query"], json!({"match_none": {}}));
        assert_eq!(body["track_total_hits"], true);
    }

    #[test]
    fn test_retranslation_is_stable() {
        let input = rs(json!({
            "query": [
                {"id": "T", "type": "term", "dataField": "g", "value": ["a"]},
                {"id": "S", "dataField": ["title", "body"], "value": "x", "react": {"or": ["T"]},
                 "includeFields": ["title"], "highlight": true}
            ]
        }));
        let first = translate(&input).unwrap().msearch_payload();
        let second = translate(&input).unwrap().msearch_payload();
        assert_eq!(first, second);
        let body: Value = serde_json::from_str(first.lines().nth(3).unwrap()).unwrap();
        assert_eq!(body["_source"]["includes"], json!(["title"]));
        assert!(body["highlight"]["fields"]["body"].is_object());
    }

    #[test]
    fn test_preference_with_index() {
        let t = translate(&rs(json!({"query": [{"id": "A", "index": "books"}]}))).unwrap();
        assert_eq!(
            t.msearch_payload().lines().next().unwrap(),
            r#"{"index":"books","preference":"A"}"#
        );
    }
}
