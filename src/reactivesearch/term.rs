//! `term` value queries and their default aggregations.

use serde_json::{json, Map, Value};

use super::types::{DataField, Query, SortBy};

/// Separator between pivot levels in a multi-field term value.
const PIVOT_SEPARATOR: &str = " > ";

const DEFAULT_AGGREGATION_SIZE: u64 = 100;

/// Value-derived query of a term node. This filter is only applied to the
/// nodes that react to it, never to the term node's own hits.
pub fn build(query: &Query, fields: &[DataField]) -> Option<Value> {
    let value = query.value.as_ref()?;
    let first = fields.first()?;
    let field = first.field.as_str();

    let values: Vec<String> = match value {
        Value::Array(items) => items.iter().filter_map(scalar_string).collect(),
        other => scalar_string(other).into_iter().collect(),
    };
    if values.is_empty() {
        return None;
    }

    if let Some(label) = &query.select_all_label {
        if values.iter().any(|v| v == label) {
            return Some(if query.show_missing() {
                json!({ "match_all": {} })
            } else {
                json!({ "exists": { "field": field } })
            });
        }
    }

    if fields.len() > 1 && value.is_array() {
        return Some(pivot_query(query, fields, &values));
    }

    let missing_label = query.missing_label();
    let (missing, present): (Vec<&String>, Vec<&String>) = values
        .iter()
        .partition(|v| query.show_missing() && v.as_str() == missing_label);
    let missing_clause = (!missing.is_empty()).then(|| missing_query(field));

    if !value.is_array() {
        return Some(match missing_clause {
            Some(clause) => clause,
            None => json!({ "term": { field: values[0] } }),
        });
    }

    if query.is_and_format() {
        let mut must: Vec<Value> = present
            .iter()
            .map(|v| json!({ "term": { field: v } }))
            .collect();
        must.extend(missing_clause);
        return Some(json!({ "bool": { "must": must } }));
    }

    let mut should = Vec::new();
    if !present.is_empty() {
        should.push(json!({ "terms": { field: present } }));
    }
    should.extend(missing_clause);
    if should.len() == 1 {
        return should.pop();
    }
    Some(json!({ "bool": { "minimum_should_match": 1, "should": should } }))
}

fn scalar_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn missing_query(field: &str) -> Value {
    json!({ "bool": { "must_not": { "exists": { "field": field } } } })
}

/// `"Fiction > Fantasy"` over `[genre, subgenre]` becomes a `must` of one
/// term per level; the groups combine by `should` or `must`.
fn pivot_query(query: &Query, fields: &[DataField], values: &[String]) -> Value {
    let groups: Vec<Value> = values
        .iter()
        .map(|v| {
            let must: Vec<Value> = v
                .split(PIVOT_SEPARATOR)
                .zip(fields)
                .map(|(part, f)| json!({ "term": { f.field.as_str(): part.trim() } }))
                .collect();
            json!({ "bool": { "must": must } })
        })
        .collect();
    if query.is_and_format() {
        json!({ "bool": { "must": groups } })
    } else {
        json!({ "bool": { "minimum_should_match": 1, "should": groups } })
    }
}

/// Default aggregations of a term node, keyed by field.
pub fn aggregations(query: &Query, fields: &[DataField]) -> Map<String, Value> {
    let mut aggs = Map::new();
    if fields.is_empty() {
        return aggs;
    }
    if query.pagination.unwrap_or(false) {
        let first = &fields[0].field;
        aggs.insert(first.clone(), composite(query, fields));
        return aggs;
    }

    // Nested sub-aggregations follow the declaration order of the fields.
    let mut inner: Option<(String, Value)> = None;
    for field in fields.iter().rev() {
        let mut agg = json!({ "terms": terms_body(query, &field.field) });
        if let Some((name, sub)) = inner.take() {
            agg["aggs"] = json!({ name: sub });
        }
        inner = Some((field.field.clone(), agg));
    }
    if let Some((name, agg)) = inner {
        aggs.insert(name, agg);
    }
    aggs
}

fn aggregation_size(query: &Query) -> u64 {
    query
        .aggregation_size
        .or(query.size)
        .unwrap_or(DEFAULT_AGGREGATION_SIZE)
}

fn terms_body(query: &Query, field: &str) -> Value {
    let mut body = Map::new();
    body.insert("field".into(), json!(field));
    body.insert("size".into(), json!(aggregation_size(query)));
    let order = match query.sort_by {
        None | Some(SortBy::Count) => json!({ "_count": "desc" }),
        Some(direction) => json!({ "_key": direction.as_str() }),
    };
    body.insert("order".into(), order);
    if query.show_missing() {
        body.insert("missing".into(), json!(query.missing_label()));
    }
    if let Some(include) = &query.aggregation_include {
        body.insert("include".into(), include.clone());
    }
    if let Some(exclude) = &query.aggregation_exclude {
        body.insert("exclude".into(), exclude.clone());
    }
    Value::Object(body)
}

fn composite(query: &Query, fields: &[DataField]) -> Value {
    let sources: Vec<Value> = fields
        .iter()
        .map(|f| {
            let mut terms = json!({ "field": f.field });
            if query.show_missing() {
                terms["missing_bucket"] = json!(true);
            }
            json!({ f.field.as_str(): { "terms": terms } })
        })
        .collect();
    let mut body = json!({
        "sources": sources,
        "size": aggregation_size(query),
    });
    if let Some(after) = &query.after {
        body["after"] = after.clone();
    }
    json!({ "composite": body })
}
