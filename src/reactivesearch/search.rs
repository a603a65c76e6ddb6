//! `search` and `suggestion` value queries.

use serde_json::{json, Map, Value};

use super::types::{DataField, Query};
use crate::error::{GatewayError, Result};

const PHRASE_PREFIX_EXCLUDED_SUFFIXES: &[&str] = &[".keyword", ".autosuggest", ".search"];

/// Value-derived query for a search node; `None` for an empty value.
pub fn build(query: &Query, fields: &[DataField]) -> Result<Option<Value>> {
    let values = search_values(query)?;
    if values.is_empty() {
        return Ok(None);
    }

    let weighted: Vec<String> = fields.iter().map(DataField::weighted).collect();

    let text_query = if query.query_string.unwrap_or(false) {
        json!({
            "query_string": {
                "query": values.join(" "),
                "fields": weighted,
                "default_operator": operator(query),
            }
        })
    } else if query.search_operators.unwrap_or(false) {
        json!({
            "simple_query_string": {
                "query": values.join(" "),
                "fields": weighted,
                "default_operator": operator(query),
            }
        })
    } else {
        multi_match_query(query, fields, &weighted, &values)?
    };

    Ok(Some(narrow_to_category(query, text_query)))
}

fn operator(query: &Query) -> &'static str {
    if query.is_and_format() {
        "and"
    } else {
        "or"
    }
}

/// Non-blank search terms; a multi-element array means multi-value search.
fn search_values(query: &Query) -> Result<Vec<String>> {
    match &query.value {
        None | Some(Value::Null) => Ok(vec![]),
        Some(Value::String(s)) => Ok(if s.trim().is_empty() {
            vec![]
        } else {
            vec![s.clone()]
        }),
        Some(Value::Number(n)) => Ok(vec![n.to_string()]),
        Some(Value::Array(items)) => items
            .iter()
            .filter(|v| !v.as_str().is_some_and(|s| s.trim().is_empty()))
            .map(|v| match v {
                Value::String(s) => Ok(s.clone()),
                Value::Number(n) => Ok(n.to_string()),
                other => Err(GatewayError::Validation(format!(
                    "query '{}': search values must be strings, got {}",
                    query.id, other
                ))),
            })
            .collect(),
        Some(other) => Err(GatewayError::Validation(format!(
            "query '{}': unsupported search value {}",
            query.id, other
        ))),
    }
}

fn multi_match_query(
    query: &Query,
    fields: &[DataField],
    weighted: &[String],
    values: &[String],
) -> Result<Value> {
    let and_format = query.is_and_format();
    let op = operator(query);
    let fuzziness = query.fuzziness.clone().unwrap_or_else(|| json!(0));
    let prefix_fields: Vec<String> = fields
        .iter()
        .filter(|f| is_phrase_prefix_eligible(&f.field))
        .map(|f| f.field.clone())
        .collect();
    let multi_value = values.len() > 1;

    let mut text_clauses = Vec::new();
    for value in values {
        text_clauses.push(json!({
            "multi_match": {
                "query": value,
                "fields": weighted,
                "type": "cross_fields",
                "operator": op,
            }
        }));
        if !and_format {
            text_clauses.push(json!({
                "multi_match": {
                    "query": value,
                    "fields": weighted,
                    "type": "best_fields",
                    "operator": op,
                    "fuzziness": fuzziness,
                }
            }));
        }
        text_clauses.push(json!({
            "multi_match": {
                "query": value,
                "fields": weighted,
                "type": "phrase",
                "operator": op,
            }
        }));
        if !multi_value && !prefix_fields.is_empty() {
            text_clauses.push(json!({
                "multi_match": {
                    "query": value,
                    "fields": prefix_fields,
                    "type": "phrase_prefix",
                    "operator": op,
                }
            }));
        }
    }

    let rank_clauses = rank_feature_clauses(query)?;
    let minimum_should_match = if rank_clauses.is_empty() { 1 } else { 2 };

    let mut bool_query = Map::new();
    if and_format {
        bool_query.insert("must".into(), Value::Array(text_clauses));
        if !rank_clauses.is_empty() {
            bool_query.insert("should".into(), Value::Array(rank_clauses));
        }
    } else {
        let mut should = text_clauses;
        should.extend(rank_clauses);
        bool_query.insert("minimum_should_match".into(), json!(minimum_should_match));
        bool_query.insert("should".into(), Value::Array(should));
    }
    Ok(json!({ "bool": bool_query }))
}

pub fn is_phrase_prefix_eligible(field: &str) -> bool {
    !PHRASE_PREFIX_EXCLUDED_SUFFIXES
        .iter()
        .any(|suffix| field.ends_with(suffix))
}

/// `rankFeature: {field: {saturation|log|sigmoid|linear: {...}, boost?}}`.
pub fn rank_feature_clauses(query: &Query) -> Result<Vec<Value>> {
    let Some(features) = &query.rank_feature else {
        return Ok(vec![]);
    };
    let mut clauses = Vec::with_capacity(features.len());
    for (field, spec) in features {
        let mut clause = Map::new();
        clause.insert("field".into(), json!(field));
        let Some(spec) = spec.as_object() else {
            return Err(GatewayError::Validation(format!(
                "query '{}': rankFeature '{}' must be an object",
                query.id, field
            )));
        };
        for (function, params) in spec {
            let key = match function.as_str() {
                "saturation" => "saturation",
                "log" | "logarithm" => "log",
                "sigmoid" => "sigmoid",
                "linear" => "linear",
                "boost" => "boost",
                other => {
                    return Err(GatewayError::Validation(format!(
                        "query '{}': unknown rankFeature function '{}'",
                        query.id, other
                    )))
                }
            };
            clause.insert(key.into(), params.clone());
        }
        clauses.push(json!({ "rank_feature": clause }));
    }
    Ok(clauses)
}

/// `categoryField` + `categoryValue` (other than `*`) narrows to one category.
fn narrow_to_category(query: &Query, inner: Value) -> Value {
    match (&query.category_field, &query.category_value) {
        (Some(field), Some(value)) if value != "*" => json!({
            "bool": {
                "must": [inner, { "term": { field.as_str(): value } }]
            }
        }),
        _ => inner,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(v: Value) -> Query {
        serde_json::from_value(v).unwrap()
    }

    fn build_for(q: &Query) -> Value {
        build(q, &q.data_fields().unwrap()).unwrap().unwrap()
    }

    #[test]
    fn test_or_mode_has_four_clauses() {
        let q = query(json!({"id": "B", "dataField": ["title"], "value": "harry"}));
        let out = build_for(&q);
        let should = out["bool"]["should"].as_array().unwrap();
        assert_eq!(should.len(), 4);
        assert_eq!(out["bool"]["minimum_should_match"], 1);
        let types: Vec<&str> = should
            .iter()
            .map(|c| c["multi_match"]["type"].as_str().unwrap())
            .collect();
        assert_eq!(types, vec!["cross_fields", "best_fields", "phrase", "phrase_prefix"]);
        assert_eq!(should[1]["multi_match"]["fuzziness"], 0);
    }

    #[test]
    fn test_phrase_prefix_fields_filtered_and_unweighted() {
        let q = query(json!({
            "id": "q",
            "dataField": ["title^3", "title.keyword", "title.autosuggest"],
            "value": "har"
        }));
        let out = build_for(&q);
        let prefix = out["bool"]["should"]
            .as_array()
            .unwrap()
            .iter()
            .find(|c| c["multi_match"]["type"] == "phrase_prefix")
            .unwrap();
        assert_eq!(prefix["multi_match"]["fields"], json!(["title"]));
    }

    #[test]
    fn test_phrase_prefix_skipped_for_multi_value() {
        let q = query(json!({"id": "q", "dataField": "title", "value": ["harry", "potter"]}));
        let out = build_for(&q);
        let should = out["bool"]["should"].as_array().unwrap();
        assert!(should
            .iter()
            .all(|c| c["multi_match"]["type"] != "phrase_prefix"));
        assert_eq!(should.len(), 6);
    }

    #[test]
    fn test_rank_feature_raises_minimum_should_match() {
        let q = query(json!({
            "id": "q",
            "dataField": "title",
            "value": "harry",
            "rankFeature": {"pagerank": {"saturation": {"pivot": 8}}}
        }));
        let out = build_for(&q);
        assert_eq!(out["bool"]["minimum_should_match"], 2);
        let last = out["bool"]["should"].as_array().unwrap().last().unwrap().clone();
        assert_eq!(last["rank_feature"]["field"], "pagerank");
        assert_eq!(last["rank_feature"]["saturation"]["pivot"], 8);
    }

    #[test]
    fn test_blank_value_yields_nothing() {
        let q = query(json!({"id": "q", "dataField": "title", "value": "   "}));
        assert!(build(&q, &q.data_fields().unwrap()).unwrap().is_none());
    }

    #[test]
    fn test_category_narrowing_and_query_string() {
        let q = query(json!({
            "id": "q",
            "dataField": "title",
            "value": "harry",
            "queryString": true,
            "categoryField": "genre.keyword",
            "categoryValue": "fantasy"
        }));
        let out = build_for(&q);
        assert_eq!(out["bool"]["must"][0]["query_string"]["query"], "harry");
        assert_eq!(out["bool"]["must"][1]["term"]["genre.keyword"], "fantasy");
    }
}
