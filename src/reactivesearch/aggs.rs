//! Aggregation options shared by every query type.

use serde_json::{json, Map, Value};

use super::types::{DataField, Query, QueryType};
use super::{range, term};

/// Key under which `nestedField` aggregations are wrapped.
pub const NESTED_AGGS_KEY: &str = "reactivesearch_nested";

const DEFAULT_AGGREGATION_SIZE: u64 = 100;

pub fn build(query: &Query, fields: &[DataField]) -> Option<Value> {
    let mut aggs = match query.query_type {
        QueryType::Term => term::aggregations(query, fields),
        QueryType::Range => range::aggregations(query, fields),
        _ => Map::new(),
    };

    if query.query_type != QueryType::Term {
        if let Some(field) = &query.aggregation_field {
            aggs.insert(field.clone(), composite_with_top_hit(query, field));
        }
    }

    if matches!(query.query_type, QueryType::Search | QueryType::Suggestion) {
        if let Some(field) = &query.category_field {
            aggs.insert(
                field.clone(),
                json!({
                    "terms": {
                        "field": field,
                        "size": query.aggregation_size.unwrap_or(DEFAULT_AGGREGATION_SIZE),
                    }
                }),
            );
        }
    }

    if aggs.is_empty() {
        return None;
    }

    if let Some(path) = &query.nested_field {
        return Some(json!({
            NESTED_AGGS_KEY: {
                "nested": { "path": path },
                "aggs": aggs,
            }
        }));
    }
    Some(Value::Object(aggs))
}

fn composite_with_top_hit(query: &Query, field: &str) -> Value {
    let mut composite = json!({
        "sources": [{ field: { "terms": { "field": field } } }],
        "size": query.aggregation_size.or(query.size).unwrap_or(DEFAULT_AGGREGATION_SIZE),
    });
    if let Some(after) = &query.after {
        composite["after"] = after.clone();
    }
    json!({
        "composite": composite,
        "aggs": {
            field: { "top_hits": { "size": 1 } }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(v: Value) -> Query {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn test_aggregation_field_on_search() {
        let q = query(json!({
            "id": "s", "dataField": "title", "aggregationField": "isbn.keyword",
            "after": {"isbn.keyword": "123"}
        }));
        let aggs = build(&q, &q.data_fields().unwrap()).unwrap();
        let agg = &aggs["isbn.keyword"];
        assert_eq!(agg["composite"]["after"]["isbn.keyword"], "123");
        assert_eq!(agg["aggs"]["isbn.keyword"]["top_hits"]["size"], 1);
    }

    #[test]
    fn test_category_field_terms() {
        let q = query(json!({
            "id": "s", "dataField": "title", "categoryField": "genre",
            "aggregationSize": 7
        }));
        let aggs = build(&q, &q.data_fields().unwrap()).unwrap();
        assert_eq!(aggs["genre"]["terms"]["size"], 7);
    }

    #[test]
    fn test_nested_wrapping() {
        let q = query(json!({
            "id": "t", "type": "term", "dataField": "variants.color",
            "nestedField": "variants"
        }));
        let aggs = build(&q, &q.data_fields().unwrap()).unwrap();
        assert_eq!(aggs[NESTED_AGGS_KEY]["nested"]["path"], "variants");
        assert!(aggs[NESTED_AGGS_KEY]["aggs"]["variants.color"]["terms"].is_object());
    }

    #[test]
    fn test_plain_search_has_no_aggs() {
        let q = query(json!({"id": "s", "dataField": "title", "value": "x"}));
        assert!(build(&q, &q.data_fields().unwrap()).is_none());
    }
}
