//! `range` value queries and range aggregations.

use serde_json::{json, Map, Value};

use super::types::{DataField, Query};
use crate::error::{GatewayError, Result};

pub fn build(query: &Query, fields: &[DataField]) -> Result<Option<Value>> {
    let Some(value) = query.value.as_ref().filter(|_| query.has_value()) else {
        return Ok(None);
    };
    let Some(field) = fields.first().map(|f| f.field.as_str()) else {
        return Err(GatewayError::Validation(format!(
            "query '{}': range queries need a dataField",
            query.id
        )));
    };

    let clause = match value {
        Value::Array(items) => {
            let should = items
                .iter()
                .map(|item| range_clause(query, field, item))
                .collect::<Result<Vec<_>>>()?;
            json!({ "bool": { "minimum_should_match": 1, "should": should } })
        }
        single => range_clause(query, field, single)?,
    };

    if query.include_null_values.unwrap_or(false) {
        return Ok(Some(json!({
            "bool": {
                "should": [
                    clause,
                    { "bool": { "must_not": { "exists": { "field": field } } } }
                ]
            }
        })));
    }
    Ok(Some(clause))
}

fn range_clause(query: &Query, field: &str, value: &Value) -> Result<Value> {
    let obj = value.as_object().ok_or_else(|| {
        GatewayError::Validation(format!(
            "query '{}': range value must be {{start, end}}",
            query.id
        ))
    })?;
    let mut bounds = Map::new();
    if let Some(start) = obj.get("start").filter(|v| !v.is_null()) {
        bounds.insert("gte".into(), start.clone());
    }
    if let Some(end) = obj.get("end").filter(|v| !v.is_null()) {
        bounds.insert("lte".into(), end.clone());
    }
    if let Some(boost) = obj.get("boost").filter(|v| !v.is_null()) {
        bounds.insert("boost".into(), boost.clone());
    }
    if let Some(format) = query.date_format() {
        bounds.insert("format".into(), json!(format));
    }
    Ok(json!({ "range": { field: bounds } }))
}

/// `max(1, ceil((end - start) / 100))`, raised to that minimum when an
/// interval is given.
pub fn histogram_interval(start: f64, end: f64, requested: Option<u64>) -> u64 {
    let span = (end - start).max(0.0);
    let computed = ((span / 100.0).ceil() as u64).max(1);
    match requested {
        Some(r) => r.max(computed),
        None => computed,
    }
}

/// `min`/`max`/`histogram` aggregations requested through `aggregations`.
pub fn aggregations(query: &Query, fields: &[DataField]) -> Map<String, Value> {
    let mut aggs = Map::new();
    let (Some(requested), Some(field)) = (&query.aggregations, fields.first()) else {
        return aggs;
    };
    let field = field.field.as_str();
    for name in requested {
        match name.as_str() {
            "min" => {
                aggs.insert("min".into(), json!({ "min": { "field": field } }));
            }
            "max" => {
                aggs.insert("max".into(), json!({ "max": { "field": field } }));
            }
            "histogram" => {
                if let Some((start, end)) = numeric_bounds(query.value.as_ref()) {
                    let interval = histogram_interval(start, end, query.interval);
                    aggs.insert(
                        field.to_string(),
                        json!({
                            "histogram": {
                                "field": field,
                                "interval": interval,
                                "offset": start,
                            }
                        }),
                    );
                }
            }
            _ => {}
        }
    }
    aggs
}

fn numeric_bounds(value: Option<&Value>) -> Option<(f64, f64)> {
    let obj = match value? {
        Value::Array(items) => items.first()?.as_object()?,
        Value::Object(o) => o,
        _ => return None,
    };
    let start = obj.get("start")?.as_f64()?;
    let end = obj.get("end")?.as_f64()?;
    Some((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(v: Value) -> Query {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn test_single_and_array_ranges() {
        let q = query(json!({
            "id": "r", "type": "range", "dataField": "price",
            "value": {"start": 10, "end": 20}
        }));
        let out = build(&q, &q.data_fields().unwrap()).unwrap().unwrap();
        assert_eq!(out, json!({"range": {"price": {"gte": 10, "lte": 20}}}));

        let q = query(json!({
            "id": "r", "type": "range", "dataField": "price",
            "value": [{"start": 0, "end": 5}, {"start": 50}]
        }));
        let out = build(&q, &q.data_fields().unwrap()).unwrap().unwrap();
        assert_eq!(out["bool"]["minimum_should_match"], 1);
        assert_eq!(out["bool"]["should"][1], json!({"range": {"price": {"gte": 50}}}));
    }

    #[test]
    fn test_null_values_and_date_format() {
        let q = query(json!({
            "id": "r", "type": "range", "dataField": "published",
            "value": {"start": "2020", "end": "2021"},
            "queryFormat": "yyyy", "includeNullValues": true
        }));
        let out = build(&q, &q.data_fields().unwrap()).unwrap().unwrap();
        assert_eq!(out["bool"]["should"][0]["range"]["published"]["format"], "yyyy");
        assert_eq!(
            out["bool"]["should"][1]["bool"]["must_not"]["exists"]["field"],
            "published"
        );
    }

    #[test]
    fn test_histogram_interval() {
        assert_eq!(histogram_interval(0.0, 1000.0, None), 10);
        assert_eq!(histogram_interval(0.0, 50.0, None), 1);
        assert_eq!(histogram_interval(0.0, 1001.0, None), 11);
        assert_eq!(histogram_interval(0.0, 1000.0, Some(3)), 10);
        assert_eq!(histogram_interval(0.0, 1000.0, Some(25)), 25);
    }

    #[test]
    fn test_min_max_histogram_aggs() {
        let q = query(json!({
            "id": "r", "type": "range", "dataField": "price",
            "value": {"start": 0, "end": 500},
            "aggregations": ["min", "max", "histogram"]
        }));
        let aggs = aggregations(&q, &q.data_fields().unwrap());
        assert_eq!(aggs["min"], json!({"min": {"field": "price"}}));
        assert_eq!(aggs["price"]["histogram"]["interval"], 5);
    }
}
