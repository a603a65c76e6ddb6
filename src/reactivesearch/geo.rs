use serde_json::{json, Value};

use super::types::{DataField, Query};
use crate::error::{GatewayError, Result};

/// `{distance, unit, location}` -> `geo_distance`;
/// `{geoBoundingBox: {topLeft, bottomRight}}` -> `geo_bounding_box`.
pub fn build(query: &Query, fields: &[DataField]) -> Result<Option<Value>> {
    let Some(value) = query.value.as_ref().filter(|_| query.has_value()) else {
        return Ok(None);
    };
    if fields.len() != 1 {
        return Err(GatewayError::Validation(format!(
            "query '{}': geo queries need exactly one dataField",
            query.id
        )));
    }
    let field = fields[0].field.as_str();
    let invalid = || {
        GatewayError::Validation(format!(
            "query '{}': geo value must be {{distance, unit, location}} or {{geoBoundingBox}}",
            query.id
        ))
    };
    let obj = value.as_object().ok_or_else(invalid)?;

    if let Some(bbox) = obj.get("geoBoundingBox") {
        let top_left = bbox.get("topLeft").ok_or_else(invalid)?;
        let bottom_right = bbox.get("bottomRight").ok_or_else(invalid)?;
        return Ok(Some(json!({
            "geo_bounding_box": {
                field: {
                    "top_left": top_left,
                    "bottom_right": bottom_right,
                }
            }
        })));
    }

    let distance = obj.get("distance").ok_or_else(invalid)?;
    let location = obj.get("location").ok_or_else(invalid)?;
    let unit = obj.get("unit").and_then(Value::as_str).unwrap_or("mi");
    let distance = match distance {
        Value::Number(n) => format!("{}{}", n, unit),
        Value::String(s) => format!("{}{}", s, unit),
        _ => return Err(invalid()),
    };
    Ok(Some(json!({
        "geo_distance": {
            "distance": distance,
            field: location,
        }
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(v: Value) -> Query {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn test_geo_distance() {
        let q = query(json!({
            "id": "g", "type": "geo", "dataField": "location",
            "value": {"distance": 10, "unit": "km", "location": "50.1,8.6"}
        }));
        let out = build(&q, &q.data_fields().unwrap()).unwrap().unwrap();
        assert_eq!(
            out,
            json!({"geo_distance": {"distance": "10km", "location": "50.1,8.6"}})
        );
    }

    #[test]
    fn test_bounding_box() {
        let q = query(json!({
            "id": "g", "type": "geo", "dataField": "location",
            "value": {"geoBoundingBox": {"topLeft": "40,-74", "bottomRight": "39,-73"}}
        }));
        let out = build(&q, &q.data_fields().unwrap()).unwrap().unwrap();
        assert_eq!(out["geo_bounding_box"]["location"]["top_left"], "40,-74");
    }

    #[test]
    fn test_requires_single_field() {
        let q = query(json!({
            "id": "g", "type": "geo", "dataField": ["a", "b"],
            "value": {"distance": 1, "location": "0,0"}
        }));
        assert!(build(&q, &q.data_fields().unwrap()).is_err());
    }
}
