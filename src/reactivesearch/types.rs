use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{GatewayError, Result};

/// A ReactiveSearch request: an ordered list of query nodes plus settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RSQuery {
    #[serde(default)]
    pub query: Vec<Query>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Settings>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_analytics: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Values must be strings or arrays of strings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_events: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_query_rules: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_cache: Option<bool>,
}

impl Settings {
    pub fn records_analytics(&self) -> bool {
        self.record_analytics.unwrap_or(false)
    }

    pub fn query_rules_enabled(&self) -> bool {
        self.enable_query_rules.unwrap_or(true)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    #[default]
    Search,
    Term,
    Range,
    Geo,
    Suggestion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    Asc,
    Desc,
    Count,
}

impl SortBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortBy::Asc => "asc",
            SortBy::Desc => "desc",
            SortBy::Count => "count",
        }
    }
}

/// One node of the query DAG.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub id: String,
    #[serde(rename = "type", default)]
    pub query_type: QueryType,
    /// String, `{field, weight}`, or an array of either.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_field: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_weights: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// `and`, `or`, or (range only) a date format.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fuzziness: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_string: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_operators: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_synonyms: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlight: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlight_field: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_highlight: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregations: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation_include: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation_exclude: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub select_all_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_missing: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nested_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distinct_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distinct_field_config: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_fields: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_fields: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_null_values: Option<bool>,
    /// Histogram interval for range aggregations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank_feature: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_query: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_query: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<SortBy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_field: Option<String>,
    /// Dependency expression: an id, an array of ids, or `{and|or|not: ...}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub react: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execute: Option<bool>,
}

impl Query {
    pub fn executes(&self) -> bool {
        self.execute.unwrap_or(true)
    }

    pub fn is_and_format(&self) -> bool {
        self.query_format.as_deref() == Some("and")
    }

    /// `queryFormat` when it is neither `and` nor `or` (range date formats).
    pub fn date_format(&self) -> Option<&str> {
        self.query_format
            .as_deref()
            .filter(|f| *f != "and" && *f != "or")
    }

    pub fn show_missing(&self) -> bool {
        self.show_missing.unwrap_or(false)
    }

    pub fn missing_label(&self) -> &str {
        self.missing_label.as_deref().unwrap_or("N/A")
    }

    pub fn data_fields(&self) -> Result<Vec<DataField>> {
        let mut fields = match &self.data_field {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(DataField::from_value)
                .collect::<Result<Vec<_>>>()?,
            Some(other) => vec![DataField::from_value(other)?],
        };
        if let Some(weights) = &self.field_weights {
            for (field, weight) in fields.iter_mut().zip(weights) {
                if field.weight.is_none() {
                    field.weight = Some(*weight);
                }
            }
        }
        Ok(fields)
    }

    /// Whether a usable value is present. Blank strings and empty arrays
    /// count as no value.
    pub fn has_value(&self) -> bool {
        match &self.value {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.trim().is_empty(),
            Some(Value::Array(a)) => !a.is_empty(),
            Some(Value::Object(o)) => !o.is_empty(),
            Some(_) => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataField {
    pub field: String,
    pub weight: Option<f64>,
}

impl DataField {
    fn from_value(v: &Value) -> Result<Self> {
        match v {
            Value::String(s) => Ok(Self::parse(s)),
            Value::Object(o) => {
                let field = o
                    .get("field")
                    .and_then(Value::as_str)
                    .ok_or_else(|| GatewayError::Validation("dataField object needs a 'field'".into()))?;
                Ok(Self {
                    field: field.to_string(),
                    weight: o.get("weight").and_then(Value::as_f64),
                })
            }
            other => Err(GatewayError::Validation(format!(
                "invalid dataField entry: {}",
                other
            ))),
        }
    }

    /// `title^3` -> field `title`, weight 3.
    fn parse(s: &str) -> Self {
        match s.rsplit_once('^') {
            Some((field, w)) => match w.parse::<f64>() {
                Ok(weight) => Self {
                    field: field.to_string(),
                    weight: Some(weight),
                },
                Err(_) => Self {
                    field: s.to_string(),
                    weight: None,
                },
            },
            None => Self {
                field: s.to_string(),
                weight: None,
            },
        }
    }

    /// `field^weight`, or the bare field when unweighted.
    pub fn weighted(&self) -> String {
        match self.weight {
            Some(w) => format!("{}^{}", self.field, w),
            None => self.field.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_data_field_shapes() {
        let q: Query = serde_json::from_value(json!({
            "id": "q",
            "dataField": ["title^3", {"field": "author", "weight": 2}, "body"],
            "fieldWeights": [1, 1, 5]
        }))
        .unwrap();
        let fields = q.data_fields().unwrap();
        assert_eq!(fields[0].weighted(), "title^3");
        assert_eq!(fields[1].weighted(), "author^2");
        assert_eq!(fields[2].weighted(), "body^5");
    }

    #[test]
    fn test_defaults() {
        let q: Query = serde_json::from_value(json!({"id": "q"})).unwrap();
        assert_eq!(q.query_type, QueryType::Search);
        assert!(q.executes());
        assert!(!q.has_value());
        assert_eq!(q.missing_label(), "N/A");
    }
}
