use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One recorded search session. Written when the search completes and later
/// updated by click, conversion and custom-event requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRecord {
    pub search_id: String,
    pub indices: Vec<String>,
    pub query: String,
    /// `key=value` pairs, one per applied filter.
    #[serde(default)]
    pub filters: Vec<String>,
    /// Ids of the first hits of the response.
    #[serde(default)]
    pub hits: Vec<String>,
    pub total_hits: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub took: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default)]
    pub custom_events: Map<String, Value>,
    #[serde(default)]
    pub click: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub click_position: Option<u32>,
    #[serde(default)]
    pub conversion: bool,
    pub timestamp: DateTime<Utc>,
    /// Day of the search (`YYYY-MM-DD`); the partition key of the views.
    pub datestamp: String,
}

impl SearchRecord {
    pub fn new(search_id: impl Into<String>, query: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            search_id: search_id.into(),
            indices: Vec::new(),
            query: query.into(),
            filters: Vec::new(),
            hits: Vec::new(),
            total_hits: 0,
            took: None,
            user_id: None,
            ip: None,
            country: None,
            custom_events: Map::new(),
            click: false,
            click_position: None,
            conversion: false,
            timestamp: at,
            datestamp: at.format("%Y-%m-%d").to_string(),
        }
    }

    /// Fill hit snapshot and totals from a search response.
    pub fn with_response(mut self, response: &Value, snapshot: usize) -> Self {
        self.total_hits = response
            .pointer("/hits/total/value")
            .or_else(|| response.pointer("/hits/total"))
            .and_then(Value::as_u64)
            .unwrap_or(0);
        self.hits = response
            .pointer("/hits/hits")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|h| h.get("_id").and_then(Value::as_str).map(str::to_string))
            .take(snapshot)
            .collect();
        self.took = response.get("took").and_then(Value::as_u64);
        self
    }
}

/// A later interaction with a recorded search.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Interaction {
    pub search_id: String,
    pub click: bool,
    pub click_position: Option<u32>,
    pub conversion: bool,
    pub custom_events: Map<String, Value>,
}

impl Interaction {
    pub fn is_empty(&self) -> bool {
        !self.click && !self.conversion && self.custom_events.is_empty()
    }

    /// Partial document merged into the stored record.
    pub fn patch(&self) -> Value {
        let mut doc = Map::new();
        if self.click {
            doc.insert("click".into(), Value::Bool(true));
            if let Some(pos) = self.click_position {
                doc.insert("click_position".into(), Value::from(pos));
            }
        }
        if self.conversion {
            doc.insert("conversion".into(), Value::Bool(true));
        }
        if !self.custom_events.is_empty() {
            doc.insert(
                "custom_events".into(),
                Value::Object(self.custom_events.clone()),
            );
        }
        Value::Object(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_response_snapshot() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap();
        let resp = json!({
            "took": 4,
            "hits": {"total": {"value": 3}, "hits": [{"_id": "a"}, {"_id": "b"}, {"_id": "c"}]}
        });
        let record = SearchRecord::new("s1", "harry", at).with_response(&resp, 2);
        assert_eq!(record.datestamp, "2024-05-01");
        assert_eq!(record.hits, vec!["a", "b"]);
        assert_eq!(record.total_hits, 3);
        assert_eq!(record.took, Some(4));
    }

    #[test]
    fn test_interaction_patch() {
        let interaction = Interaction {
            search_id: "s1".into(),
            click: true,
            click_position: Some(2),
            ..Default::default()
        };
        assert_eq!(interaction.patch(), json!({"click": true, "click_position": 2}));
        assert!(Interaction::default().is_empty());
    }
}
