//! Read-side analytics: each view is one aggregation query over the
//! analytics index, bounded by `from`/`to` dates.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{Duration, Utc};
use http::Method;
use serde_json::{json, Value};

use crate::engine::EngineClient;
use crate::error::{GatewayError, Result};

const DEFAULT_SIZE: usize = 100;
const MAX_SIZE: usize = 1000;
const DEFAULT_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    PopularSearches,
    NoResultsSearches,
    Summary,
    PopularFilters,
    PopularResults,
    Overview,
    Advanced,
    GeoIp,
    Latency,
}

impl View {
    pub const ALL: &'static [View] = &[
        View::PopularSearches,
        View::NoResultsSearches,
        View::Summary,
        View::PopularFilters,
        View::PopularResults,
        View::Overview,
        View::Advanced,
        View::GeoIp,
        View::Latency,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            View::PopularSearches => "popularsearches",
            View::NoResultsSearches => "noresultssearches",
            View::Summary => "summary",
            View::PopularFilters => "popularfilters",
            View::PopularResults => "popularresults",
            View::Overview => "overview",
            View::Advanced => "advanced",
            View::GeoIp => "geoip",
            View::Latency => "latency",
        }
    }
}

impl FromStr for View {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        View::ALL
            .iter()
            .copied()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| GatewayError::NotFound(format!("unknown analytics view '{}'", s)))
    }
}

/// `from`, `to` (dates, inclusive) and `size` query parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewParams {
    pub from: String,
    pub to: String,
    pub size: usize,
}

impl ViewParams {
    pub fn from_query(params: &HashMap<String, String>) -> Result<Self> {
        let now = Utc::now();
        let size = match params.get("size").filter(|s| !s.is_empty()) {
            Some(raw) => raw.parse::<usize>().map_err(|_| {
                GatewayError::Validation("'size' must be a non-negative integer".into())
            })?,
            None => DEFAULT_SIZE,
        };
        if size > MAX_SIZE {
            return Err(GatewayError::Validation(format!(
                "'size' must not exceed {}",
                MAX_SIZE
            )));
        }
        Ok(Self {
            from: params
                .get("from")
                .filter(|s| !s.is_empty())
                .cloned()
                .unwrap_or_else(|| {
                    (now - Duration::days(DEFAULT_WINDOW_DAYS))
                        .format("%Y-%m-%d")
                        .to_string()
                }),
            to: params
                .get("to")
                .filter(|s| !s.is_empty())
                .cloned()
                .unwrap_or_else(|| now.format("%Y-%m-%d").to_string()),
            size,
        })
    }

    fn range(&self) -> Value {
        json!({ "range": { "datestamp": { "gte": self.from, "lte": self.to } } })
    }
}

fn terms(field: &str, size: usize) -> Value {
    json!({ "terms": { "field": field, "size": size } })
}

fn click_subaggs() -> Value {
    json!({
        "clicks": { "filter": { "term": { "click": true } } },
        "conversions": { "filter": { "term": { "conversion": true } } }
    })
}

/// Aggregations of one view, keyed by result section.
fn aggs(view: View, p: &ViewParams) -> Value {
    match view {
        View::PopularSearches => json!({
            "popular_searches": {
                "terms": { "field": "query.keyword", "size": p.size },
                "aggs": click_subaggs()
            }
        }),
        View::NoResultsSearches => json!({
            "no_results_searches": {
                "filter": { "term": { "total_hits": 0 } },
                "aggs": { "queries": terms("query.keyword", p.size) }
            }
        }),
        View::Summary => json!({
            "clicks": { "filter": { "term": { "click": true } } },
            "conversions": { "filter": { "term": { "conversion": true } } },
            "no_results": { "filter": { "term": { "total_hits": 0 } } },
            "avg_took": { "avg": { "field": "took" } }
        }),
        View::PopularFilters => json!({
            "popular_filters": {
                "terms": { "field": "filters.keyword", "size": p.size },
                "aggs": click_subaggs()
            }
        }),
        View::PopularResults => json!({
            "popular_results": {
                "terms": { "field": "hits.keyword", "size": p.size },
                "aggs": click_subaggs()
            }
        }),
        View::Overview => json!({
            "search_histogram": {
                "date_histogram": { "field": "timestamp", "calendar_interval": "day" }
            }
        }),
        View::Advanced => {
            let mut all = serde_json::Map::new();
            for part in [
                View::PopularSearches,
                View::NoResultsSearches,
                View::PopularFilters,
                View::PopularResults,
                View::Overview,
            ] {
                if let Value::Object(m) = aggs(part, p) {
                    all.extend(m);
                }
            }
            Value::Object(all)
        }
        View::GeoIp => json!({ "countries": terms("country.keyword", p.size) }),
        View::Latency => json!({
            "latency": { "histogram": { "field": "took", "interval": 10, "min_doc_count": 1 } }
        }),
    }
}

/// Engine search body for a view.
pub fn view_body(view: View, params: &ViewParams) -> Value {
    json!({
        "size": 0,
        "track_total_hits": true,
        "query": { "bool": { "filter": [params.range()] } },
        "aggs": aggs(view, params)
    })
}

fn rate(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        ((part as f64 / total as f64) * 10_000.0).round() / 100.0
    }
}

fn doc_count(v: &Value) -> u64 {
    v.get("doc_count").and_then(Value::as_u64).unwrap_or(0)
}

fn buckets(aggs: &Value, pointer: &str) -> Vec<Value> {
    aggs.pointer(pointer)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn keyed_with_rates(aggs: &Value, pointer: &str) -> Vec<Value> {
    buckets(aggs, pointer)
        .iter()
        .map(|b| {
            let count = doc_count(b);
            let clicks = b.get("clicks").map(doc_count).unwrap_or(0);
            let conversions = b.get("conversions").map(doc_count).unwrap_or(0);
            json!({
                "key": b.get("key").cloned().unwrap_or(Value::Null),
                "count": count,
                "clicks": clicks,
                "click_rate": rate(clicks, count),
                "conversions": conversions,
                "conversion_rate": rate(conversions, count),
            })
        })
        .collect()
}

fn keyed(aggs: &Value, pointer: &str) -> Vec<Value> {
    buckets(aggs, pointer)
        .iter()
        .map(|b| {
            json!({
                "key": b.get("key_as_string").or_else(|| b.get("key")).cloned().unwrap_or(Value::Null),
                "count": doc_count(b),
            })
        })
        .collect()
}

/// Shape an engine aggregation response into the view's output.
pub fn parse_view(view: View, resp: &Value) -> Value {
    let aggs = resp.get("aggregations").cloned().unwrap_or_else(|| json!({}));
    let total = resp
        .pointer("/hits/total/value")
        .or_else(|| resp.pointer("/hits/total"))
        .and_then(Value::as_u64)
        .unwrap_or(0);
    match view {
        View::PopularSearches => json!({ "popular_searches": keyed_with_rates(&aggs, "/popular_searches/buckets") }),
        View::NoResultsSearches => json!({ "no_results_searches": keyed(&aggs, "/no_results_searches/queries/buckets") }),
        View::Summary => {
            let clicks = aggs.get("clicks").map(doc_count).unwrap_or(0);
            let conversions = aggs.get("conversions").map(doc_count).unwrap_or(0);
            let no_results = aggs.get("no_results").map(doc_count).unwrap_or(0);
            json!({
                "summary_results": {
                    "total_searches": total,
                    "avg_click_rate": rate(clicks, total),
                    "avg_conversion_rate": rate(conversions, total),
                    "no_results_rate": rate(no_results, total),
                    "avg_took": aggs.pointer("/avg_took/value").cloned().unwrap_or(Value::Null),
                }
            })
        }
        View::PopularFilters => json!({ "popular_filters": keyed_with_rates(&aggs, "/popular_filters/buckets") }),
        View::PopularResults => json!({ "popular_results": keyed_with_rates(&aggs, "/popular_results/buckets") }),
        View::Overview => json!({
            "total_searches": total,
            "search_histogram": keyed(&aggs, "/search_histogram/buckets"),
        }),
        View::Advanced => json!({
            "popular_searches": keyed_with_rates(&aggs, "/popular_searches/buckets"),
            "no_results_searches": keyed(&aggs, "/no_results_searches/queries/buckets"),
            "popular_filters": keyed_with_rates(&aggs, "/popular_filters/buckets"),
            "popular_results": keyed_with_rates(&aggs, "/popular_results/buckets"),
            "search_histogram": keyed(&aggs, "/search_histogram/buckets"),
        }),
        View::GeoIp => json!({ "countries": keyed(&aggs, "/countries/buckets") }),
        View::Latency => json!({ "latency": keyed(&aggs, "/latency/buckets") }),
    }
}

/// Run a view. A missing analytics index yields the empty view.
pub async fn run_view(
    engine: &EngineClient,
    index: &str,
    view: View,
    params: &ViewParams,
) -> Result<Value> {
    let path = format!("/{}/_search?ignore_unavailable=true", index);
    let resp = match engine
        .json(Method::POST, &path, Some(&view_body(view, params)))
        .await
    {
        Ok(resp) => resp,
        Err(GatewayError::NotFound(_)) => json!({}),
        Err(e) => return Err(e),
    };
    Ok(parse_view(view, &resp))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ViewParams {
        ViewParams {
            from: "2024-01-01".into(),
            to: "2024-01-31".into(),
            size: 5,
        }
    }

    #[test]
    fn test_view_names_round_trip() {
        for view in View::ALL {
            assert_eq!(view.as_str().parse::<View>().unwrap(), *view);
        }
        assert!(matches!("bogus".parse::<View>(), Err(GatewayError::NotFound(_))));
    }

    #[test]
    fn test_body_is_date_bounded() {
        let body = view_body(View::PopularSearches, &params());
        assert_eq!(body["size"], 0);
        assert_eq!(
            body["query"]["bool"]["filter"][0]["range"]["datestamp"],
            json!({"gte": "2024-01-01", "lte": "2024-01-31"})
        );
        assert_eq!(body["aggs"]["popular_searches"]["terms"]["size"], 5);
    }

    #[test]
    fn test_advanced_combines_sections() {
        let body = view_body(View::Advanced, &params());
        let aggs = body["aggs"].as_object().unwrap();
        for key in ["popular_searches", "no_results_searches", "popular_filters", "popular_results", "search_histogram"] {
            assert!(aggs.contains_key(key), "missing {}", key);
        }
    }

    #[test]
    fn test_parse_popular_searches_rates() {
        let resp = json!({
            "hits": {"total": {"value": 10}},
            "aggregations": {
                "popular_searches": {"buckets": [
                    {"key": "harry", "doc_count": 4, "clicks": {"doc_count": 1}, "conversions": {"doc_count": 0}}
                ]}
            }
        });
        let out = parse_view(View::PopularSearches, &resp);
        assert_eq!(out["popular_searches"][0]["key"], "harry");
        assert_eq!(out["popular_searches"][0]["click_rate"], 25.0);
    }

    #[test]
    fn test_parse_summary_with_no_data() {
        let out = parse_view(View::Summary, &json!({}));
        assert_eq!(out["summary_results"]["total_searches"], 0);
        assert_eq!(out["summary_results"]["avg_click_rate"], 0.0);
    }

    #[test]
    fn test_params_defaults_and_limits() {
        let p = ViewParams::from_query(&HashMap::new()).unwrap();
        assert_eq!(p.size, 100);
        assert!(p.from < p.to);
        let mut q = HashMap::new();
        q.insert("size".to_string(), "5000".to_string());
        assert!(ViewParams::from_query(&q).is_err());
    }
}
