mod common;

use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

fn msearch_reply(responses: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"took": 4, "responses": responses}))
}

/// Second line of each `(header, body)` pair of an `_msearch` payload.
fn payload_bodies(payload: &str) -> Vec<Value> {
    payload
        .lines()
        .skip(1)
        .step_by(2)
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

#[tokio::test]
async fn test_basic_search_is_translated_and_composed() {
    let gw = common::spawn_gateway().await;
    Mock::given(method("POST"))
        .and(path("/books/_msearch"))
        .respond_with(msearch_reply(json!([
            {"hits": {"total": {"value": 1}, "hits": [{"_id": "1", "_source": {"title": "Harry Potter"}}]}}
        ])))
        .expect(1)
        .mount(&gw.engine)
        .await;

    let resp = gw
        .post("/books/_reactivesearch")
        .json(&json!({"query": [{"id": "B", "dataField": ["title"], "value": "harry", "size": 20}]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["settings"]["took"], 4);
    assert_eq!(body["B"]["hits"]["hits"][0]["_id"], "1");

    let sent = gw.engine_bodies("/books/_msearch").await;
    assert_eq!(sent.len(), 1);
    let lines: Vec<&str> = sent[0].lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], r#"{"preference":"B"}"#);
    let query: Value = serde_json::from_str(lines[1]).unwrap();
    assert_eq!(query["size"], 20);
    assert_eq!(query["_source"]["includes"], json!(["*"]));
    assert_eq!(query["query"]["bool"]["should"].as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn test_react_and_sends_only_executable_nodes() {
    let gw = common::spawn_gateway().await;
    Mock::given(method("POST"))
        .and(path("/books/_msearch"))
        .respond_with(msearch_reply(json!([{"hits": {"hits": []}}])))
        .mount(&gw.engine)
        .await;

    let resp = gw
        .post("/books/_reactivesearch")
        .json(&json!({"query": [
            {"id": "B", "dataField": ["title"], "value": "harry", "execute": false},
            {"id": "R", "dataField": ["title"], "react": {"and": "B"}}
        ]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert!(body.get("R").is_some());
    assert!(body.get("B").is_none());

    let sent = gw.engine_bodies("/books/_msearch").await;
    let lines: Vec<&str> = sent[0].lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], r#"{"preference":"R"}"#);
    let r = &payload_bodies(&sent[0])[0];
    let must = r["query"]["bool"]["must"].as_array().unwrap();
    assert!(must[0]["bool"]["should"].is_array());
}

#[tokio::test]
async fn test_term_with_missing_bucket() {
    let gw = common::spawn_gateway().await;
    Mock::given(method("POST"))
        .and(path("/books/_msearch"))
        .respond_with(msearch_reply(json!([
            {"hits": {"hits": []}, "aggregations": {"b.raw": {"buckets": [{"key": "N/A", "doc_count": 3}]}}}
        ])))
        .mount(&gw.engine)
        .await;

    let resp = gw
        .post("/books/_reactivesearch")
        .json(&json!({"query": [{
            "id": "T", "type": "term", "dataField": ["b.raw"],
            "value": ["X"], "showMissing": true, "size": 100
        }]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["T"]["aggregations"]["b.raw"]["buckets"][0]["key"], "N/A");

    let sent = gw.engine_bodies("/books/_msearch").await;
    let t = &payload_bodies(&sent[0])[0];
    assert_eq!(t["query"], json!({"match_all": {}}));
    assert_eq!(t["aggs"]["b.raw"]["terms"]["missing"], "N/A");
    assert_eq!(t["aggs"]["b.raw"]["terms"]["size"], 100);
}

#[tokio::test]
async fn test_validate_returns_payload_without_calling_engine() {
    let gw = common::spawn_gateway().await;

    let resp = gw
        .post("/books/_reactivesearch/validate")
        .json(&json!({"query": [{"id": "B", "dataField": ["title"], "value": "harry"}]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let text = resp.text().await.unwrap();
    assert!(text.starts_with(r#"{"preference":"B"}"#));
    assert_eq!(text.lines().count(), 2);
    assert!(gw.engine_bodies("/books/_msearch").await.is_empty());
}

#[tokio::test]
async fn test_reactive_cycle_is_bad_request() {
    let gw = common::spawn_gateway().await;

    let resp = gw
        .post("/books/_reactivesearch")
        .json(&json!({"query": [
            {"id": "A", "value": "x", "dataField": "f", "react": {"and": "B"}},
            {"id": "B", "value": "y", "dataField": "f", "react": {"and": "A"}}
        ]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], 400);
}

#[tokio::test]
async fn test_engine_failure_is_normalised() {
    let gw = common::spawn_gateway().await;
    Mock::given(method("POST"))
        .and(path("/books/_msearch"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&gw.engine)
        .await;

    let resp = gw
        .post("/books/_reactivesearch")
        .json(&json!({"query": [{"id": "B", "dataField": ["title"], "value": "harry"}]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("search engine failed"));
}
