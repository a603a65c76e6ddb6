mod common;

use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_rule(engine: &MockServer, id: &str, rule: Value) {
    Mock::given(method("POST"))
        .and(path("/books-rules/_search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "hits": {"hits": [{"_id": id, "_score": 1.0, "_source": rule}]}
        })))
        .mount(engine)
        .await;
}

fn harry_hits() -> Value {
    json!({"hits": {"total": {"value": 2}, "hits": [
        {"_id": "1", "_source": {"title": "Harry Potter"}},
        {"_id": "42", "_source": {"title": "Harry Potter 2"}}
    ]}})
}

#[tokio::test]
async fn test_hide_rule_removes_hit_from_reactivesearch() {
    let gw = common::spawn_gateway().await;
    mount_rule(
        &gw.engine,
        "hide-42",
        json!({
            "if": {"query": "harry", "operator": "contains"},
            "then": {"operation": "hide", "payloads": [{"docId": "42"}]}
        }),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/books/_msearch"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"took": 3, "responses": [harry_hits()]})),
        )
        .mount(&gw.engine)
        .await;

    let resp = gw
        .post("/books/_reactivesearch")
        .json(&json!({"query": [{"id": "S", "dataField": ["title"], "value": "harry"}]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    let ids: Vec<&str> = body["S"]["hits"]["hits"]
        .as_array()
        .unwrap()
        .iter()
        .map(|h| h["_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["1"]);

    let percolate: Value =
        serde_json::from_str(&gw.engine_bodies("/books-rules/_search").await[0]).unwrap();
    assert_eq!(
        percolate["query"]["percolate"]["document"]["if"]["query"],
        "harry"
    );
}

#[tokio::test]
async fn test_promote_rule_pins_hit_on_proxied_search() {
    let gw = common::spawn_gateway().await;
    mount_rule(
        &gw.engine,
        "pin-42",
        json!({
            "if": {"query": "harry", "operator": "is"},
            "then": {"promote": [{"docId": "42", "position": 0}]}
        }),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/books/_search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(harry_hits()))
        .mount(&gw.engine)
        .await;
    Mock::given(method("GET"))
        .and(path("/books/_doc/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "_id": "42", "found": true, "_source": {"title": "Harry Potter 2"}
        })))
        .mount(&gw.engine)
        .await;

    let resp = gw
        .post("/books/_search")
        .header("x-search-query", "Harry")
        .json(&json!({"query": {"match": {"title": "harry"}}}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["hits"]["hits"][0]["_id"], "42");
    assert_eq!(body["hits"]["hits"][1]["_id"], "1");
    assert_eq!(body["promoted"][0]["_id"], "42");
}

#[tokio::test]
async fn test_rule_lookup_failure_is_ignored() {
    let gw = common::spawn_gateway().await;
    Mock::given(method("POST"))
        .and(path("/books-rules/_search"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&gw.engine)
        .await;
    Mock::given(method("POST"))
        .and(path("/books/_msearch"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"took": 3, "responses": [harry_hits()]})),
        )
        .mount(&gw.engine)
        .await;

    let resp = gw
        .post("/books/_reactivesearch")
        .json(&json!({"query": [{"id": "S", "dataField": ["title"], "value": "harry"}]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["S"]["hits"]["hits"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_saving_a_rule_with_query_is_a_conflict() {
    let gw = common::spawn_gateway().await;

    let resp = gw
        .client
        .put(format!("{}/books/_rule/r1", gw.url))
        .basic_auth(common::MASTER_USER, Some(common::MASTER_PASS))
        .json(&json!({
            "if": {"query": "harry", "operator": "is"},
            "then": {"hide": [{"docId": "1"}]},
            "query": {"match_all": {}}
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
}

#[tokio::test]
async fn test_save_rule_creates_percolator_index() {
    let gw = common::spawn_gateway().await;
    Mock::given(method("PUT"))
        .and(path("/books-rules"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"acknowledged": true})))
        .expect(1)
        .mount(&gw.engine)
        .await;
    Mock::given(method("PUT"))
        .and(path("/books-rules/_doc/r1"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"result": "created"})))
        .expect(1)
        .mount(&gw.engine)
        .await;

    let resp = gw
        .client
        .put(format!("{}/books/_rule/r1", gw.url))
        .basic_auth(common::MASTER_USER, Some(common::MASTER_PASS))
        .json(&json!({
            "if": {"query": "Harry", "operator": "starts_with"},
            "then": {"hide": [{"docId": "1"}]}
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["result"], "saved");

    let doc: Value =
        serde_json::from_str(&gw.engine_bodies("/books-rules/_doc/r1").await[0]).unwrap();
    assert!(doc["query"].is_object());
    assert!(doc.get("id").is_some());
}
