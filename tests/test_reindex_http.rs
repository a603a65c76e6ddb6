mod common;

use arcgate::DEFAULT_TENANT;
use serde_json::{json, Value};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn ok() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"acknowledged": true}))
}

/// Engine state of a plain `twitter` index with no aliases.
async fn mount_source_index(engine: &MockServer) {
    Mock::given(method("HEAD"))
        .and(path("/twitter"))
        .respond_with(ResponseTemplate::new(200))
        .mount(engine)
        .await;
    Mock::given(method("GET"))
        .and(path("/twitter/_mapping"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "twitter": {"mappings": {"properties": {"user": {"type": "keyword"}}}}
        })))
        .mount(engine)
        .await;
    Mock::given(method("GET"))
        .and(path("/twitter/_settings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "twitter": {"settings": {"index": {
                "number_of_shards": "1",
                "number_of_replicas": "2",
                "uuid": "abc",
                "creation_date": "1700000000000",
                "provided_name": "twitter"
            }}}
        })))
        .mount(engine)
        .await;
    Mock::given(method("PUT"))
        .and(path("/twitter_reindexed_1"))
        .respond_with(ok())
        .expect(1)
        .mount(engine)
        .await;
    Mock::given(method("PUT"))
        .and(path("/twitter_reindexed_1/_settings"))
        .respond_with(ok())
        .mount(engine)
        .await;
}

#[tokio::test]
async fn test_sync_reindex_swaps_alias() {
    let gw = common::spawn_gateway().await;
    mount_source_index(&gw.engine).await;
    Mock::given(method("POST"))
        .and(path("/_reindex"))
        .and(query_param("wait_for_completion", "true"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"took": 12, "total": 3, "failures": []})),
        )
        .expect(1)
        .mount(&gw.engine)
        .await;
    Mock::given(method("POST"))
        .and(path("/_aliases"))
        .respond_with(ok())
        .expect(1)
        .mount(&gw.engine)
        .await;

    let resp = gw
        .post("/_reindex/twitter?wait_for_completion=true")
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["source"], "twitter");
    assert_eq!(body["destination"], "twitter_reindexed_1");
    assert_eq!(body["aliases"], json!(["twitter"]));

    let created: Value =
        serde_json::from_str(&gw.engine_bodies("/twitter_reindexed_1").await[0]).unwrap();
    let settings = &created["settings"]["index"];
    assert_eq!(settings["number_of_replicas"], 0);
    assert!(settings.get("uuid").is_none());
    assert_eq!(created["mappings"]["properties"]["user"]["type"], "keyword");

    let copy: Value = serde_json::from_str(&gw.engine_bodies("/_reindex").await[0]).unwrap();
    assert_eq!(copy["source"]["index"], "twitter");
    assert_eq!(copy["dest"]["index"], "twitter_reindexed_1");

    let swap: Value = serde_json::from_str(&gw.engine_bodies("/_aliases").await[0]).unwrap();
    let actions = swap["actions"].as_array().unwrap();
    assert!(actions.contains(&json!({"add": {"index": "twitter_reindexed_1", "alias": "twitter"}})));
    assert!(actions.contains(&json!({"remove_index": {"index": "twitter"}})));

    let restored: Value =
        serde_json::from_str(&gw.engine_bodies("/twitter_reindexed_1/_settings").await[0]).unwrap();
    assert_eq!(restored["index"]["number_of_replicas"], "2");

    assert_eq!(
        gw.state.aliases.index_for_alias(DEFAULT_TENANT, "twitter"),
        Some("twitter_reindexed_1".to_string())
    );
}

#[tokio::test]
async fn test_async_reindex_returns_task() {
    let gw = common::spawn_gateway().await;
    mount_source_index(&gw.engine).await;
    Mock::given(method("POST"))
        .and(path("/_reindex"))
        .and(query_param("wait_for_completion", "false"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"task": "node:42"})))
        .expect(1)
        .mount(&gw.engine)
        .await;

    let resp = gw
        .post("/_reindex/twitter?wait_for_completion=false")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["taskId"], "node:42");

    // A second attempt while the task runs returns the same ticket.
    let again: Value = gw
        .post("/_reindex/twitter?wait_for_completion=false")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(again["taskId"], "node:42");

    let tasks: Value = gw.get("/_reindex/tasks").send().await.unwrap().json().await.unwrap();
    assert_eq!(tasks.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_failed_copy_discards_destination() {
    let gw = common::spawn_gateway().await;
    mount_source_index(&gw.engine).await;
    Mock::given(method("POST"))
        .and(path("/_reindex"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "failures": [{"cause": {"reason": "mapper_parsing_exception"}}]
        })))
        .mount(&gw.engine)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/twitter_reindexed_1"))
        .respond_with(ok())
        .expect(1)
        .mount(&gw.engine)
        .await;

    let resp = gw.post("/_reindex/twitter").send().await.unwrap();
    assert_eq!(resp.status(), 500);
    assert!(gw.engine_bodies("/_aliases").await.is_empty());
}

#[tokio::test]
async fn test_unknown_source_is_not_found() {
    let gw = common::spawn_gateway().await;

    let resp = gw.post("/_reindex/nope").send().await.unwrap();
    assert_eq!(resp.status(), 404);
}
