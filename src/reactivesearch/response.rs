use http::StatusCode;
use serde_json::{json, Map, Value};

use crate::error::{GatewayError, Result};

/// Fold an engine `_msearch` response into the ReactiveSearch shape:
/// `{settings: {took}, <query id>: <response>, ...}`.
///
/// An engine-level `error` is passed through under `error` with the engine's
/// status; 5xx responses are replaced by a normalised upstream error.
pub fn compose(ids: &[String], status: StatusCode, body: &[u8]) -> Result<(StatusCode, Value)> {
    if status.is_server_error() {
        tracing::error!(
            status = status.as_u16(),
            body = %String::from_utf8_lossy(body),
            "[reactivesearch] engine failed the msearch"
        );
        return Err(GatewayError::upstream(
            status.as_u16(),
            "the search engine failed to process the request",
        ));
    }

    let parsed: Value = serde_json::from_slice(body).map_err(|e| {
        GatewayError::upstream(502, format!("invalid msearch response from engine: {}", e))
    })?;

    if let Some(error) = parsed.get("error") {
        return Ok((status, json!({ "error": error })));
    }

    let took = parsed.get("took").cloned().unwrap_or_else(|| json!(0));
    let responses = parsed
        .get("responses")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut out = Map::new();
    out.insert("settings".into(), json!({ "took": took }));
    for (id, response) in ids.iter().zip(responses) {
        out.insert(id.clone(), response);
    }
    Ok((status, Value::Object(out)))
}

/// `took` of a search response or `settings.took` of a ReactiveSearch one.
pub fn extract_took(body: &Value) -> Option<u64> {
    body.get("took")
        .and_then(Value::as_u64)
        .or_else(|| body.pointer("/settings/took").and_then(Value::as_u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distributes_responses_by_id() {
        let engine = json!({
            "took": 12,
            "responses": [{"hits": {"hits": []}}, {"aggregations": {}}]
        });
        let (status, body) = compose(
            &["a".to_string(), "b".to_string()],
            StatusCode::OK,
            engine.to_string().as_bytes(),
        )
        .unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["settings"]["took"], 12);
        assert!(body["a"]["hits"].is_object());
        assert!(body["b"]["aggregations"].is_object());
        assert_eq!(extract_took(&body), Some(12));
    }

    #[test]
    fn test_engine_error_propagates_status() {
        let engine = json!({"error": {"type": "parsing_exception", "reason": "bad"}, "status": 400});
        let (status, body) =
            compose(&[], StatusCode::BAD_REQUEST, engine.to_string().as_bytes()).unwrap();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["reason"], "bad");
    }

    #[test]
    fn test_server_errors_are_normalised() {
        let err = compose(&[], StatusCode::SERVICE_UNAVAILABLE, b"{}").unwrap_err();
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(err.to_string().contains("failed to process"));
    }
}
