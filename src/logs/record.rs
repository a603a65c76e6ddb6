use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use http::HeaderMap;
use serde::{Deserialize, Serialize};

use super::diff::Change;

/// Request and response bodies are cut at this many bytes.
pub const MAX_LOGGED_BODY: usize = 1024 * 1024;

/// Status recorded when the client went away before a response existed.
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggedRequest {
    pub uri: String,
    pub method: String,
    pub headers: BTreeMap<String, Vec<String>>,
    pub body: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggedResponse {
    pub code: u16,
    pub status: String,
    pub headers: BTreeMap<String, Vec<String>>,
    pub body: String,
    #[serde(default)]
    pub took: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: String,
    pub indices: Vec<String>,
    pub category: String,
    #[serde(default)]
    pub acl: String,
    pub request: LoggedRequest,
    pub response: LoggedResponse,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_changes: Option<Vec<Change>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_changes: Option<Vec<Change>>,
}

impl LoggedRequest {
    pub fn new(uri: &str, method: &str, headers: &HeaderMap, body: &[u8]) -> Self {
        Self {
            uri: uri.to_string(),
            method: method.to_string(),
            headers: header_map(headers),
            body: truncate_body(body),
        }
    }
}

impl LoggedResponse {
    pub fn new(code: u16, headers: &HeaderMap, body: &[u8], took: Option<u64>) -> Self {
        let status = http::StatusCode::from_u16(code)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or(if code == CLIENT_CLOSED_REQUEST {
                "Client Closed Request"
            } else {
                ""
            })
            .to_string();
        Self {
            code,
            status,
            headers: header_map(headers),
            body: truncate_body(body),
            took,
        }
    }
}

/// Headers as a name -> values map; credentials are never logged.
pub fn header_map(headers: &HeaderMap) -> BTreeMap<String, Vec<String>> {
    let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in headers {
        if *name == http::header::AUTHORIZATION || *name == http::header::COOKIE {
            continue;
        }
        out.entry(name.as_str().to_string())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    out
}

/// Body as text, cut at [`MAX_LOGGED_BODY`] on a char boundary.
pub fn truncate_body(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.len() <= MAX_LOGGED_BODY {
        return text.into_owned();
    }
    let mut end = MAX_LOGGED_BODY;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncates_at_one_megabyte() {
        let body = vec![b'a'; MAX_LOGGED_BODY + 10];
        assert_eq!(truncate_body(&body).len(), MAX_LOGGED_BODY);

        let mut multibyte = vec![b'a'; MAX_LOGGED_BODY - 1];
        multibyte.extend_from_slice("é".as_bytes());
        let cut = truncate_body(&multibyte);
        assert_eq!(cut.len(), MAX_LOGGED_BODY - 1);
    }

    #[test]
    fn test_authorization_not_logged() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Basic eDp5".parse().unwrap());
        headers.insert("x-search-query", "harry".parse().unwrap());
        let map = header_map(&headers);
        assert!(!map.contains_key("authorization"));
        assert_eq!(map["x-search-query"], vec!["harry"]);
    }

    #[test]
    fn test_cancelled_status_text() {
        let resp = LoggedResponse::new(CLIENT_CLOSED_REQUEST, &HeaderMap::new(), b"", None);
        assert_eq!(resp.status, "Client Closed Request");
        let resp = LoggedResponse::new(200, &HeaderMap::new(), b"{}", Some(3));
        assert_eq!(resp.status, "OK");
    }
}
