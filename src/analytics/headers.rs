//! `X-Search-*` request headers.

use http::HeaderMap;
use serde_json::{Map, Value};

use super::schema::Interaction;

pub const SEARCH_QUERY: &str = "x-search-query";
pub const SEARCH_FILTERS: &str = "x-search-filters";
pub const SEARCH_ID: &str = "x-search-id";
pub const SEARCH_CLICK: &str = "x-search-click";
pub const SEARCH_CLICK_POSITION: &str = "x-search-click-position";
pub const SEARCH_CONVERSION: &str = "x-search-conversion";
pub const SEARCH_CUSTOM_EVENT: &str = "x-search-custom-event";

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn flag(headers: &HeaderMap, name: &str) -> bool {
    header(headers, name).is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

/// `k1=v1,k2=v2` pairs; entries without `=` are skipped.
pub fn parse_pairs(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            let (k, v) = (k.trim(), v.trim());
            (!k.is_empty()).then(|| (k.to_string(), v.to_string()))
        })
        .collect()
}

pub fn search_query(headers: &HeaderMap) -> Option<String> {
    header(headers, SEARCH_QUERY).map(str::to_string)
}

pub fn search_id(headers: &HeaderMap) -> Option<String> {
    header(headers, SEARCH_ID).map(str::to_string)
}

/// Filters as `key=value` strings.
pub fn search_filters(headers: &HeaderMap) -> Vec<String> {
    header(headers, SEARCH_FILTERS)
        .map(|raw| {
            parse_pairs(raw)
                .into_iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect()
        })
        .unwrap_or_default()
}

pub fn custom_events(headers: &HeaderMap) -> Map<String, Value> {
    header(headers, SEARCH_CUSTOM_EVENT)
        .map(|raw| {
            parse_pairs(raw)
                .into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect()
        })
        .unwrap_or_default()
}

/// Click/conversion/custom-event update for an earlier search; `None`
/// without `X-Search-Id` or without anything to record.
pub fn interaction(headers: &HeaderMap) -> Option<Interaction> {
    let search_id = search_id(headers)?;
    let interaction = Interaction {
        search_id,
        click: flag(headers, SEARCH_CLICK),
        click_position: header(headers, SEARCH_CLICK_POSITION).and_then(|v| v.parse().ok()),
        conversion: flag(headers, SEARCH_CONVERSION),
        custom_events: custom_events(headers),
    };
    (!interaction.is_empty()).then_some(interaction)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, v.parse().unwrap());
        }
        map
    }

    #[test]
    fn test_filters_and_custom_events() {
        let h = headers(&[
            ("x-search-filters", "genre=fantasy, year = 1997,bogus"),
            ("x-search-custom-event", "platform=ios"),
        ]);
        assert_eq!(search_filters(&h), vec!["genre=fantasy", "year=1997"]);
        assert_eq!(custom_events(&h)["platform"], "ios");
    }

    #[test]
    fn test_click_interaction() {
        let h = headers(&[
            ("x-search-id", "abc"),
            ("x-search-click", "true"),
            ("x-search-click-position", "3"),
        ]);
        let i = interaction(&h).unwrap();
        assert_eq!(i.search_id, "abc");
        assert!(i.click);
        assert_eq!(i.click_position, Some(3));
        assert!(!i.conversion);
    }

    #[test]
    fn test_search_id_alone_is_not_an_interaction() {
        assert!(interaction(&headers(&[("x-search-id", "abc")])).is_none());
        assert!(interaction(&headers(&[("x-search-click", "true")])).is_none());
    }
}
