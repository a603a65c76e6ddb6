use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};

static REINDEXED: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^(.*)_reindexed_(\d+)$").ok());

/// `books -> books_reindexed_1`, `books_reindexed_1 -> books_reindexed_2`.
pub fn next_reindexed_name(source: &str) -> String {
    if let Some(caps) = REINDEXED.as_ref().and_then(|re| re.captures(source)) {
        if let Ok(n) = caps[2].parse::<u64>() {
            return format!("{}_reindexed_{}", &caps[1], n + 1);
        }
    }
    format!("{}_reindexed_1", source)
}

/// Index settings the engine owns and rejects on index creation.
fn is_system_setting(key: &str) -> bool {
    matches!(key, "provided_name" | "creation_date" | "uuid" | "version") || key.starts_with("history")
}

/// Copy of `settings` (the `settings.index` object) without system keys.
pub fn strip_system_settings(settings: &Value) -> Value {
    match settings {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| !is_system_setting(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
        _ => json!({}),
    }
}

/// Original replica count, then force the fast-copy replica settings.
pub fn take_replicas(settings: &mut Value) -> Value {
    let original = settings
        .get("number_of_replicas")
        .cloned()
        .unwrap_or_else(|| json!("1"));
    if let Some(map) = settings.as_object_mut() {
        map.insert("number_of_replicas".into(), json!(0));
        map.insert("auto_expand_replicas".into(), json!(false));
    }
    original
}
