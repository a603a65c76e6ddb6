use std::collections::HashSet;

use serde_json::Value;

use super::react;
use super::types::{DataField, Query, QueryType, RSQuery};
use crate::error::{GatewayError, Result};

const SYNONYMS_SUFFIX: &str = ".synonyms";

/// Structural checks that need no translation.
pub fn validate(rs: &RSQuery) -> Result<()> {
    if rs.query.is_empty() {
        return Err(GatewayError::Validation(
            "the 'query' array must contain at least one query".to_string(),
        ));
    }

    let mut ids = HashSet::new();
    for q in &rs.query {
        if q.id.trim().is_empty() {
            return Err(GatewayError::Validation(
                "every query needs a non-empty 'id'".to_string(),
            ));
        }
        if !ids.insert(q.id.as_str()) {
            return Err(GatewayError::Validation(format!(
                "query id '{}' is used more than once",
                q.id
            )));
        }
    }

    for q in &rs.query {
        if let Some(expr) = &q.react {
            for leaf in react::leaf_ids(expr) {
                if !ids.contains(leaf.as_str()) {
                    return Err(GatewayError::Validation(format!(
                        "query '{}' reacts to unknown query '{}'",
                        q.id, leaf
                    )));
                }
            }
        }
        data_fields(q)?;
    }

    if let Some(events) = rs.settings.as_ref().and_then(|s| s.custom_events.as_ref()) {
        for (key, value) in events {
            let valid = match value {
                Value::String(_) => true,
                Value::Array(items) => items.iter().all(Value::is_string),
                _ => false,
            };
            if !valid {
                return Err(GatewayError::Validation(format!(
                    "custom event '{}' must be a string or an array of strings",
                    key
                )));
            }
        }
    }
    Ok(())
}

/// Resolved data fields after synonym stripping and per-type arity checks.
///
/// `geo` needs exactly one field when it has a value. `term` accepts several
/// fields only for pivot facets, i.e. when the value is absent or an array.
pub fn data_fields(q: &Query) -> Result<Vec<DataField>> {
    let mut fields = q.data_fields()?;

    if q.enable_synonyms == Some(false) && !fields.is_empty() {
        fields.retain(|f| !f.field.ends_with(SYNONYMS_SUFFIX));
        if fields.is_empty() {
            return Err(GatewayError::Validation(format!(
                "query '{}': no dataField remains once synonym fields are removed",
                q.id
            )));
        }
    }

    match q.query_type {
        QueryType::Geo if fields.len() > 1 => Err(GatewayError::Validation(format!(
            "query '{}': geo queries accept a single dataField",
            q.id
        ))),
        QueryType::Term
            if fields.len() > 1
                && q.has_value()
                && !matches!(q.value, Some(Value::Array(_))) =>
        {
            Err(GatewayError::Validation(format!(
                "query '{}': term queries accept a single dataField unless the value is a pivot array",
                q.id
            )))
        }
        _ => Ok(fields),
    }
}
