use http::Method;
use serde_json::{json, Value};

use super::types::{rule_index_mapping, Rule};
use crate::engine::EngineClient;
use crate::error::{GatewayError, Result};

/// Upper bound on rules fetched per percolation or listing.
const MAX_RULES: usize = 100;

pub fn rule_index(index: &str) -> String {
    format!("{}-rules", index)
}

/// Engine-backed rule persistence: one `{index}-rules` index per search
/// index, whose `query` field is a percolator.
#[derive(Clone, Debug)]
pub struct RuleStore {
    engine: EngineClient,
}

impl RuleStore {
    pub fn new(engine: EngineClient) -> Self {
        Self { engine }
    }

    async fn ensure_index(&self, index: &str) -> Result<()> {
        let name = rule_index(index);
        if self.engine.index_exists(&name).await? {
            return Ok(());
        }
        match self.engine.create_index(&name, &rule_index_mapping()).await {
            Ok(_) => {
                tracing::info!(index = %name, "[rules] created rule index");
                Ok(())
            }
            // Lost a creation race with a concurrent writer.
            Err(GatewayError::Upstream { status: 400, message })
                if message.contains("already_exists") || message.contains("already exists") =>
            {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn put(&self, index: &str, rule: &Rule) -> Result<()> {
        rule.validate()?;
        self.ensure_index(index).await?;
        let mut doc = serde_json::to_value(rule)?;
        // The percolator query is always recomputed from `if`.
        doc["query"] = rule.percolator_query();
        self.engine
            .index_doc(&rule_index(index), Some(&rule.id), &doc, true)
            .await?;
        Ok(())
    }

    pub async fn get(&self, index: &str, id: &str) -> Result<Option<Rule>> {
        let Some(source) = self.engine.get_doc(&rule_index(index), id).await? else {
            return Ok(None);
        };
        Ok(Some(parse_rule(id, source)?))
    }

    pub async fn delete(&self, index: &str, id: &str) -> Result<bool> {
        self.engine.delete_doc(&rule_index(index), id, true).await
    }

    pub async fn list(&self, index: &str) -> Result<Vec<Rule>> {
        let body = json!({
            "size": MAX_RULES,
            "query": { "match_all": {} },
            "sort": [{ "id": "asc" }]
        });
        match self.engine.search(&rule_index(index), &body).await {
            Ok(resp) => rules_from_hits(&resp),
            Err(GatewayError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Rules whose condition matches `term`, ordered by percolator score and
    /// then by id. A missing rule index means no rules.
    pub async fn percolate(&self, index: &str, term: &str) -> Result<Vec<Rule>> {
        let body = percolate_body(term);
        let path = format!("/{}/_search", rule_index(index));
        let Some(resp) = self.engine.json_opt(Method::POST, &path, Some(&body)).await? else {
            return Ok(Vec::new());
        };
        let rules = rules_from_hits(&resp)?;
        Ok(rules
            .into_iter()
            .filter(|r| r.is_enabled() && r.matches(term))
            .collect())
    }
}

pub fn percolate_body(term: &str) -> Value {
    json!({
        "size": MAX_RULES,
        "query": {
            "percolate": {
                "field": "query",
                "document": { "if": { "query": term.trim().to_lowercase() } }
            }
        },
        "sort": [{ "_score": "desc" }, { "id": "asc" }]
    })
}

fn parse_rule(id: &str, mut source: Value) -> Result<Rule> {
    if let Some(obj) = source.as_object_mut() {
        obj.insert("id".into(), Value::String(id.to_string()));
    }
    serde_json::from_value(source)
        .map_err(|e| GatewayError::Internal(format!("stored rule {} is malformed: {}", id, e)))
}

/// Decode the hits of a rule search, keeping the engine's hit order and
/// breaking score ties by id.
fn rules_from_hits(resp: &Value) -> Result<Vec<Rule>> {
    let hits = resp
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut scored = Vec::with_capacity(hits.len());
    for hit in hits {
        let Some(id) = hit.get("_id").and_then(Value::as_str) else {
            continue;
        };
        let score = hit.get("_score").and_then(Value::as_f64).unwrap_or(0.0);
        let Some(source) = hit.get("_source").cloned() else {
            continue;
        };
        match parse_rule(id, source) {
            Ok(rule) => scored.push((score, rule)),
            Err(e) => tracing::warn!("[rules] skipping rule: {}", e),
        }
    }
    scored.sort_by(|(sa, ra), (sb, rb)| {
        sb.partial_cmp(sa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| ra.id.cmp(&rb.id))
    });
    Ok(scored.into_iter().map(|(_, r)| r).collect())
}
