use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{GatewayError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Is,
    #[serde(alias = "startsWith")]
    StartsWith,
    #[serde(alias = "endsWith")]
    EndsWith,
    Contains,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub query: String,
    pub operator: Operator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Promote,
    Hide,
    Inject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    #[serde(rename = "docId", alias = "doc_id", default, skip_serializing_if = "Option::is_none")]
    pub doc_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
}

/// Actions of a rule. The `{operation, payloads}` form carries one action;
/// the `promote`/`hide`/`inject` lists may be combined.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Consequence {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payloads: Option<Vec<Payload>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promote: Option<Vec<Payload>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hide: Option<Vec<Payload>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inject: Option<Vec<Payload>>,
}

impl Consequence {
    /// Every `(action, payloads)` pair this rule performs.
    pub fn actions(&self) -> Vec<(Action, &[Payload])> {
        let mut out = Vec::new();
        if let (Some(op), Some(payloads)) = (self.operation, &self.payloads) {
            out.push((op, payloads.as_slice()));
        }
        if let Some(p) = &self.promote {
            out.push((Action::Promote, p.as_slice()));
        }
        if let Some(p) = &self.hide {
            out.push((Action::Hide, p.as_slice()));
        }
        if let Some(p) = &self.inject {
            out.push((Action::Inject, p.as_slice()));
        }
        out
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "if")]
    pub condition: Condition,
    pub then: Consequence,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Percolator query, derived from `if` on every write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<Value>,
    #[serde(skip)]
    matcher: OnceCell<Option<Regex>>,
}

impl Rule {
    /// Validate a client-supplied rule body and derive its percolator query.
    ///
    /// A client `query` field is a conflict: it is always computed from `if`.
    pub fn from_client(id: &str, raw: Value) -> Result<Self> {
        let obj = raw
            .as_object()
            .ok_or_else(|| GatewayError::Validation("rule body must be a JSON object".into()))?;
        if obj.contains_key("query") {
            return Err(GatewayError::Conflict(
                "the 'query' field is derived from 'if' and cannot be set".into(),
            ));
        }
        if !obj.contains_key("if") {
            return Err(GatewayError::Validation("rule 'if' is required".into()));
        }
        if !obj.contains_key("then") {
            return Err(GatewayError::Validation("rule 'then' is required".into()));
        }
        let mut rule: Rule = serde_json::from_value(raw)
            .map_err(|e| GatewayError::Validation(format!("invalid rule: {}", e)))?;
        rule.id = id.to_string();
        rule.validate()?;
        rule.query = Some(rule.percolator_query());
        Ok(rule)
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(GatewayError::Validation("rule id must not be empty".into()));
        }
        if self.condition.query.trim().is_empty() {
            return Err(GatewayError::Validation("rule 'if.query' must not be empty".into()));
        }
        let then = &self.then;
        if then.promote.as_ref().is_some_and(Vec::is_empty) {
            return Err(GatewayError::Validation("rule 'then.promote' must not be empty".into()));
        }
        if then.hide.as_ref().is_some_and(Vec::is_empty) {
            return Err(GatewayError::Validation("rule 'then.hide' must not be empty".into()));
        }
        if then.inject.as_ref().is_some_and(Vec::is_empty) {
            return Err(GatewayError::Validation("rule 'then.inject' must not be empty".into()));
        }
        if then.operation.is_some() && then.payloads.as_ref().map_or(true, Vec::is_empty) {
            return Err(GatewayError::Validation(
                "rule 'then.payloads' must not be empty".into(),
            ));
        }
        if then.payloads.is_some() && then.operation.is_none() {
            return Err(GatewayError::Validation(
                "rule 'then.operation' is required with 'payloads'".into(),
            ));
        }
        let actions = then.actions();
        if actions.is_empty() {
            return Err(GatewayError::Validation("rule needs at least one action".into()));
        }
        for (action, payloads) in actions {
            for payload in payloads {
                match action {
                    Action::Hide if payload.doc_id.is_none() => {
                        return Err(GatewayError::Validation(
                            "hide payloads need a 'docId'".into(),
                        ))
                    }
                    Action::Promote | Action::Inject
                        if payload.doc_id.is_none() && payload.doc.is_none() =>
                    {
                        return Err(GatewayError::Validation(
                            "promote and inject payloads need a 'docId' or a 'doc'".into(),
                        ))
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    /// Anchored pattern for the condition, over the lower-cased query.
    pub fn pattern(&self) -> String {
        compile_pattern(&self.condition.query, self.condition.operator)
    }

    /// Stored percolator query: a case-insensitive `regexp` on `if.query`.
    pub fn percolator_query(&self) -> Value {
        let term = lucene_escape(&self.condition.query.trim().to_lowercase());
        let value = match self.condition.operator {
            Operator::Is => term,
            Operator::StartsWith => format!("{}.*", term),
            Operator::EndsWith => format!(".+{}", term),
            Operator::Contains => format!(".*{}.*", term),
        };
        json!({
            "regexp": {
                "if.query": {
                    "value": value,
                    "case_insensitive": true,
                }
            }
        })
    }

    /// In-process check of the condition against a search term.
    pub fn matches(&self, term: &str) -> bool {
        let matcher = self
            .matcher
            .get_or_init(|| Regex::new(&format!("(?i){}", self.pattern())).ok());
        match matcher {
            Some(re) => re.is_match(term.trim()),
            None => false,
        }
    }
}

/// `is -> ^pat$`, `starts_with -> ^pat.*`, `ends_with -> .+pat$`,
/// `contains -> .*pat.*`.
pub fn compile_pattern(query: &str, operator: Operator) -> String {
    let pat = regex::escape(&query.trim().to_lowercase());
    match operator {
        Operator::Is => format!("^{}$", pat),
        Operator::StartsWith => format!("^{}.*", pat),
        Operator::EndsWith => format!(".+{}$", pat),
        Operator::Contains => format!(".*{}.*", pat),
    }
}

/// Escape Lucene regular-expression metacharacters.
fn lucene_escape(s: &str) -> String {
    const RESERVED: &str = ".?+*|{}[]()\"\\#@&<>~";
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if RESERVED.contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Mapping of a rule index: the percolator field plus the `if` keywords.
pub fn rule_index_mapping() -> Value {
    json!({
        "mappings": {
            "properties": {
                "query": { "type": "percolator" },
                "id": { "type": "keyword" },
                "if": {
                    "properties": {
                        "query": { "type": "keyword" },
                        "operator": { "type": "keyword" }
                    }
                },
                "then": { "type": "object", "enabled": false },
                "enabled": { "type": "boolean" },
                "description": { "type": "text" }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(v: Value) -> Result<Rule> {
        Rule::from_client("r1", v)
    }

    #[test]
    fn test_patterns() {
        assert_eq!(compile_pattern("Harry", Operator::Is), "^harry$");
        assert_eq!(compile_pattern("harry", Operator::StartsWith), "^harry.*");
        assert_eq!(compile_pattern("harry", Operator::EndsWith), ".+harry$");
        assert_eq!(compile_pattern("a.b", Operator::Contains), ".*a\\.b.*");
    }

    #[test]
    fn test_matches_case_insensitive() {
        let r = rule(json!({
            "if": {"query": "harry", "operator": "contains"},
            "then": {"operation": "hide", "payloads": [{"docId": "42"}]}
        }))
        .unwrap();
        assert!(r.matches("Harry Potter"));
        assert!(r.matches("the HARRY"));
        assert!(!r.matches("potter"));

        let r = rule(json!({
            "if": {"query": "harry", "operator": "is"},
            "then": {"hide": [{"docId": "42"}]}
        }))
        .unwrap();
        assert!(r.matches("harry"));
        assert!(!r.matches("harry potter"));
    }

    #[test]
    fn test_client_query_is_conflict() {
        let err = rule(json!({
            "if": {"query": "harry", "operator": "is"},
            "then": {"hide": [{"docId": "1"}]},
            "query": {"match_all": {}}
        }))
        .unwrap_err();
        assert!(matches!(err, GatewayError::Conflict(_)));
    }

    #[test]
    fn test_query_derived_from_if() {
        let r = rule(json!({
            "if": {"query": "Harry", "operator": "starts_with"},
            "then": {"promote": [{"docId": "7", "position": 0}]}
        }))
        .unwrap();
        assert_eq!(
            r.query.unwrap(),
            json!({"regexp": {"if.query": {"value": "harry.*", "case_insensitive": true}}})
        );
    }

    #[test]
    fn test_validation() {
        assert!(rule(json!({"then": {"hide": [{"docId": "1"}]}})).is_err());
        assert!(rule(json!({"if": {"query": "x", "operator": "is"}})).is_err());
        assert!(rule(json!({"if": {"query": "x", "operator": "is"}, "then": {"hide": []}})).is_err());
        assert!(rule(json!({"if": {"query": "x", "operator": "is"}, "then": {}})).is_err());
        assert!(rule(json!({
            "if": {"query": "x", "operator": "is"},
            "then": {"hide": [{"docId": "1"}], "promote": [{"doc": {"title": "ad"}}]}
        }))
        .is_ok());
    }
}
