//! The `react` dependency expression.
//!
//! A react expression is an id, an array of expressions (implicit `and`), or
//! an object whose `and`/`or`/`not` keys hold expressions. Leaves are query
//! ids; `and` maps to `must`, `or` to `should` with `minimum_should_match: 1`
//! and `not` to `must_not`.

use serde_json::{json, Map, Value};

use crate::error::{GatewayError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    And,
    Or,
    Not,
}

impl Combinator {
    fn from_key(key: &str) -> Option<Self> {
        match key {
            "and" => Some(Combinator::And),
            "or" => Some(Combinator::Or),
            "not" => Some(Combinator::Not),
            _ => None,
        }
    }
}

/// Clause lists of a boolean query under construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoolParts {
    pub must: Vec<Value>,
    pub should: Vec<Value>,
    pub must_not: Vec<Value>,
}

impl BoolParts {
    pub fn is_empty(&self) -> bool {
        self.must.is_empty() && self.should.is_empty() && self.must_not.is_empty()
    }

    pub fn push(&mut self, combinator: Combinator, clause: Value) {
        match combinator {
            Combinator::And => self.must.push(clause),
            Combinator::Or => self.should.push(clause),
            Combinator::Not => self.must_not.push(clause),
        }
    }

    pub fn into_query(self) -> Option<Value> {
        if self.is_empty() {
            return None;
        }
        let mut body = Map::new();
        if !self.must.is_empty() {
            body.insert("must".into(), Value::Array(self.must));
        }
        if !self.should.is_empty() {
            body.insert("minimum_should_match".into(), json!(1));
            body.insert("should".into(), Value::Array(self.should));
        }
        if !self.must_not.is_empty() {
            body.insert("must_not".into(), Value::Array(self.must_not));
        }
        Some(json!({ "bool": body }))
    }
}

/// Compile an expression, resolving each leaf id through `resolve`.
/// Leaves that resolve to `None` contribute nothing.
pub fn compile<F>(expr: &Value, resolve: &mut F) -> Result<BoolParts>
where
    F: FnMut(&str) -> Result<Option<Value>>,
{
    match expr {
        // The top-level object's lists are the node's own.
        Value::Object(obj) => compile_object(obj, resolve),
        other => {
            let mut parts = BoolParts::default();
            compile_into(other, Combinator::And, &mut parts, resolve)?;
            Ok(parts)
        }
    }
}

fn compile_object<F>(obj: &Map<String, Value>, resolve: &mut F) -> Result<BoolParts>
where
    F: FnMut(&str) -> Result<Option<Value>>,
{
    let mut parts = BoolParts::default();
    for (key, child) in obj {
        let combinator = Combinator::from_key(key).ok_or_else(|| {
            GatewayError::Validation(format!(
                "react keys must be 'and', 'or' or 'not', got '{}'",
                key
            ))
        })?;
        compile_into(child, combinator, &mut parts, resolve)?;
    }
    Ok(parts)
}

fn compile_into<F>(
    expr: &Value,
    combinator: Combinator,
    parts: &mut BoolParts,
    resolve: &mut F,
) -> Result<()>
where
    F: FnMut(&str) -> Result<Option<Value>>,
{
    match expr {
        Value::String(id) => {
            if let Some(clause) = resolve(id)? {
                parts.push(combinator, clause);
            }
        }
        Value::Array(items) => {
            for item in items {
                compile_into(item, combinator, parts, resolve)?;
            }
        }
        Value::Object(obj) => {
            if let Some(q) = compile_object(obj, resolve)?.into_query() {
                parts.push(combinator, q);
            }
        }
        Value::Null => {}
        other => {
            return Err(GatewayError::Validation(format!(
                "invalid react expression: {}",
                other
            )))
        }
    }
    Ok(())
}

/// Every id referenced by an expression, in first-seen order.
pub fn leaf_ids(expr: &Value) -> Vec<String> {
    let mut out = Vec::new();
    collect_ids(expr, &mut out);
    out
}

fn collect_ids(expr: &Value, out: &mut Vec<String>) {
    match expr {
        Value::String(id) => {
            if !out.iter().any(|o| o == id) {
                out.push(id.clone());
            }
        }
        Value::Array(items) => items.iter().for_each(|i| collect_ids(i, out)),
        Value::Object(obj) => obj.values().for_each(|v| collect_ids(v, out)),
        _ => {}
    }
}
