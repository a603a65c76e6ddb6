use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::expr::{parse_expression, Environment, Expr};
use crate::error::{GatewayError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    #[default]
    Always,
    Filter,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trigger {
    #[serde(rename = "type", default)]
    pub trigger_type: TriggerType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(default)]
    pub execute_before: bool,
}

/// A stateless function deployed behind the OpenFaaS gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Function {
    #[serde(alias = "service")]
    pub name: String,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<Trigger>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_request_payload: Option<Value>,
    /// Deployment metadata (image, env, labels); opaque to the gateway.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<Value>,
    #[serde(skip)]
    compiled: OnceCell<std::result::Result<Expr, String>>,
}

impl Function {
    pub fn new(name: impl Into<String>, trigger: Option<Trigger>) -> Self {
        Self {
            name: name.into(),
            enabled: None,
            trigger,
            extra_request_payload: None,
            deployment: None,
            compiled: OnceCell::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    pub fn executes_before(&self) -> bool {
        self.trigger.as_ref().is_some_and(|t| t.execute_before)
    }

    /// Whether the function applies to a request with this environment.
    /// Parse and evaluation failures are errors, never a silent skip.
    pub fn applies(&self, env: &Environment) -> Result<bool> {
        if !self.is_enabled() {
            return Ok(false);
        }
        let Some(trigger) = &self.trigger else {
            return Ok(true);
        };
        if trigger.trigger_type == TriggerType::Always {
            return Ok(true);
        }
        let source = trigger.expression.as_deref().unwrap_or_default();
        let compiled = self
            .compiled
            .get_or_init(|| parse_expression(source).map_err(|e| e.to_string()));
        match compiled {
            Ok(expr) => expr.evaluate(env),
            Err(msg) => Err(GatewayError::Internal(format!(
                "function {} has an invalid trigger: {}",
                self.name, msg
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env() -> Environment {
        Environment {
            acl: "search".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_trigger_defaults_to_always() {
        let f: Function = serde_json::from_value(json!({"name": "enrich"})).unwrap();
        assert!(f.applies(&env()).unwrap());
        assert!(!f.executes_before());
    }

    #[test]
    fn test_filter_trigger() {
        let f: Function = serde_json::from_value(json!({
            "service": "enrich",
            "trigger": {"type": "filter", "expression": "acl == 'search'", "executeBefore": true}
        }))
        .unwrap();
        assert!(f.applies(&env()).unwrap());
        assert!(f.executes_before());

        let other = Environment {
            acl: "docs".into(),
            ..Default::default()
        };
        assert!(!f.applies(&other).unwrap());
    }

    #[test]
    fn test_invalid_trigger_is_internal_error() {
        let f = Function::new(
            "broken",
            Some(Trigger {
                trigger_type: TriggerType::Filter,
                expression: Some("acl ==".into()),
                execute_before: false,
            }),
        );
        let err = f.applies(&env()).unwrap_err();
        assert_eq!(err.status_code(), http::StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_disabled_function_never_applies() {
        let mut f = Function::new("off", None);
        f.enabled = Some(false);
        assert!(!f.applies(&env()).unwrap());
    }
}
