//! Per-entity-type lifecycle triggers.
//!
//! The host fires a registered callback whenever a record of the
//! entity type performs a transition matching one of the declared
//! [`RegressionRule`]s — a write that puts the record back into an
//! initial state.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use studio_core::{ModelName, RecordId};

use crate::error::HostResult;

/// One qualifying "regression to initial state" transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegressionRule {
    /// The field whose writes are observed (typically a state field).
    pub field: String,
    /// Optional originating value; when unset, any origin qualifies.
    #[serde(default)]
    pub from: Option<String>,
    /// The value the record regresses to.
    pub to: String,
}

impl RegressionRule {
    /// Create a rule matching any transition of `field` to `to`.
    #[must_use]
    pub fn to_state(field: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            from: None,
            to: to.into(),
        }
    }

    /// Restrict the rule to transitions originating from `from`.
    #[must_use]
    pub fn from_state(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    /// Whether a write of `new` over `old` on `field` qualifies.
    #[must_use]
    pub fn matches(&self, field: &str, old: Option<&Value>, new: &Value) -> bool {
        if field != self.field {
            return false;
        }
        if new.as_str() != Some(self.to.as_str()) {
            return false;
        }
        match &self.from {
            Some(from) => old.and_then(Value::as_str) == Some(from.as_str()),
            None => true,
        }
    }
}

/// Callback run on the records that performed a qualifying transition.
pub type RegressionCallback = Arc<dyn Fn(&ModelName, &[RecordId]) + Send + Sync>;

/// Host-provided automation registry.
pub trait Automation: Send + Sync {
    /// Register `callback` to fire whenever a record of `model`
    /// performs a transition matching one of `rules`. Re-registering a
    /// model replaces its previous rules and callback.
    ///
    /// # Errors
    ///
    /// Returns `UnknownModel` for unregistered entity types.
    fn register_regression(
        &self,
        model: ModelName,
        rules: Vec<RegressionRule>,
        callback: RegressionCallback,
    ) -> HostResult<()>;

    /// Remove the regression trigger for `model`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the host automation store fails.
    fn unregister_regression(&self, model: &ModelName) -> HostResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_regression_rule_matches() {
        let rule = RegressionRule::to_state("state", "draft");
        assert!(rule.matches("state", Some(&json!("posted")), &json!("draft")));
        assert!(rule.matches("state", None, &json!("draft")));
        assert!(!rule.matches("state", Some(&json!("posted")), &json!("done")));
        assert!(!rule.matches("stage", Some(&json!("posted")), &json!("draft")));
    }

    #[test]
    fn test_regression_rule_from_state() {
        let rule = RegressionRule::to_state("state", "draft").from_state("posted");
        assert!(rule.matches("state", Some(&json!("posted")), &json!("draft")));
        assert!(!rule.matches("state", Some(&json!("cancel")), &json!("draft")));
        assert!(!rule.matches("state", None, &json!("draft")));
    }

    #[test]
    fn test_regression_rule_toml() {
        let rule: RegressionRule =
            serde_json::from_value(json!({"field": "state", "to": "draft"})).unwrap();
        assert_eq!(rule.from, None);
        assert_eq!(rule.to, "draft");
    }
}
