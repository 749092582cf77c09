//! Serialized record predicates ("domains").
//!
//! A [`Predicate`] is the host's standard serialized form of a
//! record filter: a list of `[field, operator, value]` triplets with
//! optional prefix connectives. The engine never interprets it — it
//! only hands it to the host's [`PredicateEvaluator`] together with a
//! record and gets a yes/no back.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use studio_core::{ModelName, RecordId};

use crate::error::HostResult;

/// An opaque serialized record predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Predicate(Value);

impl Predicate {
    /// Wrap a serialized predicate.
    #[must_use]
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// The underlying serialized form.
    #[must_use]
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Whether the predicate is trivially empty (matches everything).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            Value::Null => true,
            Value::Array(items) => items.is_empty(),
            _ => false,
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Evaluates serialized predicates against records.
///
/// Provided by the host; the engine treats the predicate language as
/// opaque.
pub trait PredicateEvaluator: Send + Sync {
    /// Whether `record` of `model` matches `predicate`.
    ///
    /// # Errors
    ///
    /// Returns an error if the record does not exist or the predicate
    /// is malformed.
    fn matches(
        &self,
        model: &ModelName,
        record: RecordId,
        predicate: &Predicate,
    ) -> HostResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_predicate() {
        assert!(Predicate::new(Value::Null).is_empty());
        assert!(Predicate::new(json!([])).is_empty());
        assert!(!Predicate::new(json!([["state", "=", "draft"]])).is_empty());
    }
}
