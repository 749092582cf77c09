//! In-memory reference host.
//!
//! [`MemoryHost`] implements every collaborator trait over plain
//! in-process tables. It backs the engine's unit and scenario tests and
//! doubles as executable documentation of the host contract: records
//! are field maps, operations are registered closures, and state
//! regressions fire the callbacks registered through [`Automation`].

use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::RwLock;
use studio_core::{GroupId, MethodName, ModelName, RecordId, RecordRef, UserId};

use crate::access::AccessChecker;
use crate::activity::{ActivityHandle, ActivityRequest, ActivityScheduler};
use crate::automation::{Automation, RegressionCallback, RegressionRule};
use crate::error::{HostError, HostResult};
use crate::messenger::{MessagePost, Messenger};
use crate::predicate::{Predicate, PredicateEvaluator};
use crate::registry::{EntityRegistry, OperationCall, OperationFn};

type Fields = Map<String, Value>;

/// A complete in-memory host.
///
/// # Example
///
/// ```
/// use studio_host::MemoryHost;
/// use studio_core::{ModelName, RecordId};
/// use serde_json::json;
///
/// let host = MemoryHost::new();
/// let model = ModelName::from("document");
/// host.add_model(model.clone());
/// host.insert_record(&model, RecordId(1), json!({"state": "draft"}));
/// assert!(host.field(&model, RecordId(1), "state").is_some());
/// ```
pub struct MemoryHost {
    records: RwLock<HashMap<ModelName, BTreeMap<RecordId, Fields>>>,
    operations: RwLock<HashMap<(ModelName, MethodName), OperationFn>>,
    groups: RwLock<HashMap<GroupId, HashSet<UserId>>>,
    read_denied: RwLock<HashSet<(ModelName, UserId)>>,
    write_denied: RwLock<HashSet<(ModelName, UserId)>>,
    activities: RwLock<HashMap<ActivityHandle, ActivityRequest>>,
    messages: RwLock<Vec<(RecordRef, MessagePost)>>,
    chatter_models: RwLock<HashSet<ModelName>>,
    #[allow(clippy::type_complexity)]
    regressions: RwLock<HashMap<ModelName, (Vec<RegressionRule>, RegressionCallback)>>,
}

impl MemoryHost {
    /// Create an empty host.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            operations: RwLock::new(HashMap::new()),
            groups: RwLock::new(HashMap::new()),
            read_denied: RwLock::new(HashSet::new()),
            write_denied: RwLock::new(HashSet::new()),
            activities: RwLock::new(HashMap::new()),
            messages: RwLock::new(Vec::new()),
            chatter_models: RwLock::new(HashSet::new()),
            regressions: RwLock::new(HashMap::new()),
        }
    }

    /// Register an entity type.
    pub fn add_model(&self, model: ModelName) {
        if let Ok(mut records) = self.records.write() {
            records.entry(model).or_default();
        }
    }

    /// Insert (or replace) a record. `fields` must be a JSON object.
    pub fn insert_record(&self, model: &ModelName, id: RecordId, fields: Value) {
        let fields = match fields {
            Value::Object(map) => map,
            _ => Fields::new(),
        };
        if let Ok(mut records) = self.records.write() {
            records.entry(model.clone()).or_default().insert(id, fields);
        }
    }

    /// Read one field of a record.
    #[must_use]
    pub fn field(&self, model: &ModelName, id: RecordId, name: &str) -> Option<Value> {
        let records = self.records.read().ok()?;
        records.get(model)?.get(&id)?.get(name).cloned()
    }

    /// Write one field of a record, firing any registered regression
    /// trigger that the transition matches.
    ///
    /// # Errors
    ///
    /// Returns `UnknownModel` / `RecordNotFound` for missing targets.
    pub fn write_field(
        &self,
        model: &ModelName,
        id: RecordId,
        name: &str,
        value: Value,
    ) -> HostResult<()> {
        let old = {
            let mut records = self
                .records
                .write()
                .map_err(|e| HostError::Storage(e.to_string()))?;
            let table = records.get_mut(model).ok_or_else(|| HostError::UnknownModel {
                model: model.clone(),
            })?;
            let fields = table.get_mut(&id).ok_or_else(|| HostError::RecordNotFound {
                model: model.clone(),
                record: id,
            })?;
            let old = fields.get(name).cloned();
            fields.insert(name.to_string(), value.clone());
            old
        };

        // Fire regression triggers outside the records lock so the
        // callback can freely touch the host again.
        let callback = {
            let regressions = self
                .regressions
                .read()
                .map_err(|e| HostError::Storage(e.to_string()))?;
            regressions.get(model).and_then(|(rules, callback)| {
                rules
                    .iter()
                    .any(|r| r.matches(name, old.as_ref(), &value))
                    .then(|| callback.clone())
            })
        };
        if let Some(callback) = callback {
            tracing::debug!(%model, record = %id, field = name, "regression trigger fired");
            callback(model, &[id]);
        }
        Ok(())
    }

    /// Register the original implementation of an operation.
    pub fn register_operation(&self, model: &ModelName, method: &MethodName, op: OperationFn) {
        if let Ok(mut operations) = self.operations.write() {
            operations.insert((model.clone(), method.clone()), op);
        }
    }

    /// Invoke whatever callable is currently registered under
    /// `(call.model, method)` — the gated wrapper once the interceptor
    /// has patched it.
    ///
    /// # Errors
    ///
    /// Returns `UnknownOperation` when nothing is registered.
    pub fn invoke(&self, method: &MethodName, call: &OperationCall) -> HostResult<Value> {
        let op = self
            .operation(&call.model, method)
            .ok_or_else(|| HostError::UnknownOperation {
                model: call.model.clone(),
                method: method.clone(),
            })?;
        op(call)
    }

    /// Define a group's membership, replacing any previous one.
    pub fn set_group(&self, group: GroupId, members: impl IntoIterator<Item = UserId>) {
        if let Ok(mut groups) = self.groups.write() {
            groups.insert(group, members.into_iter().collect());
        }
    }

    /// Deny `user` read capability on `model`.
    pub fn deny_read(&self, model: &ModelName, user: UserId) {
        if let Ok(mut denied) = self.read_denied.write() {
            denied.insert((model.clone(), user));
        }
    }

    /// Deny `user` write capability on `model`.
    pub fn deny_write(&self, model: &ModelName, user: UserId) {
        if let Ok(mut denied) = self.write_denied.write() {
            denied.insert((model.clone(), user));
        }
    }

    /// Mark an entity type as supporting message posting.
    pub fn enable_messaging(&self, model: &ModelName) {
        if let Ok(mut chatter) = self.chatter_models.write() {
            chatter.insert(model.clone());
        }
    }

    /// Currently scheduled (not cancelled) activities.
    #[must_use]
    pub fn live_activities(&self) -> Vec<ActivityRequest> {
        self.activities
            .read()
            .map(|a| a.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Messages posted so far, in order.
    #[must_use]
    pub fn posted_messages(&self) -> Vec<(RecordRef, MessagePost)> {
        self.messages.read().map(|m| m.clone()).unwrap_or_default()
    }

    fn record_exists(&self, model: &ModelName, id: RecordId) -> HostResult<()> {
        let records = self
            .records
            .read()
            .map_err(|e| HostError::Storage(e.to_string()))?;
        let table = records.get(model).ok_or_else(|| HostError::UnknownModel {
            model: model.clone(),
        })?;
        if table.contains_key(&id) {
            Ok(())
        } else {
            Err(HostError::RecordNotFound {
                model: model.clone(),
                record: id,
            })
        }
    }

    fn record_fields(&self, model: &ModelName, id: RecordId) -> HostResult<Fields> {
        let records = self
            .records
            .read()
            .map_err(|e| HostError::Storage(e.to_string()))?;
        records
            .get(model)
            .ok_or_else(|| HostError::UnknownModel {
                model: model.clone(),
            })?
            .get(&id)
            .cloned()
            .ok_or_else(|| HostError::RecordNotFound {
                model: model.clone(),
                record: id,
            })
    }
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let models = self.records.read().map(|r| r.len()).unwrap_or(0);
        f.debug_struct("MemoryHost")
            .field("models", &models)
            .finish_non_exhaustive()
    }
}

impl EntityRegistry for MemoryHost {
    fn model_exists(&self, model: &ModelName) -> bool {
        self.records
            .read()
            .map(|r| r.contains_key(model))
            .unwrap_or(false)
    }

    fn has_public_method(&self, model: &ModelName, method: &MethodName) -> bool {
        if method.is_private() {
            return false;
        }
        self.operations
            .read()
            .map(|ops| ops.contains_key(&(model.clone(), method.clone())))
            .unwrap_or(false)
    }

    fn operation(&self, model: &ModelName, method: &MethodName) -> Option<OperationFn> {
        let ops = self.operations.read().ok()?;
        ops.get(&(model.clone(), method.clone())).cloned()
    }

    fn replace_operation(
        &self,
        model: &ModelName,
        method: &MethodName,
        operation: OperationFn,
    ) -> HostResult<OperationFn> {
        let mut ops = self
            .operations
            .write()
            .map_err(|e| HostError::Storage(e.to_string()))?;
        let key = (model.clone(), method.clone());
        if !ops.contains_key(&key) {
            return Err(HostError::UnknownOperation {
                model: model.clone(),
                method: method.clone(),
            });
        }
        let previous = ops.insert(key, operation);
        previous.ok_or_else(|| HostError::Storage("operation vanished during replace".to_string()))
    }
}

impl PredicateEvaluator for MemoryHost {
    fn matches(
        &self,
        model: &ModelName,
        record: RecordId,
        predicate: &Predicate,
    ) -> HostResult<bool> {
        if predicate.is_empty() {
            return Ok(true);
        }
        let fields = self.record_fields(model, record)?;
        let Value::Array(items) = predicate.as_value() else {
            return Err(HostError::Predicate {
                reason: "predicate is not a list".to_string(),
            });
        };
        eval_domain(&fields, items)
    }
}

impl AccessChecker for MemoryHost {
    fn check_read(
        &self,
        model: &ModelName,
        record: Option<RecordId>,
        user: &UserId,
    ) -> HostResult<()> {
        if !self.model_exists(model) {
            return Err(HostError::UnknownModel {
                model: model.clone(),
            });
        }
        if let Some(id) = record {
            self.record_exists(model, id)?;
        }
        let denied = self
            .read_denied
            .read()
            .map(|d| d.contains(&(model.clone(), *user)))
            .unwrap_or(false);
        if denied {
            return Err(HostError::AccessDenied {
                reason: format!("{user} may not read {model}"),
            });
        }
        Ok(())
    }

    fn check_write(&self, model: &ModelName, record: RecordId, user: &UserId) -> HostResult<()> {
        self.record_exists(model, record)?;
        let denied = self
            .write_denied
            .read()
            .map(|d| d.contains(&(model.clone(), *user)))
            .unwrap_or(false);
        if denied {
            return Err(HostError::AccessDenied {
                reason: format!("{user} may not write {model}{record}"),
            });
        }
        Ok(())
    }

    fn group_members(&self, group: &GroupId) -> HashSet<UserId> {
        self.groups
            .read()
            .map(|g| g.get(group).cloned().unwrap_or_default())
            .unwrap_or_default()
    }
}

impl ActivityScheduler for MemoryHost {
    fn schedule(&self, request: ActivityRequest) -> HostResult<ActivityHandle> {
        let handle = ActivityHandle::new();
        let mut activities = self
            .activities
            .write()
            .map_err(|e| HostError::Storage(e.to_string()))?;
        activities.insert(handle, request);
        Ok(handle)
    }

    fn cancel(&self, handle: &ActivityHandle) -> HostResult<()> {
        let mut activities = self
            .activities
            .write()
            .map_err(|e| HostError::Storage(e.to_string()))?;
        activities.remove(handle);
        Ok(())
    }
}

impl Messenger for MemoryHost {
    fn post(&self, record: &RecordRef, message: MessagePost) -> HostResult<()> {
        let supported = self
            .chatter_models
            .read()
            .map(|c| c.contains(&record.model))
            .unwrap_or(false);
        if !supported {
            tracing::debug!(model = %record.model, "model has no chatter, dropping message");
            return Ok(());
        }
        let mut messages = self
            .messages
            .write()
            .map_err(|e| HostError::Storage(e.to_string()))?;
        messages.push((record.clone(), message));
        Ok(())
    }
}

impl Automation for MemoryHost {
    fn register_regression(
        &self,
        model: ModelName,
        rules: Vec<RegressionRule>,
        callback: RegressionCallback,
    ) -> HostResult<()> {
        if !self.model_exists(&model) {
            return Err(HostError::UnknownModel { model });
        }
        let mut regressions = self
            .regressions
            .write()
            .map_err(|e| HostError::Storage(e.to_string()))?;
        regressions.insert(model, (rules, callback));
        Ok(())
    }

    fn unregister_regression(&self, model: &ModelName) -> HostResult<()> {
        let mut regressions = self
            .regressions
            .write()
            .map_err(|e| HostError::Storage(e.to_string()))?;
        regressions.remove(model);
        Ok(())
    }
}

/// Evaluate a domain: prefix connectives (`"&"`, `"|"`, `"!"`) over
/// `[field, operator, value]` triplets, with implicit AND between
/// top-level terms.
fn eval_domain(fields: &Fields, items: &[Value]) -> HostResult<bool> {
    let mut iter = items.iter();
    let mut result = true;
    while iter.clone().next().is_some() {
        let term = eval_node(&mut iter, fields)?;
        result = result && term;
    }
    Ok(result)
}

fn eval_node(iter: &mut std::slice::Iter<'_, Value>, fields: &Fields) -> HostResult<bool> {
    let token = iter.next().ok_or_else(|| HostError::Predicate {
        reason: "unexpected end of predicate".to_string(),
    })?;
    match token {
        Value::String(op) if op == "&" => {
            let a = eval_node(iter, fields)?;
            let b = eval_node(iter, fields)?;
            Ok(a && b)
        },
        Value::String(op) if op == "|" => {
            let a = eval_node(iter, fields)?;
            let b = eval_node(iter, fields)?;
            Ok(a || b)
        },
        Value::String(op) if op == "!" => Ok(!eval_node(iter, fields)?),
        Value::Array(triplet) => eval_leaf(triplet, fields),
        other => Err(HostError::Predicate {
            reason: format!("unexpected predicate token: {other}"),
        }),
    }
}

fn eval_leaf(triplet: &[Value], fields: &Fields) -> HostResult<bool> {
    let [field, op, expected] = triplet else {
        return Err(HostError::Predicate {
            reason: format!("malformed predicate leaf: {triplet:?}"),
        });
    };
    let Some(field) = field.as_str() else {
        return Err(HostError::Predicate {
            reason: "predicate field is not a string".to_string(),
        });
    };
    let Some(op) = op.as_str() else {
        return Err(HostError::Predicate {
            reason: "predicate operator is not a string".to_string(),
        });
    };
    let actual = fields.get(field).unwrap_or(&Value::Null);
    match op {
        "=" | "==" => Ok(values_equal(actual, expected)),
        "!=" | "<>" => Ok(!values_equal(actual, expected)),
        ">" => Ok(compare(actual, expected) == Some(std::cmp::Ordering::Greater)),
        ">=" => Ok(matches!(
            compare(actual, expected),
            Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)
        )),
        "<" => Ok(compare(actual, expected) == Some(std::cmp::Ordering::Less)),
        "<=" => Ok(matches!(
            compare(actual, expected),
            Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
        )),
        "in" => Ok(expected
            .as_array()
            .is_some_and(|list| list.iter().any(|v| values_equal(actual, v)))),
        "not in" => Ok(!expected
            .as_array()
            .is_some_and(|list| list.iter().any(|v| values_equal(actual, v)))),
        other => Err(HostError::Predicate {
            reason: format!("unsupported predicate operator: {other}"),
        }),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x.partial_cmp(&y);
    }
    if let (Some(x), Some(y)) = (a.as_str(), b.as_str()) {
        return Some(x.cmp(y));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn doc_host() -> (MemoryHost, ModelName) {
        let host = MemoryHost::new();
        let model = ModelName::from("document");
        host.add_model(model.clone());
        host.insert_record(
            &model,
            RecordId(1),
            json!({"state": "draft", "category": "A", "amount": 150}),
        );
        host.insert_record(
            &model,
            RecordId(2),
            json!({"state": "posted", "category": "B", "amount": 40}),
        );
        (host, model)
    }

    #[test]
    fn test_empty_domain_matches() {
        let (host, model) = doc_host();
        let p = Predicate::new(json!([]));
        assert!(host.matches(&model, RecordId(1), &p).unwrap());
    }

    #[test]
    fn test_triplet_equality() {
        let (host, model) = doc_host();
        let p = Predicate::new(json!([["category", "=", "A"]]));
        assert!(host.matches(&model, RecordId(1), &p).unwrap());
        assert!(!host.matches(&model, RecordId(2), &p).unwrap());
    }

    #[test]
    fn test_implicit_and() {
        let (host, model) = doc_host();
        let p = Predicate::new(json!([["category", "=", "A"], ["amount", ">", 100]]));
        assert!(host.matches(&model, RecordId(1), &p).unwrap());
        assert!(!host.matches(&model, RecordId(2), &p).unwrap());
    }

    #[test]
    fn test_prefix_or_and_not() {
        let (host, model) = doc_host();
        let p = Predicate::new(json!(["|", ["category", "=", "B"], ["amount", ">=", 150]]));
        assert!(host.matches(&model, RecordId(1), &p).unwrap());
        assert!(host.matches(&model, RecordId(2), &p).unwrap());

        let p = Predicate::new(json!(["!", ["category", "=", "B"]]));
        assert!(host.matches(&model, RecordId(1), &p).unwrap());
        assert!(!host.matches(&model, RecordId(2), &p).unwrap());
    }

    #[test]
    fn test_in_operator() {
        let (host, model) = doc_host();
        let p = Predicate::new(json!([["state", "in", ["draft", "cancel"]]]));
        assert!(host.matches(&model, RecordId(1), &p).unwrap());
        assert!(!host.matches(&model, RecordId(2), &p).unwrap());
    }

    #[test]
    fn test_missing_record_errors() {
        let (host, model) = doc_host();
        let p = Predicate::new(json!([["category", "=", "A"]]));
        assert!(host.matches(&model, RecordId(99), &p).is_err());
    }

    #[test]
    fn test_malformed_predicate_errors() {
        let (host, model) = doc_host();
        let p = Predicate::new(json!(["&", ["category", "=", "A"]]));
        assert!(host.matches(&model, RecordId(1), &p).is_err());
    }

    #[test]
    fn test_access_denial() {
        let (host, model) = doc_host();
        let user = UserId::new();
        assert!(host.check_write(&model, RecordId(1), &user).is_ok());
        host.deny_write(&model, user);
        assert!(host.check_write(&model, RecordId(1), &user).is_err());
        assert!(host.check_read(&model, Some(RecordId(1)), &user).is_ok());
        host.deny_read(&model, user);
        assert!(host.check_read(&model, Some(RecordId(1)), &user).is_err());
    }

    #[test]
    fn test_group_members() {
        let host = MemoryHost::new();
        let (u1, u2) = (UserId::new(), UserId::new());
        host.set_group(GroupId::from("managers"), [u1, u2]);
        let members = host.group_members(&GroupId::from("managers"));
        assert_eq!(members.len(), 2);
        assert!(host.group_members(&GroupId::from("nobody")).is_empty());
    }

    #[test]
    fn test_activity_schedule_cancel() {
        let (host, model) = doc_host();
        let request = ActivityRequest::grant_approval(
            UserId::new(),
            RecordRef::new(model, RecordId(1)),
            "please approve",
        );
        let handle = host.schedule(request).unwrap();
        assert_eq!(host.live_activities().len(), 1);
        host.cancel(&handle).unwrap();
        assert!(host.live_activities().is_empty());
        // Cancelling twice is a no-op.
        host.cancel(&handle).unwrap();
    }

    #[test]
    fn test_messaging_noop_without_chatter() {
        let (host, model) = doc_host();
        let record = RecordRef::new(model.clone(), RecordId(1));
        let post = MessagePost {
            author: UserId::new(),
            recipients: vec![],
            body: "note".to_string(),
        };
        host.post(&record, post.clone()).unwrap();
        assert!(host.posted_messages().is_empty());

        host.enable_messaging(&model);
        host.post(&record, post).unwrap();
        assert_eq!(host.posted_messages().len(), 1);
    }

    #[test]
    fn test_replace_operation_returns_original() {
        let (host, model) = doc_host();
        let method = MethodName::from("validate");
        host.register_operation(&model, &method, Arc::new(|_call| Ok(json!("original"))));

        let wrapper: OperationFn = Arc::new(|_call| Ok(json!("wrapped")));
        let original = host.replace_operation(&model, &method, wrapper).unwrap();
        assert_eq!(original(&any_call(&model)).unwrap(), json!("original"));

        let call = any_call(&model);
        assert_eq!(host.invoke(&method, &call).unwrap(), json!("wrapped"));
    }

    #[test]
    fn test_replace_unknown_operation_errors() {
        let (host, model) = doc_host();
        let result =
            host.replace_operation(&model, &MethodName::from("missing"), Arc::new(|_| Ok(Value::Null)));
        assert!(matches!(result, Err(HostError::UnknownOperation { .. })));
    }

    #[test]
    fn test_regression_trigger_fires() {
        let (host, model) = doc_host();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        host.register_regression(
            model.clone(),
            vec![RegressionRule::to_state("state", "draft")],
            Arc::new(move |_, records| {
                counter.fetch_add(records.len(), Ordering::SeqCst);
            }),
        )
        .unwrap();

        // posted -> draft fires; draft -> posted does not.
        host.write_field(&model, RecordId(2), "state", json!("draft"))
            .unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        host.write_field(&model, RecordId(2), "state", json!("posted"))
            .unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        host.unregister_regression(&model).unwrap();
        host.write_field(&model, RecordId(2), "state", json!("draft"))
            .unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    fn any_call(model: &ModelName) -> OperationCall {
        OperationCall::new(
            model.clone(),
            vec![RecordId(1)],
            crate::session::Session::user(UserId::new()),
        )
    }
}
