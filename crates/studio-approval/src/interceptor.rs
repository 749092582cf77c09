//! Method interception.
//!
//! For every `(model, method)` referenced by an active method rule,
//! the interceptor swaps the registered callable for a gating wrapper
//! and keeps the displaced original in its patch map.
//! [`MethodInterceptor::install`] is re-run after every rule mutation:
//! it patches newly referenced methods, restores the ones no rule
//! references any more, and never double-patches.
//!
//! The wrapper partitions the call's recordset by verdict. Fully
//! approved calls pass through unchanged; partially approved calls run
//! the original on the approved subset and return a diagnostic payload
//! describing the rest; fully blocked calls return the diagnostic
//! without invoking the original. Elevated sessions bypass gating
//! entirely. Evaluation errors fold into the diagnostic rather than
//! failing the call, with one exception: lock contention surfaces as a
//! transaction conflict so the host runtime retries the whole call.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, RwLock};
use studio_core::{MethodName, ModelName, RecordId, RuleId};
use studio_host::{EntityRegistry, HostError, HostResult, OperationCall, OperationFn};

use crate::engine::{ApprovalEngine, ApprovalVerdict};
use crate::error::{ApprovalError, ApprovalResult};
use crate::rule::RuleTarget;

/// One approval still missing on a blocked record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissingApproval {
    /// The unsatisfied rule.
    pub rule: RuleId,
    /// Its approval wave.
    pub level: u8,
    /// Human-readable rule description.
    pub description: String,
    /// Whether the rule was explicitly refused rather than undecided.
    pub refused: bool,
}

/// Why one record was withheld from the gated operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockedRecord {
    /// The withheld record.
    pub record: RecordId,
    /// A fatal evaluation error, when one occurred.
    pub reason: Option<String>,
    /// The approvals still missing.
    pub missing: Vec<MissingApproval>,
}

impl BlockedRecord {
    fn from_verdict(record: RecordId, verdict: &ApprovalVerdict) -> Self {
        let missing = verdict
            .rules
            .iter()
            .filter_map(|rule| {
                let entry = verdict.entries.iter().find(|e| e.rule == rule.id);
                match entry {
                    Some(e) if e.approved => None,
                    entry => Some(MissingApproval {
                        rule: rule.id,
                        level: rule.level.get(),
                        description: rule.describe(),
                        refused: entry.is_some(),
                    }),
                }
            })
            .collect();
        Self {
            record,
            reason: None,
            missing,
        }
    }

    fn failed(record: RecordId, error: &ApprovalError) -> Self {
        Self {
            record,
            reason: Some(error.to_string()),
            missing: Vec::new(),
        }
    }
}

/// The payload a gated operation returns when not every record passed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateDiagnostic {
    /// Records the operation actually ran on.
    pub approved: Vec<RecordId>,
    /// Records withheld, with the missing approvals per record.
    pub blocked: Vec<BlockedRecord>,
    /// The original operation's result for the approved subset, when
    /// it ran.
    pub result: Option<Value>,
}

/// Installs and removes gating wrappers on the host's registry.
pub struct MethodInterceptor {
    registry: Arc<dyn EntityRegistry>,
    engine: Arc<ApprovalEngine>,
    patches: RwLock<HashMap<(ModelName, MethodName), OperationFn>>,
}

impl MethodInterceptor {
    /// Create an interceptor over the host registry.
    #[must_use]
    pub fn new(registry: Arc<dyn EntityRegistry>, engine: Arc<ApprovalEngine>) -> Self {
        Self {
            registry,
            engine,
            patches: RwLock::new(HashMap::new()),
        }
    }

    /// Reconcile the patch set with the active rules: patch every
    /// `(model, method)` an active rule references, restore every one
    /// no rule references any more. Idempotent.
    ///
    /// # Errors
    ///
    /// Propagates registry failures; a partially applied reconcile is
    /// completed by calling again.
    pub fn install(&self) -> ApprovalResult<()> {
        let desired: HashSet<(ModelName, MethodName)> =
            self.engine.rules().method_targets().into_iter().collect();
        let mut patches = self
            .patches
            .write()
            .map_err(|e| ApprovalError::Storage(e.to_string()))?;

        let stale: Vec<(ModelName, MethodName)> = patches
            .keys()
            .filter(|key| !desired.contains(*key))
            .cloned()
            .collect();
        for key in stale {
            if let Some(original) = patches.remove(&key) {
                self.registry.replace_operation(&key.0, &key.1, original)?;
                tracing::info!(model = %key.0, method = %key.1, "gating patch removed");
            }
        }

        for (model, method) in desired {
            if patches.contains_key(&(model.clone(), method.clone())) {
                continue;
            }
            let original = self.registry.operation(&model, &method).ok_or_else(|| {
                ApprovalError::Host(HostError::UnknownOperation {
                    model: model.clone(),
                    method: method.clone(),
                })
            })?;
            let wrapper = self.wrapper(model.clone(), method.clone(), Arc::clone(&original));
            let displaced = self.registry.replace_operation(&model, &method, wrapper)?;
            tracing::info!(%model, %method, "gating patch installed");
            patches.insert((model, method), displaced);
        }
        Ok(())
    }

    /// Restore every patched callable.
    ///
    /// # Errors
    ///
    /// Propagates registry failures.
    pub fn uninstall(&self) -> ApprovalResult<()> {
        let mut patches = self
            .patches
            .write()
            .map_err(|e| ApprovalError::Storage(e.to_string()))?;
        for ((model, method), original) in patches.drain() {
            self.registry.replace_operation(&model, &method, original)?;
            tracing::info!(%model, %method, "gating patch removed");
        }
        Ok(())
    }

    /// Number of live patches.
    #[must_use]
    pub fn patch_count(&self) -> usize {
        self.patches.read().map(|p| p.len()).unwrap_or(0)
    }

    fn wrapper(&self, model: ModelName, method: MethodName, original: OperationFn) -> OperationFn {
        let engine = Arc::clone(&self.engine);
        Arc::new(move |call: &OperationCall| gate_call(&engine, &model, &method, &original, call))
    }
}

impl fmt::Debug for MethodInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodInterceptor")
            .field("patches", &self.patch_count())
            .finish_non_exhaustive()
    }
}

fn gate_call(
    engine: &ApprovalEngine,
    model: &ModelName,
    method: &MethodName,
    original: &OperationFn,
    call: &OperationCall,
) -> HostResult<Value> {
    if call.session.elevated {
        tracing::debug!(%model, %method, session = %call.session, "elevated call bypasses gating");
        return original(call);
    }
    let target = RuleTarget::Method(method.clone());
    let mut approved = Vec::new();
    let mut blocked = Vec::new();
    for &record in &call.records {
        match engine.check_approval(&call.session, model, &target, record) {
            Ok(verdict) if verdict.approved => approved.push(record),
            Ok(verdict) => blocked.push(BlockedRecord::from_verdict(record, &verdict)),
            Err(ApprovalError::LockContention { model, record }) => {
                return Err(HostError::TransactionConflict {
                    reason: format!("approval rules for {model}{record} are locked"),
                });
            },
            Err(e) => {
                tracing::warn!(%model, %record, "approval check failed: {e}");
                blocked.push(BlockedRecord::failed(record, &e));
            },
        }
    }
    if blocked.is_empty() {
        return original(call);
    }
    let result = if approved.is_empty() {
        None
    } else {
        Some(original(&call.narrowed(approved.clone()))?)
    };
    let diagnostic = GateDiagnostic {
        approved,
        blocked,
        result,
    };
    serde_json::to_value(diagnostic).map_err(|e| HostError::Storage(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;
    use studio_core::UserId;
    use studio_host::{MemoryHost, Predicate, Session};

    use crate::approver::ApproverLog;
    use crate::entry::EntryStore;
    use crate::notify::NotificationAdapter;
    use crate::request::RequestStore;
    use crate::rule::{NewRule, RuleStore};

    fn harness() -> (Arc<MemoryHost>, Arc<ApprovalEngine>, MethodInterceptor) {
        let host = Arc::new(MemoryHost::new());
        let model = ModelName::from("document");
        host.add_model(model.clone());
        host.insert_record(&model, RecordId(1), json!({"amount": 100}));
        host.insert_record(&model, RecordId(2), json!({"amount": 200}));
        host.register_operation(
            &model,
            &MethodName::from("validate"),
            Arc::new(|call| Ok(json!({"validated": call.records}))),
        );
        let entries = Arc::new(EntryStore::new());
        let rules = Arc::new(RuleStore::new(host.clone(), entries.clone()));
        let log = Arc::new(ApproverLog::new());
        let requests = Arc::new(RequestStore::new(host.clone()));
        let notifier = NotificationAdapter::new(
            host.clone(),
            host.clone(),
            host.clone(),
            log.clone(),
            requests.clone(),
        );
        let engine = Arc::new(ApprovalEngine::new(
            rules,
            log,
            entries,
            requests,
            host.clone(),
            host.clone(),
            notifier,
        ));
        let interceptor = MethodInterceptor::new(host.clone(), Arc::clone(&engine));
        (host, engine, interceptor)
    }

    fn session(user: UserId) -> Session {
        Session::user(user).with_today(NaiveDate::from_ymd_opt(2024, 6, 15).unwrap())
    }

    fn validate(host: &MemoryHost, records: Vec<RecordId>, s: Session) -> Value {
        let call = OperationCall::new(ModelName::from("document"), records, s);
        host.invoke(&MethodName::from("validate"), &call).unwrap()
    }

    fn new_rule() -> NewRule {
        NewRule::method(ModelName::from("document"), MethodName::from("validate"))
    }

    #[test]
    fn test_install_uninstall_roundtrip() {
        let (host, engine, interceptor) = harness();
        engine.rules().create(new_rule()).unwrap();
        interceptor.install().unwrap();
        assert_eq!(interceptor.patch_count(), 1);

        // Stranger is gated.
        let out = validate(&host, vec![RecordId(1)], session(UserId::new()));
        assert!(out.get("blocked").is_some());

        interceptor.uninstall().unwrap();
        assert_eq!(interceptor.patch_count(), 0);
        let out = validate(&host, vec![RecordId(1)], session(UserId::new()));
        assert_eq!(out, json!({"validated": [1]}));
    }

    #[test]
    fn test_install_is_idempotent() {
        let (host, engine, interceptor) = harness();
        engine.rules().create(new_rule()).unwrap();
        interceptor.install().unwrap();
        interceptor.install().unwrap();
        assert_eq!(interceptor.patch_count(), 1);

        // A single uninstall restores the unwrapped original.
        interceptor.uninstall().unwrap();
        let out = validate(&host, vec![RecordId(1)], session(UserId::new()));
        assert_eq!(out, json!({"validated": [1]}));
    }

    #[test]
    fn test_reinstall_removes_stale_patches() {
        let (host, engine, interceptor) = harness();
        let rule = engine.rules().create(new_rule()).unwrap();
        interceptor.install().unwrap();
        assert_eq!(interceptor.patch_count(), 1);

        engine.rules().archive(rule.id).unwrap();
        interceptor.install().unwrap();
        assert_eq!(interceptor.patch_count(), 0);
        let out = validate(&host, vec![RecordId(1)], session(UserId::new()));
        assert_eq!(out, json!({"validated": [1]}));
    }

    #[test]
    fn test_elevated_session_bypasses_gating() {
        let (host, engine, interceptor) = harness();
        engine.rules().create(new_rule()).unwrap();
        interceptor.install().unwrap();

        let s = Session::elevated(UserId::new());
        let out = validate(&host, vec![RecordId(1)], s);
        assert_eq!(out, json!({"validated": [1]}));
        assert_eq!(engine.entries().count(), 0);
    }

    #[test]
    fn test_approver_passes_through() {
        let (host, engine, interceptor) = harness();
        let approver = UserId::new();
        let rule = engine.rules().create(new_rule()).unwrap();
        engine
            .log()
            .set_approvers(
                rule.id,
                vec![approver],
                UserId::new(),
                session(approver).today,
            )
            .unwrap();
        interceptor.install().unwrap();

        let out = validate(&host, vec![RecordId(1)], session(approver));
        assert_eq!(out, json!({"validated": [1]}));
        assert!(engine.entries().get(rule.id, RecordId(1)).is_some());
    }

    #[test]
    fn test_partial_approval_narrows_the_call() {
        let (host, engine, interceptor) = harness();
        let scoped = new_rule().with_domain(Predicate::new(json!([["amount", ">", 150]])));
        engine.rules().create(scoped).unwrap();
        interceptor.install().unwrap();

        // Record 1 is outside the domain and passes; record 2 is gated.
        let out = validate(
            &host,
            vec![RecordId(1), RecordId(2)],
            session(UserId::new()),
        );
        let diagnostic: GateDiagnostic = serde_json::from_value(out).unwrap();
        assert_eq!(diagnostic.approved, vec![RecordId(1)]);
        assert_eq!(diagnostic.blocked.len(), 1);
        assert_eq!(diagnostic.blocked[0].record, RecordId(2));
        assert_eq!(diagnostic.blocked[0].missing.len(), 1);
        assert_eq!(diagnostic.result, Some(json!({"validated": [1]})));
    }

    #[test]
    fn test_fully_blocked_call_never_runs_the_original() {
        let (host, engine, interceptor) = harness();
        engine.rules().create(new_rule()).unwrap();
        interceptor.install().unwrap();

        let out = validate(&host, vec![RecordId(1)], session(UserId::new()));
        let diagnostic: GateDiagnostic = serde_json::from_value(out).unwrap();
        assert!(diagnostic.approved.is_empty());
        assert!(diagnostic.result.is_none());
        assert!(!diagnostic.blocked[0].missing[0].refused);
    }

    #[test]
    fn test_refusal_is_reported_in_the_diagnostic() {
        let (host, engine, interceptor) = harness();
        let approver = UserId::new();
        let rule = engine.rules().create(new_rule()).unwrap();
        engine
            .log()
            .set_approvers(
                rule.id,
                vec![approver],
                UserId::new(),
                session(approver).today,
            )
            .unwrap();
        engine
            .set_approval(&session(approver), rule.id, RecordId(1), false)
            .unwrap();
        interceptor.install().unwrap();

        let out = validate(&host, vec![RecordId(1)], session(UserId::new()));
        let diagnostic: GateDiagnostic = serde_json::from_value(out).unwrap();
        assert!(diagnostic.blocked[0].missing[0].refused);
    }
}
