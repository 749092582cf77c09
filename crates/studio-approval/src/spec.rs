//! Batched read API for UI layers.
//!
//! A spec is a transient snapshot of the rules and entries governing a
//! set of `(model, target, record?)` slots. With a record, domains are
//! evaluated and only matching rules appear, exactly the set
//! `check_approval` would decide on. Without one, every active rule on
//! the target is returned unfiltered, which backs rule-editor views.
//!
//! Reads require the caller's read capability. Entries are returned
//! regardless of who decided them; the capability check has already
//! passed at that point.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use studio_core::{GroupId, Level, ModelName, RecordId, RuleId, UserId};
use studio_host::{Predicate, Session};

use crate::engine::ApprovalEngine;
use crate::entry::Entry;
use crate::error::{ApprovalError, ApprovalResult};
use crate::rule::{Rule, RuleTarget};

/// One slot to snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecRequest {
    /// The entity type.
    pub model: ModelName,
    /// The gated operation.
    pub target: RuleTarget,
    /// The record to evaluate domains against; absent for editor
    /// views.
    pub record: Option<RecordId>,
}

/// A rule as presented to UI layers, with the currently effective
/// approver set resolved in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSnapshot {
    /// Rule identifier.
    pub id: RuleId,
    /// The governed entity type.
    pub model: ModelName,
    /// The gated operation.
    pub target: RuleTarget,
    /// Record predicate, if any.
    pub domain: Option<Predicate>,
    /// Approval wave.
    pub level: Level,
    /// Exclusive-approver flag.
    pub exclusive_user: bool,
    /// Approval group, if any.
    pub approval_group: Option<GroupId>,
    /// Users whose approval grant is currently valid.
    pub approvers: Vec<UserId>,
    /// Post-decision notification recipients.
    pub users_to_notify: Vec<UserId>,
    /// Whether the rule is in force.
    pub active: bool,
}

/// The rules and entries for one requested slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecSlot {
    /// The record the slot was evaluated against, if any.
    pub record: Option<RecordId>,
    /// The gated operation.
    pub target: RuleTarget,
    /// The rules in the slot, in decision order.
    pub rule_ids: Vec<RuleId>,
    /// Existing decisions for the record (empty for record-less
    /// slots).
    pub entries: Vec<Entry>,
}

/// A batched snapshot answering one `get_approval_spec` call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApprovalSpec {
    /// Every rule touched by any slot.
    pub all_rules: HashMap<RuleId, RuleSnapshot>,
    /// Slots grouped by entity type, in request order.
    pub by_model: HashMap<ModelName, Vec<SpecSlot>>,
}

impl ApprovalEngine {
    /// Snapshot the rules and entries for a batch of slots.
    ///
    /// # Errors
    ///
    /// Returns a permission error when the caller lacks read
    /// capability on a requested entity type or record, and propagates
    /// predicate evaluation failures.
    pub fn get_approval_spec(
        &self,
        session: &Session,
        requests: &[SpecRequest],
    ) -> ApprovalResult<ApprovalSpec> {
        let mut spec = ApprovalSpec::default();
        for request in requests {
            self.access()
                .check_read(&request.model, request.record, &session.user)
                .map_err(ApprovalError::from_capability)?;

            let rules = match request.record {
                Some(record) => self.applicable_rules(&request.model, &request.target, record)?,
                None => self.rules().rules_for(&request.model, &request.target),
            };
            let rule_ids: Vec<RuleId> = rules.iter().map(|r| r.id).collect();
            let entries = match request.record {
                Some(record) => self.entries().entries_for(&rule_ids, &[record]),
                None => Vec::new(),
            };
            for rule in rules {
                let snapshot = self.snapshot(&rule, session);
                spec.all_rules.insert(rule.id, snapshot);
            }
            spec.by_model
                .entry(request.model.clone())
                .or_default()
                .push(SpecSlot {
                    record: request.record,
                    target: request.target.clone(),
                    rule_ids,
                    entries,
                });
        }
        Ok(spec)
    }

    fn snapshot(&self, rule: &Rule, session: &Session) -> RuleSnapshot {
        let mut approvers: Vec<UserId> = self
            .log()
            .effective_approvers(rule.id, session.today)
            .into_iter()
            .collect();
        approvers.sort_by_key(ToString::to_string);
        RuleSnapshot {
            id: rule.id,
            model: rule.model.clone(),
            target: rule.target.clone(),
            domain: rule.domain.clone(),
            level: rule.level,
            exclusive_user: rule.exclusive_user,
            approval_group: rule.approval_group.clone(),
            approvers,
            users_to_notify: rule.users_to_notify.clone(),
            active: rule.active,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use studio_core::MethodName;
    use studio_host::MemoryHost;

    use crate::approver::ApproverLog;
    use crate::entry::EntryStore;
    use crate::notify::NotificationAdapter;
    use crate::request::RequestStore;
    use crate::rule::{NewRule, RuleStore};

    fn engine() -> (Arc<MemoryHost>, ApprovalEngine) {
        let host = Arc::new(MemoryHost::new());
        let model = ModelName::from("document");
        host.add_model(model.clone());
        host.insert_record(&model, RecordId(1), json!({"amount": 100}));
        host.insert_record(&model, RecordId(2), json!({"amount": 200}));
        host.register_operation(
            &model,
            &MethodName::from("validate"),
            Arc::new(|_| Ok(Value::Bool(true))),
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
        let engine = ApprovalEngine::new(
            rules,
            log,
            entries,
            requests,
            host.clone(),
            host.clone(),
            notifier,
        );
        (host, engine)
    }

    fn session(user: UserId) -> Session {
        Session::user(user).with_today(NaiveDate::from_ymd_opt(2024, 6, 15).unwrap())
    }

    fn slot(record: Option<RecordId>) -> SpecRequest {
        SpecRequest {
            model: ModelName::from("document"),
            target: RuleTarget::Method(MethodName::from("validate")),
            record,
        }
    }

    #[test]
    fn test_record_slot_matches_check_approval_rule_set() {
        let (_host, engine) = engine();
        let scoped = NewRule::method(ModelName::from("document"), MethodName::from("validate"))
            .with_domain(Predicate::new(json!([["amount", ">", 150]])));
        let rule = engine.rules().create(scoped).unwrap();
        let user = UserId::new();

        let spec = engine
            .get_approval_spec(&session(user), &[slot(Some(RecordId(1)))])
            .unwrap();
        let slots = &spec.by_model[&ModelName::from("document")];
        assert!(slots[0].rule_ids.is_empty());

        let spec = engine
            .get_approval_spec(&session(user), &[slot(Some(RecordId(2)))])
            .unwrap();
        let slots = &spec.by_model[&ModelName::from("document")];
        assert_eq!(slots[0].rule_ids, vec![rule.id]);
        assert!(spec.all_rules.contains_key(&rule.id));
    }

    #[test]
    fn test_recordless_slot_is_unfiltered() {
        let (_host, engine) = engine();
        let scoped = NewRule::method(ModelName::from("document"), MethodName::from("validate"))
            .with_domain(Predicate::new(json!([["amount", ">", 150]])));
        engine.rules().create(scoped).unwrap();

        let spec = engine
            .get_approval_spec(&session(UserId::new()), &[slot(None)])
            .unwrap();
        let slots = &spec.by_model[&ModelName::from("document")];
        assert_eq!(slots[0].rule_ids.len(), 1);
        assert!(slots[0].entries.is_empty());
    }

    #[test]
    fn test_entries_of_other_users_are_visible() {
        let (_host, engine) = engine();
        let rule = engine
            .rules()
            .create(NewRule::method(
                ModelName::from("document"),
                MethodName::from("validate"),
            ))
            .unwrap();
        let approver = UserId::new();
        engine
            .log()
            .set_approvers(rule.id, vec![approver], UserId::new(), session(approver).today)
            .unwrap();
        engine
            .set_approval(&session(approver), rule.id, RecordId(1), true)
            .unwrap();

        // A different reader sees the approver's decision.
        let spec = engine
            .get_approval_spec(&session(UserId::new()), &[slot(Some(RecordId(1)))])
            .unwrap();
        let slots = &spec.by_model[&ModelName::from("document")];
        assert_eq!(slots[0].entries.len(), 1);
        assert_eq!(slots[0].entries[0].user, approver);
    }

    #[test]
    fn test_read_capability_is_required() {
        let (host, engine) = engine();
        let user = UserId::new();
        host.deny_read(&ModelName::from("document"), user);
        let result = engine.get_approval_spec(&session(user), &[slot(None)]);
        assert!(matches!(result, Err(ApprovalError::Permission { .. })));
    }

    #[test]
    fn test_snapshot_resolves_effective_approvers() {
        let (_host, engine) = engine();
        let rule = engine
            .rules()
            .create(NewRule::method(
                ModelName::from("document"),
                MethodName::from("validate"),
            ))
            .unwrap();
        let approver = UserId::new();
        let s = session(UserId::new());
        engine
            .log()
            .set_approvers(rule.id, vec![approver], UserId::new(), s.today)
            .unwrap();

        let spec = engine.get_approval_spec(&s, &[slot(None)]).unwrap();
        assert_eq!(spec.all_rules[&rule.id].approvers, vec![approver]);
    }
}
