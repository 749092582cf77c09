//! The decision engine.
//!
//! `check_approval` is the central operation: given one record and one
//! gated operation it loads the governing rules, filters them by
//! domain, auto-approves what the caller is entitled to approve, and
//! solicits everyone else through the notification adapter. The
//! verdict is approved only when every applicable rule carries an
//! approving entry.
//!
//! Levels sequence rules into waves. The engine never *prevents* a
//! higher-level approver from deciding early; it only withholds
//! solicitation until every lower level is fully approved.

#[cfg(test)]
#[path = "engine_tests.rs"]
mod engine_tests;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use studio_core::{Level, ModelName, RecordId, RuleId, UserId};
use studio_host::{AccessChecker, PredicateEvaluator, Session};

use crate::approver::ApproverLog;
use crate::entry::{Entry, EntryStore};
use crate::error::{ApprovalError, ApprovalResult};
use crate::notify::NotificationAdapter;
use crate::request::RequestStore;
use crate::rule::{Rule, RuleStore, RuleTarget};

/// The outcome of `check_approval` for one record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalVerdict {
    /// Whether every applicable rule carries an approving entry.
    pub approved: bool,
    /// The applicable rules, in decision order.
    pub rules: Vec<Rule>,
    /// The entries on those rules for the record, after this call's
    /// auto-approvals.
    pub entries: Vec<Entry>,
}

impl ApprovalVerdict {
    fn clear() -> Self {
        Self {
            approved: true,
            rules: Vec::new(),
            entries: Vec::new(),
        }
    }
}

/// Evaluates approval rules and records decisions.
pub struct ApprovalEngine {
    rules: Arc<RuleStore>,
    log: Arc<ApproverLog>,
    entries: Arc<EntryStore>,
    requests: Arc<RequestStore>,
    predicates: Arc<dyn PredicateEvaluator>,
    access: Arc<dyn AccessChecker>,
    notifier: NotificationAdapter,
}

impl ApprovalEngine {
    /// Wire the engine to its stores and host capabilities.
    #[must_use]
    pub fn new(
        rules: Arc<RuleStore>,
        log: Arc<ApproverLog>,
        entries: Arc<EntryStore>,
        requests: Arc<RequestStore>,
        predicates: Arc<dyn PredicateEvaluator>,
        access: Arc<dyn AccessChecker>,
        notifier: NotificationAdapter,
    ) -> Self {
        Self {
            rules,
            log,
            entries,
            requests,
            predicates,
            access,
            notifier,
        }
    }

    /// Decide whether `record` may undergo the gated operation.
    ///
    /// Auto-approves every applicable rule the caller is entitled to
    /// decide, then solicits the remaining approvers of the lowest
    /// unapproved level.
    ///
    /// # Errors
    ///
    /// Returns a permission error when the caller lacks write
    /// capability on the record, and propagates lock contention and
    /// host failures. Rules the caller merely cannot approve do not
    /// error; they are left pending in the verdict.
    pub fn check_approval(
        &self,
        session: &Session,
        model: &ModelName,
        target: &RuleTarget,
        record: RecordId,
    ) -> ApprovalResult<ApprovalVerdict> {
        self.access
            .check_write(model, record, &session.user)
            .map_err(ApprovalError::from_capability)?;

        let applicable = self.applicable_rules(model, target, record)?;
        if applicable.is_empty() {
            return Ok(ApprovalVerdict::clear());
        }

        // Auto-approve wave by wave: only the lowest unapproved level
        // is attempted, and the next wave opens only when the current
        // one completes. Higher-level rules are reachable early solely
        // through explicit set_approval calls.
        while let Some(level) = self.frontier_level(&applicable, record) {
            let mut progressed = false;
            for rule in applicable.iter().filter(|r| r.level == level) {
                if self.entries.get(rule.id, record).is_some() {
                    continue;
                }
                match self.try_approve(session, rule, record, true) {
                    Ok(_) => progressed = true,
                    Err(e) if e.is_approval_blocker() => {
                        tracing::debug!(rule = %rule, %record, "left pending: {e}");
                    },
                    Err(e) => return Err(e),
                }
            }
            let wave_open = applicable.iter().filter(|r| r.level == level).any(|r| {
                !self
                    .entries
                    .get(r.id, record)
                    .is_some_and(|e| e.approved)
            });
            if !progressed || wave_open {
                break;
            }
        }
        self.solicit_frontier(&applicable, record, session)?;

        let rule_ids: Vec<RuleId> = applicable.iter().map(|r| r.id).collect();
        let entries = self.entries.entries_for(&rule_ids, &[record]);
        let approved = applicable
            .iter()
            .all(|r| entries.iter().any(|e| e.rule == r.id && e.approved));
        Ok(ApprovalVerdict {
            approved,
            rules: applicable,
            entries,
        })
    }

    /// Record an explicit decision on one rule for one record.
    ///
    /// # Errors
    ///
    /// Fails for unknown or archived rules, callers who are not
    /// approvers, duplicate decisions, and exclusive-approver
    /// violations.
    pub fn set_approval(
        &self,
        session: &Session,
        rule: RuleId,
        record: RecordId,
        approved: bool,
    ) -> ApprovalResult<Entry> {
        let rule = self.rules.get_required(rule)?;
        if !rule.active {
            return Err(ApprovalError::State {
                reason: format!("{rule} is archived and accepts no decisions"),
            });
        }
        self.try_approve(session, &rule, record, approved)
    }

    /// Delete a recorded decision, returning it. Permitted to the
    /// original decider, and to currently valid approvers of a
    /// higher-level rule whose domain matches the record.
    ///
    /// # Errors
    ///
    /// Returns a state error when no decision exists or the caller is
    /// not entitled to remove it.
    pub fn delete_approval(
        &self,
        session: &Session,
        rule: RuleId,
        record: RecordId,
    ) -> ApprovalResult<Entry> {
        let rule = self.rules.get_required(rule)?;
        let entry = self
            .entries
            .get(rule.id, record)
            .ok_or_else(|| ApprovalError::State {
                reason: format!("{rule} has no decision for {record}"),
            })?;
        if entry.user != session.user && !self.outranks(session, &rule, record)? {
            return Err(ApprovalError::State {
                reason: format!(
                    "{} may not delete the decision made by {}",
                    session.user, entry.user
                ),
            });
        }
        let removed = self
            .entries
            .remove(rule.id, record)
            .ok_or_else(|| ApprovalError::State {
                reason: format!("{rule} has no decision for {record}"),
            })?;
        tracing::info!(entry = %removed, actor = %session.user, "approval entry deleted");
        Ok(removed)
    }

    /// The active rules governing `(model, target)` whose domain
    /// matches `record`, in decision order.
    ///
    /// # Errors
    ///
    /// Propagates predicate evaluation failures.
    pub fn applicable_rules(
        &self,
        model: &ModelName,
        target: &RuleTarget,
        record: RecordId,
    ) -> ApprovalResult<Vec<Rule>> {
        let mut applicable = Vec::new();
        for rule in self.rules.rules_for(model, target) {
            if self.domain_matches(&rule, record)? {
                applicable.push(rule);
            }
        }
        Ok(applicable)
    }

    /// The users currently entitled to decide `rule`: effective
    /// approvers from the log plus the approval group's members.
    #[must_use]
    pub fn deciders(&self, rule: &Rule, session: &Session) -> HashSet<UserId> {
        let mut deciders = self.log.effective_approvers(rule.id, session.today);
        if let Some(group) = &rule.approval_group {
            deciders.extend(self.access.group_members(group));
        }
        deciders
    }

    fn domain_matches(&self, rule: &Rule, record: RecordId) -> ApprovalResult<bool> {
        match &rule.domain {
            None => Ok(true),
            Some(domain) if domain.is_empty() => Ok(true),
            Some(domain) => Ok(self.predicates.matches(&rule.model, record, domain)?),
        }
    }

    /// The decision path shared by auto-approval and explicit
    /// decisions. Holds the target's nowait lock for the duration.
    fn try_approve(
        &self,
        session: &Session,
        rule: &Rule,
        record: RecordId,
        approved: bool,
    ) -> ApprovalResult<Entry> {
        let _lock = self
            .rules
            .lock_target_nowait(&rule.model, &rule.target, record)?;

        self.access
            .check_write(&rule.model, record, &session.user)
            .map_err(ApprovalError::from_capability)?;
        if !self.deciders(rule, session).contains(&session.user) {
            return Err(ApprovalError::Permission {
                reason: format!("{} is not an approver of {rule}", session.user),
            });
        }
        if self.entries.get(rule.id, record).is_some() {
            return Err(ApprovalError::Conflict {
                reason: format!("{rule} already has a decision for {record}"),
            });
        }
        self.check_exclusivity(session.user, rule, record)?;

        let entry = self.entries.create(rule, record, session.user, approved)?;
        self.requests.delete(rule.id, record);
        if approved && !rule.level.is_terminal() {
            self.advance_wave(rule, record, session)?;
        }
        self.notifier.post_decision_message(rule, &entry);
        Ok(entry)
    }

    /// An `exclusive_user` rule binds its decider to that rule alone
    /// on the record; conversely no one who already decided an
    /// exclusive rule may decide another.
    fn check_exclusivity(
        &self,
        user: UserId,
        rule: &Rule,
        record: RecordId,
    ) -> ApprovalResult<()> {
        let mine: Vec<Entry> = self
            .entries
            .entries_for_record(&rule.model, record)
            .into_iter()
            .filter(|e| e.user == user)
            .collect();
        if mine.is_empty() {
            return Ok(());
        }
        if rule.exclusive_user {
            return Err(ApprovalError::Conflict {
                reason: format!(
                    "{rule} demands an exclusive approver but {user} already decided another rule on {record}"
                ),
            });
        }
        if mine
            .iter()
            .any(|e| self.rules.get(e.rule).is_some_and(|r| r.exclusive_user))
        {
            return Err(ApprovalError::Conflict {
                reason: format!(
                    "{user} decided an exclusive-approver rule on {record} and may satisfy no other"
                ),
            });
        }
        Ok(())
    }

    /// After an approval on `rule`, solicit the next level once every
    /// applicable rule up to and including `rule.level` is approved.
    fn advance_wave(
        &self,
        rule: &Rule,
        record: RecordId,
        session: &Session,
    ) -> ApprovalResult<()> {
        let applicable = self.applicable_rules(&rule.model, &rule.target, record)?;
        let wave_done = applicable
            .iter()
            .filter(|r| r.level <= rule.level)
            .all(|r| {
                self.entries
                    .get(r.id, record)
                    .is_some_and(|e| e.approved)
            });
        if !wave_done {
            return Ok(());
        }
        let next: Option<Level> = applicable
            .iter()
            .map(|r| r.level)
            .filter(|l| *l > rule.level)
            .min();
        let Some(next) = next else {
            return Ok(());
        };
        for r in applicable.iter().filter(|r| r.level == next) {
            if self.entries.get(r.id, record).is_none() {
                self.notifier.schedule_request(r, record, session.today)?;
            }
        }
        Ok(())
    }

    /// The lowest level with an applicable rule that lacks an
    /// approving entry, if any.
    fn frontier_level(&self, applicable: &[Rule], record: RecordId) -> Option<Level> {
        applicable
            .iter()
            .filter(|r| {
                !self
                    .entries
                    .get(r.id, record)
                    .is_some_and(|e| e.approved)
            })
            .map(|r| r.level)
            .min()
    }

    /// Solicit the undecided rules of the lowest level that is not yet
    /// fully approved. Higher levels wait their turn.
    fn solicit_frontier(
        &self,
        applicable: &[Rule],
        record: RecordId,
        session: &Session,
    ) -> ApprovalResult<()> {
        let Some(level) = self.frontier_level(applicable, record) else {
            return Ok(());
        };
        for rule in applicable.iter().filter(|r| r.level == level) {
            if self.entries.get(rule.id, record).is_none() {
                self.notifier.schedule_request(rule, record, session.today)?;
            }
        }
        Ok(())
    }

    /// Whether the caller is a currently valid approver of some
    /// higher-level rule whose domain matches the record.
    fn outranks(
        &self,
        session: &Session,
        rule: &Rule,
        record: RecordId,
    ) -> ApprovalResult<bool> {
        let applicable = self.applicable_rules(&rule.model, &rule.target, record)?;
        Ok(applicable
            .iter()
            .filter(|r| r.level > rule.level)
            .any(|r| self.deciders(r, session).contains(&session.user)))
    }

    /// The rule store backing the engine.
    #[must_use]
    pub fn rules(&self) -> &Arc<RuleStore> {
        &self.rules
    }

    /// The entry store backing the engine.
    #[must_use]
    pub fn entries(&self) -> &Arc<EntryStore> {
        &self.entries
    }

    /// The request store backing the engine.
    #[must_use]
    pub fn requests(&self) -> &Arc<RequestStore> {
        &self.requests
    }

    /// The approver log backing the engine.
    #[must_use]
    pub fn log(&self) -> &Arc<ApproverLog> {
        &self.log
    }

    pub(crate) fn access(&self) -> &Arc<dyn AccessChecker> {
        &self.access
    }
}

impl fmt::Debug for ApprovalEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApprovalEngine")
            .field("rules", &self.rules.count())
            .field("entries", &self.entries.count())
            .finish_non_exhaustive()
    }
}
