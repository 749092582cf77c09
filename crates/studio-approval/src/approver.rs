//! Approver log — who may approve which rule, and since when.
//!
//! One [`ApproverGrant`] per grant of approval rights. A grant is
//! *valid* while its `date_to` is unset or has not elapsed; a rule's
//! effective approver set is the users behind its currently valid
//! grants. Delegations are grants created by an approver for someone
//! else, usually time-bounded; re-delegating replaces the granter's
//! previous delegations on the rule atomically.
//!
//! Every mutation is recorded as a human-readable [`AuditMessage`]
//! naming the actor and the old and new effective sets.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::RwLock;
use studio_core::{RuleId, Timestamp, UserId};

use crate::error::{ApprovalError, ApprovalResult};

/// One grant of approval rights on one rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproverGrant {
    /// The rule the grant applies to.
    pub rule: RuleId,
    /// The user granted approval rights.
    pub user: UserId,
    /// Optional expiry; the grant is valid through this date.
    pub date_to: Option<NaiveDate>,
    /// Whether the grant was delegated by an approver rather than
    /// configured by an administrator.
    pub is_delegation: bool,
    /// Who created the grant.
    pub granter: UserId,
    /// When the grant was created.
    pub created_at: Timestamp,
}

impl ApproverGrant {
    /// Whether the grant is valid on `today` (the caller's date).
    #[must_use]
    pub fn is_valid(&self, today: NaiveDate) -> bool {
        self.date_to.is_none_or(|until| until >= today)
    }
}

impl fmt::Display for ApproverGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}", self.user, self.rule)?;
        if let Some(until) = self.date_to {
            write!(f, " until {until}")?;
        }
        if self.is_delegation {
            write!(f, " (delegated by {})", self.granter)?;
        }
        Ok(())
    }
}

/// One audited approver-log mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditMessage {
    /// Who performed the mutation.
    pub actor: UserId,
    /// The rule whose approvers changed.
    pub rule: RuleId,
    /// Rendered description: actor, old effective set, new effective
    /// set including expiry.
    pub body: String,
    /// When the mutation happened.
    pub at: Timestamp,
}

/// In-memory approver log.
pub struct ApproverLog {
    grants: RwLock<Vec<ApproverGrant>>,
    audit: RwLock<Vec<AuditMessage>>,
}

impl ApproverLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self {
            grants: RwLock::new(Vec::new()),
            audit: RwLock::new(Vec::new()),
        }
    }

    /// Replace the non-delegation grants of a rule with one open-ended
    /// grant per user. Delegations are untouched.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the internal lock is poisoned.
    pub fn set_approvers(
        &self,
        rule: RuleId,
        users: Vec<UserId>,
        actor: UserId,
        today: NaiveDate,
    ) -> ApprovalResult<()> {
        let mut grants = self.write_grants()?;
        let old = effective_of(&grants, rule, today);
        grants.retain(|g| !(g.rule == rule && !g.is_delegation));
        for user in users {
            grants.push(ApproverGrant {
                rule,
                user,
                date_to: None,
                is_delegation: false,
                granter: actor,
                created_at: Timestamp::now(),
            });
        }
        let new = effective_of(&grants, rule, today);
        drop(grants);
        self.record_audit(actor, rule, "approvers set", &old, &new);
        Ok(())
    }

    /// Delegate the caller's approval rights on a rule to other users,
    /// optionally time-bounded. The caller's previous delegations on
    /// the rule are replaced.
    ///
    /// # Errors
    ///
    /// Returns a permission error when the caller is not a currently
    /// valid approver of the rule.
    pub fn delegate(
        &self,
        rule: RuleId,
        users: Vec<UserId>,
        date_to: Option<NaiveDate>,
        actor: UserId,
        today: NaiveDate,
    ) -> ApprovalResult<()> {
        let mut grants = self.write_grants()?;
        let old = effective_of(&grants, rule, today);
        if !old.contains(&actor) {
            return Err(ApprovalError::Permission {
                reason: format!("{actor} is not a valid approver of {rule} and cannot delegate"),
            });
        }
        // Re-delegation replaces this granter's prior delegations.
        grants.retain(|g| !(g.rule == rule && g.is_delegation && g.granter == actor));
        for user in users {
            grants.push(ApproverGrant {
                rule,
                user,
                date_to,
                is_delegation: true,
                granter: actor,
                created_at: Timestamp::now(),
            });
        }
        let new = effective_of(&grants, rule, today);
        drop(grants);
        let what = match date_to {
            Some(until) => format!("delegated until {until}"),
            None => "delegated".to_string(),
        };
        self.record_audit(actor, rule, &what, &old, &new);
        Ok(())
    }

    /// The set of users whose grant on `rule` is valid on `today`.
    #[must_use]
    pub fn effective_approvers(&self, rule: RuleId, today: NaiveDate) -> HashSet<UserId> {
        self.grants
            .read()
            .map(|grants| effective_of(&grants, rule, today))
            .unwrap_or_default()
    }

    /// All grants of a rule, valid or not.
    #[must_use]
    pub fn grants_for(&self, rule: RuleId) -> Vec<ApproverGrant> {
        self.grants
            .read()
            .map(|grants| grants.iter().filter(|g| g.rule == rule).cloned().collect())
            .unwrap_or_default()
    }

    /// The audit trail, oldest first.
    #[must_use]
    pub fn audit_trail(&self) -> Vec<AuditMessage> {
        self.audit.read().map(|a| a.clone()).unwrap_or_default()
    }

    fn record_audit(
        &self,
        actor: UserId,
        rule: RuleId,
        what: &str,
        old: &HashSet<UserId>,
        new: &HashSet<UserId>,
    ) {
        let body = format!(
            "{actor} {what} on {rule}: {} -> {}",
            render_set(old),
            render_set(new)
        );
        tracing::info!(%actor, %rule, "{body}");
        if let Ok(mut audit) = self.audit.write() {
            audit.push(AuditMessage {
                actor,
                rule,
                body,
                at: Timestamp::now(),
            });
        }
    }

    fn write_grants(&self) -> ApprovalResult<std::sync::RwLockWriteGuard<'_, Vec<ApproverGrant>>> {
        self.grants
            .write()
            .map_err(|e| ApprovalError::Storage(e.to_string()))
    }
}

impl Default for ApproverLog {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ApproverLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.grants.read().map(|g| g.len()).unwrap_or(0);
        f.debug_struct("ApproverLog")
            .field("grants", &count)
            .finish_non_exhaustive()
    }
}

fn effective_of(grants: &[ApproverGrant], rule: RuleId, today: NaiveDate) -> HashSet<UserId> {
    grants
        .iter()
        .filter(|g| g.rule == rule && g.is_valid(today))
        .map(|g| g.user)
        .collect()
}

fn render_set(users: &HashSet<UserId>) -> String {
    if users.is_empty() {
        return "{}".to_string();
    }
    let mut names: Vec<String> = users.iter().map(ToString::to_string).collect();
    names.sort();
    format!("{{{}}}", names.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Days;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
    }

    #[test]
    fn test_set_approvers_replaces() {
        let log = ApproverLog::new();
        let rule = RuleId::new();
        let admin = UserId::new();
        let (u1, u2, u3) = (UserId::new(), UserId::new(), UserId::new());

        log.set_approvers(rule, vec![u1, u2], admin, today()).unwrap();
        assert_eq!(log.effective_approvers(rule, today()), HashSet::from([u1, u2]));

        log.set_approvers(rule, vec![u3], admin, today()).unwrap();
        assert_eq!(log.effective_approvers(rule, today()), HashSet::from([u3]));
        assert_eq!(log.audit_trail().len(), 2);
    }

    #[test]
    fn test_delegation_requires_rights() {
        let log = ApproverLog::new();
        let rule = RuleId::new();
        let outsider = UserId::new();
        let result = log.delegate(rule, vec![UserId::new()], None, outsider, today());
        assert!(matches!(result, Err(ApprovalError::Permission { .. })));
    }

    #[test]
    fn test_delegation_and_expiry() {
        let log = ApproverLog::new();
        let rule = RuleId::new();
        let (admin, u1, u2) = (UserId::new(), UserId::new(), UserId::new());
        log.set_approvers(rule, vec![u1], admin, today()).unwrap();

        let until = today().checked_add_days(Days::new(7)).unwrap();
        log.delegate(rule, vec![u2], Some(until), u1, today()).unwrap();
        assert!(log.effective_approvers(rule, today()).contains(&u2));
        // Valid through the expiry date, gone after.
        assert!(log.effective_approvers(rule, until).contains(&u2));
        let after = until.checked_add_days(Days::new(1)).unwrap();
        assert!(!log.effective_approvers(rule, after).contains(&u2));
        // The original approver is unaffected.
        assert!(log.effective_approvers(rule, after).contains(&u1));
    }

    #[test]
    fn test_expired_delegation_is_invalid_immediately() {
        let log = ApproverLog::new();
        let rule = RuleId::new();
        let (admin, u1, u2) = (UserId::new(), UserId::new(), UserId::new());
        log.set_approvers(rule, vec![u1], admin, today()).unwrap();

        let yesterday = today().checked_sub_days(Days::new(1)).unwrap();
        log.delegate(rule, vec![u2], Some(yesterday), u1, today()).unwrap();
        assert!(!log.effective_approvers(rule, today()).contains(&u2));
    }

    #[test]
    fn test_redelegation_replaces_own_grants_only() {
        let log = ApproverLog::new();
        let rule = RuleId::new();
        let (admin, u1, u2, a, b) = (
            UserId::new(),
            UserId::new(),
            UserId::new(),
            UserId::new(),
            UserId::new(),
        );
        log.set_approvers(rule, vec![u1, u2], admin, today()).unwrap();
        log.delegate(rule, vec![a], None, u1, today()).unwrap();
        log.delegate(rule, vec![a], None, u2, today()).unwrap();

        // u1 re-delegates to b; u2's delegation to a survives.
        log.delegate(rule, vec![b], None, u1, today()).unwrap();
        let effective = log.effective_approvers(rule, today());
        assert!(effective.contains(&a));
        assert!(effective.contains(&b));
        let delegations: Vec<_> = log
            .grants_for(rule)
            .into_iter()
            .filter(|g| g.is_delegation)
            .collect();
        assert_eq!(delegations.len(), 2);
    }

    #[test]
    fn test_audit_names_actor_and_sets() {
        let log = ApproverLog::new();
        let rule = RuleId::new();
        let (admin, u1) = (UserId::new(), UserId::new());
        log.set_approvers(rule, vec![u1], admin, today()).unwrap();

        let trail = log.audit_trail();
        assert_eq!(trail.len(), 1);
        assert!(trail[0].body.contains(&admin.to_string()));
        assert!(trail[0].body.contains(&u1.to_string()));

        let until = today().checked_add_days(Days::new(3)).unwrap();
        log.delegate(rule, vec![UserId::new()], Some(until), u1, today())
            .unwrap();
        let trail = log.audit_trail();
        assert_eq!(trail.len(), 2);
        assert!(trail[1].body.contains(&until.to_string()));
    }
}
