//! Notification fan-out: approval-ask activities and post-decision
//! messages.
//!
//! Notification failures never block the decision path. Scheduling and
//! posting errors are logged and swallowed; only the request-store
//! bookkeeping itself can fail.

use chrono::NaiveDate;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use studio_core::{RecordId, RecordRef, UserId};
use studio_host::{AccessChecker, ActivityRequest, ActivityScheduler, MessagePost, Messenger};

use crate::approver::ApproverLog;
use crate::entry::Entry;
use crate::error::ApprovalResult;
use crate::request::RequestStore;
use crate::rule::Rule;

/// Fans decisions and asks out to the host's activity and messaging
/// capabilities.
pub struct NotificationAdapter {
    scheduler: Arc<dyn ActivityScheduler>,
    messenger: Arc<dyn Messenger>,
    access: Arc<dyn AccessChecker>,
    log: Arc<ApproverLog>,
    requests: Arc<RequestStore>,
}

impl NotificationAdapter {
    /// Wire the adapter to the host capabilities and shared stores.
    #[must_use]
    pub fn new(
        scheduler: Arc<dyn ActivityScheduler>,
        messenger: Arc<dyn Messenger>,
        access: Arc<dyn AccessChecker>,
        log: Arc<ApproverLog>,
        requests: Arc<RequestStore>,
    ) -> Self {
        Self {
            scheduler,
            messenger,
            access,
            log,
            requests,
        }
    }

    /// Solicit a decision on `(rule, record)`: schedule one
    /// grant-approval activity per effective approver and record the
    /// outstanding request. Idempotent per `(rule, record)`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the request store fails. Individual
    /// activity failures are logged and skipped.
    pub fn schedule_request(
        &self,
        rule: &Rule,
        record: RecordId,
        today: NaiveDate,
    ) -> ApprovalResult<()> {
        if self.requests.has(rule.id, record) {
            return Ok(());
        }
        let mut approvers: HashSet<UserId> = self.log.effective_approvers(rule.id, today);
        if let Some(group) = &rule.approval_group {
            approvers.extend(self.access.group_members(group));
        }
        let target = RecordRef::new(rule.model.clone(), record);
        let summary = format!("Approval requested: {}", rule.describe());
        let mut activities = Vec::with_capacity(approvers.len());
        for approver in approvers {
            let request = ActivityRequest::grant_approval(approver, target.clone(), &summary);
            match self.scheduler.schedule(request) {
                Ok(handle) => activities.push(handle),
                Err(e) => {
                    tracing::warn!(%approver, rule = %rule, "failed to schedule approval activity: {e}");
                },
            }
        }
        tracing::debug!(rule = %rule, %record, count = activities.len(), "approval solicited");
        self.requests.create(rule.id, record, activities)?;
        Ok(())
    }

    /// Post a message about a recorded decision to the rule's
    /// notification recipients. No-op when the rule names none; never
    /// fails.
    pub fn post_decision_message(&self, rule: &Rule, entry: &Entry) {
        if rule.users_to_notify.is_empty() {
            return;
        }
        let target = RecordRef::new(entry.model.clone(), entry.record);
        let verdict = if entry.approved { "granted" } else { "refused" };
        let message = MessagePost {
            author: entry.user,
            recipients: rule.users_to_notify.clone(),
            body: format!("Approval {verdict} for {} by {}", rule.describe(), entry.user),
        };
        if let Err(e) = self.messenger.post(&target, message) {
            tracing::warn!(rule = %rule, entry = %entry, "failed to post decision message: {e}");
        }
    }
}

impl fmt::Debug for NotificationAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationAdapter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use studio_core::{GroupId, Level, MethodName, ModelName, RuleId, Timestamp};
    use studio_host::MemoryHost;

    fn adapter(host: &Arc<MemoryHost>) -> (NotificationAdapter, Arc<ApproverLog>) {
        let log = Arc::new(ApproverLog::new());
        let requests = Arc::new(RequestStore::new(
            Arc::clone(host) as Arc<dyn ActivityScheduler>
        ));
        let adapter = NotificationAdapter::new(
            Arc::clone(host) as Arc<dyn ActivityScheduler>,
            Arc::clone(host) as Arc<dyn Messenger>,
            Arc::clone(host) as Arc<dyn AccessChecker>,
            Arc::clone(&log),
            requests,
        );
        (adapter, log)
    }

    fn rule_with(group: Option<GroupId>, notify: Vec<UserId>) -> Rule {
        Rule {
            id: RuleId::new(),
            seq: 0,
            model: ModelName::from("document"),
            target: crate::rule::RuleTarget::Method(MethodName::from("validate")),
            domain: None,
            level: Level::MIN,
            exclusive_user: false,
            approval_group: group,
            users_to_notify: notify,
            active: true,
            created_at: Timestamp::now(),
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
    }

    #[test]
    fn test_schedules_per_approver_once() {
        let host = Arc::new(MemoryHost::new());
        let (adapter, log) = adapter(&host);
        let rule = rule_with(None, vec![]);
        let (u1, u2) = (UserId::new(), UserId::new());
        log.set_approvers(rule.id, vec![u1, u2], UserId::new(), today())
            .unwrap();

        adapter.schedule_request(&rule, RecordId(1), today()).unwrap();
        assert_eq!(host.live_activities().len(), 2);

        // Second solicitation of the same target is a no-op.
        adapter.schedule_request(&rule, RecordId(1), today()).unwrap();
        assert_eq!(host.live_activities().len(), 2);
    }

    #[test]
    fn test_group_members_are_solicited() {
        let host = Arc::new(MemoryHost::new());
        let group = GroupId::from("finance");
        let member = UserId::new();
        host.set_group(group.clone(), [member]);
        let (adapter, _log) = adapter(&host);
        let rule = rule_with(Some(group), vec![]);

        adapter.schedule_request(&rule, RecordId(1), today()).unwrap();
        let activities = host.live_activities();
        assert_eq!(activities.len(), 1);
        assert_eq!(activities[0].user, member);
    }

    #[test]
    fn test_decision_message_posted() {
        let host = Arc::new(MemoryHost::new());
        let model = ModelName::from("document");
        host.enable_messaging(&model);
        let (adapter, _log) = adapter(&host);
        let watcher = UserId::new();
        let rule = rule_with(None, vec![watcher]);
        let entry = Entry {
            id: studio_core::EntryId::new(),
            rule: rule.id,
            model,
            record: RecordId(1),
            user: UserId::new(),
            approved: true,
            created_at: Timestamp::now(),
        };

        adapter.post_decision_message(&rule, &entry);
        let posted = host.posted_messages();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].1.recipients, vec![watcher]);
        assert!(posted[0].1.body.contains("granted"));
    }

    #[test]
    fn test_no_recipients_no_message() {
        let host = Arc::new(MemoryHost::new());
        let model = ModelName::from("document");
        host.enable_messaging(&model);
        let (adapter, _log) = adapter(&host);
        let rule = rule_with(None, vec![]);
        let entry = Entry {
            id: studio_core::EntryId::new(),
            rule: rule.id,
            model,
            record: RecordId(1),
            user: UserId::new(),
            approved: false,
            created_at: Timestamp::now(),
        };
        adapter.post_decision_message(&rule, &entry);
        assert!(host.posted_messages().is_empty());
    }
}
