//! The assembled engine.
//!
//! [`ApprovalService`] wires the stores, the decision engine, the
//! interceptor, and the lifecycle hook over one set of host
//! capabilities, and re-reconciles the interceptor's patch set after
//! every rule mutation. Hosts call this facade; the inner pieces stay
//! reachable through [`ApprovalService::engine`] for advanced wiring.

use chrono::NaiveDate;
use std::fmt;
use std::sync::Arc;
use studio_core::{ActionId, MethodName, ModelName, RecordId, RuleId, UserId};
use studio_host::{
    AccessChecker, ActivityScheduler, Automation, EntityRegistry, Messenger, PredicateEvaluator,
    Session,
};

use crate::approver::ApproverLog;
use crate::engine::{ApprovalEngine, ApprovalVerdict};
use crate::entry::{Entry, EntryStore};
use crate::error::ApprovalResult;
use crate::interceptor::MethodInterceptor;
use crate::lifecycle::{LifecycleConfig, LifecycleHook};
use crate::notify::NotificationAdapter;
use crate::request::RequestStore;
use crate::rule::{NewRule, Rule, RuleStore, RuleTarget, RuleUpdate};
use crate::spec::{ApprovalSpec, SpecRequest};

/// The host capability set the engine is built over.
#[derive(Clone)]
pub struct HostCapabilities {
    /// Entity types and operation dispatch.
    pub registry: Arc<dyn EntityRegistry>,
    /// Capability checks and group membership.
    pub access: Arc<dyn AccessChecker>,
    /// Record predicate evaluation.
    pub predicates: Arc<dyn PredicateEvaluator>,
    /// Activity scheduling.
    pub scheduler: Arc<dyn ActivityScheduler>,
    /// Message posting.
    pub messenger: Arc<dyn Messenger>,
    /// Lifecycle triggers.
    pub automation: Arc<dyn Automation>,
}

impl HostCapabilities {
    /// Build the capability set from one object implementing every
    /// collaborator trait, such as
    /// [`MemoryHost`](studio_host::MemoryHost).
    pub fn from_host<H>(host: Arc<H>) -> Self
    where
        H: EntityRegistry
            + AccessChecker
            + PredicateEvaluator
            + ActivityScheduler
            + Messenger
            + Automation
            + 'static,
    {
        Self {
            registry: Arc::clone(&host) as Arc<dyn EntityRegistry>,
            access: Arc::clone(&host) as Arc<dyn AccessChecker>,
            predicates: Arc::clone(&host) as Arc<dyn PredicateEvaluator>,
            scheduler: Arc::clone(&host) as Arc<dyn ActivityScheduler>,
            messenger: Arc::clone(&host) as Arc<dyn Messenger>,
            automation: host as Arc<dyn Automation>,
        }
    }
}

impl fmt::Debug for HostCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostCapabilities").finish_non_exhaustive()
    }
}

/// The fully wired approval engine.
pub struct ApprovalService {
    engine: Arc<ApprovalEngine>,
    interceptor: MethodInterceptor,
    lifecycle: LifecycleHook,
}

impl ApprovalService {
    /// Assemble the engine over a host capability set.
    #[must_use]
    pub fn new(host: HostCapabilities) -> Self {
        let entries = Arc::new(EntryStore::new());
        let rules = Arc::new(RuleStore::new(
            Arc::clone(&host.registry),
            Arc::clone(&entries),
        ));
        let log = Arc::new(ApproverLog::new());
        let requests = Arc::new(RequestStore::new(Arc::clone(&host.scheduler)));
        let notifier = NotificationAdapter::new(
            Arc::clone(&host.scheduler),
            Arc::clone(&host.messenger),
            Arc::clone(&host.access),
            Arc::clone(&log),
            Arc::clone(&requests),
        );
        let engine = Arc::new(ApprovalEngine::new(
            rules,
            log,
            Arc::clone(&entries),
            requests,
            Arc::clone(&host.predicates),
            Arc::clone(&host.access),
            notifier,
        ));
        let interceptor = MethodInterceptor::new(Arc::clone(&host.registry), Arc::clone(&engine));
        let lifecycle = LifecycleHook::new(Arc::clone(&host.automation), entries);
        Self {
            engine,
            interceptor,
            lifecycle,
        }
    }

    /// Create a rule and reconcile the interceptor's patches.
    ///
    /// # Errors
    ///
    /// Propagates rule validation and registry failures.
    pub fn create_rule(&self, new: NewRule) -> ApprovalResult<Rule> {
        let rule = self.engine.rules().create(new)?;
        self.interceptor.install()?;
        Ok(rule)
    }

    /// Apply a partial rule update and reconcile patches.
    ///
    /// # Errors
    ///
    /// Propagates immutability, validation and registry failures.
    pub fn update_rule(&self, id: RuleId, update: RuleUpdate) -> ApprovalResult<Rule> {
        let rule = self.engine.rules().update(id, update)?;
        self.interceptor.install()?;
        Ok(rule)
    }

    /// Archive a rule and reconcile patches.
    ///
    /// # Errors
    ///
    /// Fails for unknown rules.
    pub fn archive_rule(&self, id: RuleId) -> ApprovalResult<Rule> {
        let rule = self.engine.rules().archive(id)?;
        self.interceptor.install()?;
        Ok(rule)
    }

    /// Put an archived rule back in force and reconcile patches.
    ///
    /// # Errors
    ///
    /// Fails for unknown rules.
    pub fn unarchive_rule(&self, id: RuleId) -> ApprovalResult<Rule> {
        let rule = self.engine.rules().unarchive(id)?;
        self.interceptor.install()?;
        Ok(rule)
    }

    /// Delete a rule and reconcile patches.
    ///
    /// # Errors
    ///
    /// Fails when the rule has existing entries.
    pub fn delete_rule(&self, id: RuleId) -> ApprovalResult<()> {
        self.engine.rules().delete(id)?;
        self.interceptor.install()
    }

    /// Replace a rule's configured approvers.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn set_approvers(
        &self,
        session: &Session,
        rule: RuleId,
        users: Vec<UserId>,
    ) -> ApprovalResult<()> {
        self.engine
            .log()
            .set_approvers(rule, users, session.user, session.today)
    }

    /// Delegate the caller's approval rights on a rule.
    ///
    /// # Errors
    ///
    /// Fails when the caller is not a currently valid approver.
    pub fn delegate(
        &self,
        session: &Session,
        rule: RuleId,
        users: Vec<UserId>,
        date_to: Option<NaiveDate>,
    ) -> ApprovalResult<()> {
        self.engine
            .log()
            .delegate(rule, users, date_to, session.user, session.today)
    }

    /// Decide whether `record` may undergo the operation, using the
    /// host's optional-pair target form.
    ///
    /// # Errors
    ///
    /// Fails unless exactly one of `method` / `action` is given;
    /// otherwise as [`ApprovalEngine::check_approval`].
    pub fn check_approval(
        &self,
        session: &Session,
        model: &ModelName,
        record: RecordId,
        method: Option<MethodName>,
        action: Option<ActionId>,
    ) -> ApprovalResult<ApprovalVerdict> {
        let target = RuleTarget::from_parts(method, action)?;
        self.engine.check_approval(session, model, &target, record)
    }

    /// Record an explicit decision.
    ///
    /// # Errors
    ///
    /// As [`ApprovalEngine::set_approval`].
    pub fn set_approval(
        &self,
        session: &Session,
        rule: RuleId,
        record: RecordId,
        approved: bool,
    ) -> ApprovalResult<Entry> {
        self.engine.set_approval(session, rule, record, approved)
    }

    /// Delete a recorded decision.
    ///
    /// # Errors
    ///
    /// As [`ApprovalEngine::delete_approval`].
    pub fn delete_approval(
        &self,
        session: &Session,
        rule: RuleId,
        record: RecordId,
    ) -> ApprovalResult<Entry> {
        self.engine.delete_approval(session, rule, record)
    }

    /// Snapshot rules and entries for UI layers.
    ///
    /// # Errors
    ///
    /// As [`ApprovalEngine::get_approval_spec`].
    pub fn get_approval_spec(
        &self,
        session: &Session,
        requests: &[SpecRequest],
    ) -> ApprovalResult<ApprovalSpec> {
        self.engine.get_approval_spec(session, requests)
    }

    /// The decisions visible to the session: the caller's own, or all
    /// of them under an elevated session.
    #[must_use]
    pub fn visible_entries(&self, session: &Session) -> Vec<Entry> {
        if session.elevated {
            self.engine.entries().all()
        } else {
            self.engine.entries().entries_of_user(&session.user)
        }
    }

    /// (Re)install the interceptor's method patches.
    ///
    /// # Errors
    ///
    /// Propagates registry failures.
    pub fn register_hook(&self) -> ApprovalResult<()> {
        self.interceptor.install()
    }

    /// Remove every installed method patch.
    ///
    /// # Errors
    ///
    /// Propagates registry failures.
    pub fn unregister_hook(&self) -> ApprovalResult<()> {
        self.interceptor.uninstall()
    }

    /// Register lifecycle purge triggers from a declaration set.
    ///
    /// # Errors
    ///
    /// Propagates host registration failures.
    pub fn register_lifecycle(&self, config: &LifecycleConfig) -> ApprovalResult<()> {
        self.lifecycle.register(config)
    }

    /// The wired decision engine.
    #[must_use]
    pub fn engine(&self) -> &Arc<ApprovalEngine> {
        &self.engine
    }

    /// The interceptor managing method patches.
    #[must_use]
    pub fn interceptor(&self) -> &MethodInterceptor {
        &self.interceptor
    }

    /// The lifecycle hook managing purge triggers.
    #[must_use]
    pub fn lifecycle(&self) -> &LifecycleHook {
        &self.lifecycle
    }
}

impl fmt::Debug for ApprovalService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApprovalService")
            .field("engine", &self.engine)
            .field("patches", &self.interceptor.patch_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::{Value, json};
    use studio_core::Level;
    use studio_host::MemoryHost;

    use crate::error::ApprovalError;

    fn service() -> (Arc<MemoryHost>, ApprovalService) {
        let host = Arc::new(MemoryHost::new());
        let model = ModelName::from("document");
        host.add_model(model.clone());
        host.insert_record(&model, RecordId(1), json!({"state": "posted"}));
        host.register_operation(
            &model,
            &MethodName::from("validate"),
            Arc::new(|_| Ok(Value::Bool(true))),
        );
        let service = ApprovalService::new(HostCapabilities::from_host(host.clone()));
        (host, service)
    }

    fn session(user: UserId) -> Session {
        Session::user(user).with_today(NaiveDate::from_ymd_opt(2024, 6, 15).unwrap())
    }

    fn new_rule() -> NewRule {
        NewRule::method(ModelName::from("document"), MethodName::from("validate"))
    }

    #[test]
    fn test_rule_mutation_reconciles_patches() {
        let (_host, service) = service();
        let rule = service.create_rule(new_rule()).unwrap();
        assert_eq!(service.interceptor().patch_count(), 1);

        service.archive_rule(rule.id).unwrap();
        assert_eq!(service.interceptor().patch_count(), 0);

        service.unarchive_rule(rule.id).unwrap();
        assert_eq!(service.interceptor().patch_count(), 1);

        service.archive_rule(rule.id).unwrap();
        service.delete_rule(rule.id).unwrap();
        assert_eq!(service.interceptor().patch_count(), 0);
    }

    #[test]
    fn test_check_approval_wire_form() {
        let (_host, service) = service();
        let user = UserId::new();

        let both = service.check_approval(
            &session(user),
            &ModelName::from("document"),
            RecordId(1),
            Some(MethodName::from("validate")),
            Some(ActionId::new()),
        );
        assert!(matches!(both, Err(ApprovalError::Validation { .. })));

        let verdict = service
            .check_approval(
                &session(user),
                &ModelName::from("document"),
                RecordId(1),
                Some(MethodName::from("validate")),
                None,
            )
            .unwrap();
        assert!(verdict.approved);
    }

    #[test]
    fn test_approval_flow_through_facade() {
        let (_host, service) = service();
        let (admin, approver) = (UserId::new(), UserId::new());
        let rule = service
            .create_rule(new_rule().with_level(Level::new(2).unwrap()))
            .unwrap();
        service
            .set_approvers(&session(admin), rule.id, vec![approver])
            .unwrap();

        let entry = service
            .set_approval(&session(approver), rule.id, RecordId(1), true)
            .unwrap();
        assert!(entry.approved);
        assert_eq!(service.visible_entries(&session(approver)).len(), 1);
        assert!(service.visible_entries(&session(UserId::new())).is_empty());
        assert_eq!(
            service
                .visible_entries(&Session::elevated(UserId::new()))
                .len(),
            1
        );

        service
            .delete_approval(&session(approver), rule.id, RecordId(1))
            .unwrap();
        assert!(service.visible_entries(&session(approver)).is_empty());
    }

    #[test]
    fn test_delegation_through_facade() {
        let (_host, service) = service();
        let (admin, approver, delegate) = (UserId::new(), UserId::new(), UserId::new());
        let rule = service.create_rule(new_rule()).unwrap();
        service
            .set_approvers(&session(admin), rule.id, vec![approver])
            .unwrap();
        service
            .delegate(&session(approver), rule.id, vec![delegate], None)
            .unwrap();

        service
            .set_approval(&session(delegate), rule.id, RecordId(1), true)
            .unwrap();
    }

    #[test]
    fn test_lifecycle_registration_purges() {
        let (host, service) = service();
        let model = ModelName::from("document");
        let (admin, approver) = (UserId::new(), UserId::new());
        let rule = service.create_rule(new_rule()).unwrap();
        service
            .set_approvers(&session(admin), rule.id, vec![approver])
            .unwrap();
        service
            .set_approval(&session(approver), rule.id, RecordId(1), true)
            .unwrap();

        let config = LifecycleConfig::from_toml_str(
            r#"
            [models.document]
            regressions = [{ field = "state", to = "draft" }]
            "#,
        )
        .unwrap();
        service.register_lifecycle(&config).unwrap();

        host.write_field(&model, RecordId(1), "state", json!("draft"))
            .unwrap();
        assert!(service.engine().entries().get(rule.id, RecordId(1)).is_none());
    }
}
