//! In-memory store for approval rules.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use studio_core::{MethodName, ModelName, RecordId, RuleId, Timestamp};
use studio_host::EntityRegistry;

use super::{NewRule, Rule, RuleTarget, RuleUpdate};
use crate::entry::EntryStore;
use crate::error::{ApprovalError, ApprovalResult};

/// In-memory store for approval rules.
///
/// Thread-safe via internal [`RwLock`]. Owns rule validation against
/// the host's [`EntityRegistry`], the immutability invariants for
/// rules with existing entries, and the per-target nowait lock that
/// serializes concurrent approvals.
pub struct RuleStore {
    registry: Arc<dyn EntityRegistry>,
    entries: Arc<EntryStore>,
    rules: RwLock<HashMap<RuleId, Rule>>,
    seq: AtomicU64,
    locks: RwLock<HashMap<(ModelName, RuleTarget), Arc<AtomicBool>>>,
}

impl RuleStore {
    /// Create an empty rule store.
    #[must_use]
    pub fn new(registry: Arc<dyn EntityRegistry>, entries: Arc<EntryStore>) -> Self {
        Self {
            registry,
            entries,
            rules: RwLock::new(HashMap::new()),
            seq: AtomicU64::new(0),
            locks: RwLock::new(HashMap::new()),
        }
    }

    /// Create a rule after validating its target.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the model is unknown, or the
    /// target method is private, primitive, or not declared on the
    /// model.
    pub fn create(&self, new: NewRule) -> ApprovalResult<Rule> {
        self.validate_target(&new.model, &new.target)?;
        let rule = Rule {
            id: RuleId::new(),
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            model: new.model,
            target: new.target,
            domain: new.domain,
            level: new.level,
            exclusive_user: new.exclusive_user,
            approval_group: new.approval_group,
            users_to_notify: new.users_to_notify,
            active: true,
            created_at: Timestamp::now(),
        };
        let mut rules = self.write_rules()?;
        tracing::info!(rule = %rule, "approval rule created");
        rules.insert(rule.id, rule.clone());
        Ok(rule)
    }

    /// Apply a partial update.
    ///
    /// # Errors
    ///
    /// Returns an immutability error when the update touches `model`
    /// or `target` and the rule has existing entries, and a validation
    /// error when a new target is invalid.
    pub fn update(&self, id: RuleId, update: RuleUpdate) -> ApprovalResult<Rule> {
        if update.touches_frozen_fields() && self.entries.rule_has_entries(id) {
            return Err(ApprovalError::Immutability {
                rule: id,
                reason: "model and target are frozen; archive the rule instead".to_string(),
            });
        }
        let mut rules = self.write_rules()?;
        let rule = rules.get_mut(&id).ok_or_else(|| unknown_rule(id))?;

        let model = update.model.clone().unwrap_or_else(|| rule.model.clone());
        let target = update.target.clone().unwrap_or_else(|| rule.target.clone());
        if update.touches_frozen_fields() {
            self.validate_target(&model, &target)?;
        }

        rule.model = model;
        rule.target = target;
        if let Some(domain) = update.domain {
            rule.domain = domain;
        }
        if let Some(level) = update.level {
            rule.level = level;
        }
        if let Some(exclusive) = update.exclusive_user {
            rule.exclusive_user = exclusive;
        }
        if let Some(group) = update.approval_group {
            rule.approval_group = group;
        }
        if let Some(users) = update.users_to_notify {
            rule.users_to_notify = users;
        }
        Ok(rule.clone())
    }

    /// Archive a rule. Archived rules never apply but keep their
    /// entries.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown rules.
    pub fn archive(&self, id: RuleId) -> ApprovalResult<Rule> {
        self.set_active(id, false)
    }

    /// Put an archived rule back in force.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown rules.
    pub fn unarchive(&self, id: RuleId) -> ApprovalResult<Rule> {
        self.set_active(id, true)
    }

    /// Delete a rule.
    ///
    /// # Errors
    ///
    /// Returns an immutability error when the rule has existing
    /// entries — such rules may only be archived.
    pub fn delete(&self, id: RuleId) -> ApprovalResult<()> {
        if self.entries.rule_has_entries(id) {
            return Err(ApprovalError::Immutability {
                rule: id,
                reason: "rules with entries cannot be deleted".to_string(),
            });
        }
        let mut rules = self.write_rules()?;
        rules.remove(&id).ok_or_else(|| unknown_rule(id))?;
        tracing::info!(%id, "approval rule deleted");
        Ok(())
    }

    /// Look up a rule.
    #[must_use]
    pub fn get(&self, id: RuleId) -> Option<Rule> {
        self.rules.read().ok()?.get(&id).cloned()
    }

    /// Look up a rule, erroring on unknown ids.
    ///
    /// # Errors
    ///
    /// Returns a state error for unknown rules.
    pub fn get_required(&self, id: RuleId) -> ApprovalResult<Rule> {
        self.get(id).ok_or_else(|| unknown_rule(id))
    }

    /// Active rules governing `(model, target)`, in decision order:
    /// level ascending, exclusive first within a level, then creation
    /// order.
    #[must_use]
    pub fn rules_for(&self, model: &ModelName, target: &RuleTarget) -> Vec<Rule> {
        let Ok(rules) = self.rules.read() else {
            return Vec::new();
        };
        let mut matching: Vec<Rule> = rules
            .values()
            .filter(|r| r.active && &r.model == model && &r.target == target)
            .cloned()
            .collect();
        matching.sort_by_key(Rule::ordering_key);
        matching
    }

    /// Every `(model, method)` pair referenced by an active
    /// method-targeting rule. This is the set the interceptor patches.
    #[must_use]
    pub fn method_targets(&self) -> Vec<(ModelName, MethodName)> {
        let Ok(rules) = self.rules.read() else {
            return Vec::new();
        };
        let mut targets: Vec<(ModelName, MethodName)> = rules
            .values()
            .filter(|r| r.active)
            .filter_map(|r| {
                r.target
                    .method()
                    .map(|m| (r.model.clone(), m.clone()))
            })
            .collect();
        targets.sort();
        targets.dedup();
        targets
    }

    /// Number of rules (including archived).
    #[must_use]
    pub fn count(&self) -> usize {
        self.rules.read().map(|r| r.len()).unwrap_or(0)
    }

    /// Acquire the nowait lock serializing approvals on the rule set
    /// governing `(model, target)`. Released when the returned guard
    /// drops.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::LockContention`] when another approval
    /// holds the lock; the host's transaction runtime retries those.
    pub fn lock_target_nowait(
        &self,
        model: &ModelName,
        target: &RuleTarget,
        record: RecordId,
    ) -> ApprovalResult<TargetLock> {
        let flag = {
            let mut locks = self
                .locks
                .write()
                .map_err(|e| ApprovalError::Storage(e.to_string()))?;
            Arc::clone(
                locks
                    .entry((model.clone(), target.clone()))
                    .or_insert_with(|| Arc::new(AtomicBool::new(false))),
            )
        };
        if flag
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(ApprovalError::LockContention {
                model: model.clone(),
                record,
            });
        }
        Ok(TargetLock { flag })
    }

    fn set_active(&self, id: RuleId, active: bool) -> ApprovalResult<Rule> {
        let mut rules = self.write_rules()?;
        let rule = rules.get_mut(&id).ok_or_else(|| unknown_rule(id))?;
        rule.active = active;
        tracing::info!(rule = %rule, active, "approval rule archive state changed");
        Ok(rule.clone())
    }

    fn validate_target(&self, model: &ModelName, target: &RuleTarget) -> ApprovalResult<()> {
        if !self.registry.model_exists(model) {
            return Err(ApprovalError::Validation {
                reason: format!("unknown model {model}"),
            });
        }
        if let RuleTarget::Method(method) = target {
            if method.is_private() {
                return Err(ApprovalError::Validation {
                    reason: format!("{method} is private and cannot be gated"),
                });
            }
            if method.is_primitive() {
                return Err(ApprovalError::Validation {
                    reason: format!(
                        "{method} is a primitive persistence operation and cannot be gated"
                    ),
                });
            }
            if !self.registry.has_public_method(model, method) {
                return Err(ApprovalError::Validation {
                    reason: format!("{model} has no public method {method}"),
                });
            }
        }
        Ok(())
    }

    fn write_rules(&self) -> ApprovalResult<std::sync::RwLockWriteGuard<'_, HashMap<RuleId, Rule>>> {
        self.rules
            .write()
            .map_err(|e| ApprovalError::Storage(e.to_string()))
    }
}

impl fmt::Debug for RuleStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleStore")
            .field("count", &self.count())
            .finish_non_exhaustive()
    }
}

fn unknown_rule(id: RuleId) -> ApprovalError {
    ApprovalError::State {
        reason: format!("unknown rule {id}"),
    }
}

/// Guard over the rule set governing one `(model, target)` pair.
/// Dropping it releases the lock.
#[must_use = "the target lock is released when this guard drops"]
pub struct TargetLock {
    flag: Arc<AtomicBool>,
}

impl Drop for TargetLock {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl fmt::Debug for TargetLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetLock").finish_non_exhaustive()
    }
}
