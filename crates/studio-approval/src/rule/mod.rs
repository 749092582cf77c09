//! Approval rules — declarative gates on entity operations.
//!
//! A [`Rule`] gates exactly one operation (a public method or a host
//! action) on one entity type, optionally scoped to the records
//! matching a serialized predicate. Rules are ordered into waves by
//! [`Level`]; an `exclusive_user` rule additionally forbids its
//! approver from satisfying any other rule on the same record.

mod store;

pub use store::{RuleStore, TargetLock};

use serde::{Deserialize, Serialize};
use std::fmt;
use studio_core::{ActionId, GroupId, Level, MethodName, ModelName, RuleId, Timestamp, UserId};
use studio_host::Predicate;

use crate::error::{ApprovalError, ApprovalResult};

/// The operation a rule gates: exactly one of a method name or an
/// action id. The two-optional-fields wire form used by hosts is
/// converted through [`RuleTarget::from_parts`], which rejects
/// both-set and neither-set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleTarget {
    /// A public method of the entity type.
    Method(MethodName),
    /// A host-side action.
    Action(ActionId),
}

impl RuleTarget {
    /// Build a target from the host's optional pair form.
    ///
    /// # Errors
    ///
    /// Returns a validation error unless exactly one of the two is set.
    pub fn from_parts(
        method: Option<MethodName>,
        action: Option<ActionId>,
    ) -> ApprovalResult<Self> {
        match (method, action) {
            (Some(method), None) => Ok(Self::Method(method)),
            (None, Some(action)) => Ok(Self::Action(action)),
            (Some(_), Some(_)) => Err(ApprovalError::Validation {
                reason: "a rule targets either a method or an action, not both".to_string(),
            }),
            (None, None) => Err(ApprovalError::Validation {
                reason: "a rule must target a method or an action".to_string(),
            }),
        }
    }

    /// The method name, when this targets a method.
    #[must_use]
    pub fn method(&self) -> Option<&MethodName> {
        match self {
            Self::Method(m) => Some(m),
            Self::Action(_) => None,
        }
    }

    /// The action id, when this targets an action.
    #[must_use]
    pub fn action(&self) -> Option<ActionId> {
        match self {
            Self::Method(_) => None,
            Self::Action(a) => Some(*a),
        }
    }
}

impl fmt::Display for RuleTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Method(m) => write!(f, "{m}()"),
            Self::Action(a) => write!(f, "{a}"),
        }
    }
}

/// A declarative approval gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    /// Unique rule identifier.
    pub id: RuleId,
    /// Store-assigned monotonic sequence, used as the final ordering
    /// tie-break.
    pub seq: u64,
    /// The entity type the rule governs.
    pub model: ModelName,
    /// The gated operation.
    pub target: RuleTarget,
    /// Optional record predicate; a rule without one applies to every
    /// record of the model.
    pub domain: Option<Predicate>,
    /// Approval wave.
    pub level: Level,
    /// Whether this rule's approver is barred from approving any other
    /// rule on the same record.
    pub exclusive_user: bool,
    /// Optional group whose members may approve in addition to the
    /// explicit approvers.
    pub approval_group: Option<GroupId>,
    /// Recipients of post-decision notifications.
    pub users_to_notify: Vec<UserId>,
    /// Archived rules never apply but keep their entries.
    pub active: bool,
    /// When the rule was created.
    pub created_at: Timestamp,
}

impl Rule {
    /// Sort key: level ascending, exclusive rules first within a
    /// level, then creation order.
    #[must_use]
    pub fn ordering_key(&self) -> (Level, bool, u64) {
        (self.level, !self.exclusive_user, self.seq)
    }

    /// One-line description used in activities and messages.
    #[must_use]
    pub fn describe(&self) -> String {
        format!("{} on {}/{}", self.level, self.model, self.target)
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.id, self.describe())
    }
}

/// Definition of a rule to create.
#[derive(Debug, Clone)]
pub struct NewRule {
    /// The entity type to govern.
    pub model: ModelName,
    /// The operation to gate.
    pub target: RuleTarget,
    /// Optional record predicate.
    pub domain: Option<Predicate>,
    /// Approval wave (defaults to [`Level::MIN`]).
    pub level: Level,
    /// Exclusive-approver flag.
    pub exclusive_user: bool,
    /// Optional approval group.
    pub approval_group: Option<GroupId>,
    /// Post-decision notification recipients.
    pub users_to_notify: Vec<UserId>,
}

impl NewRule {
    /// Gate a method.
    #[must_use]
    pub fn method(model: ModelName, method: MethodName) -> Self {
        Self::new(model, RuleTarget::Method(method))
    }

    /// Gate an action.
    #[must_use]
    pub fn action(model: ModelName, action: ActionId) -> Self {
        Self::new(model, RuleTarget::Action(action))
    }

    fn new(model: ModelName, target: RuleTarget) -> Self {
        Self {
            model,
            target,
            domain: None,
            level: Level::MIN,
            exclusive_user: false,
            approval_group: None,
            users_to_notify: Vec::new(),
        }
    }

    /// Scope the rule to records matching a predicate.
    #[must_use]
    pub fn with_domain(mut self, domain: Predicate) -> Self {
        self.domain = Some(domain);
        self
    }

    /// Set the approval wave.
    #[must_use]
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Mark the rule exclusive-approver.
    #[must_use]
    pub fn exclusive(mut self) -> Self {
        self.exclusive_user = true;
        self
    }

    /// Allow a group's members to approve.
    #[must_use]
    pub fn with_group(mut self, group: GroupId) -> Self {
        self.approval_group = Some(group);
        self
    }

    /// Notify these users after each decision.
    #[must_use]
    pub fn notify(mut self, users: impl IntoIterator<Item = UserId>) -> Self {
        self.users_to_notify = users.into_iter().collect();
        self
    }
}

/// A partial update of a rule. Target fields (`model`, `target`) are
/// frozen once the rule has entries.
#[derive(Debug, Clone, Default)]
pub struct RuleUpdate {
    /// Re-target the rule to a different entity type.
    pub model: Option<ModelName>,
    /// Re-target the rule to a different operation.
    pub target: Option<RuleTarget>,
    /// Replace the domain (`Some(None)` clears it).
    pub domain: Option<Option<Predicate>>,
    /// Change the approval wave.
    pub level: Option<Level>,
    /// Change the exclusive-approver flag.
    pub exclusive_user: Option<bool>,
    /// Replace the approval group (`Some(None)` clears it).
    pub approval_group: Option<Option<GroupId>>,
    /// Replace the notification recipients.
    pub users_to_notify: Option<Vec<UserId>>,
}

impl RuleUpdate {
    /// An empty update.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-target to a different entity type.
    #[must_use]
    pub fn set_model(mut self, model: ModelName) -> Self {
        self.model = Some(model);
        self
    }

    /// Re-target to a different operation.
    #[must_use]
    pub fn set_target(mut self, target: RuleTarget) -> Self {
        self.target = Some(target);
        self
    }

    /// Replace the domain.
    #[must_use]
    pub fn set_domain(mut self, domain: Option<Predicate>) -> Self {
        self.domain = Some(domain);
        self
    }

    /// Change the approval wave.
    #[must_use]
    pub fn set_level(mut self, level: Level) -> Self {
        self.level = Some(level);
        self
    }

    /// Change the exclusive-approver flag.
    #[must_use]
    pub fn set_exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive_user = Some(exclusive);
        self
    }

    /// Replace the approval group.
    #[must_use]
    pub fn set_group(mut self, group: Option<GroupId>) -> Self {
        self.approval_group = Some(group);
        self
    }

    /// Replace the notification recipients.
    #[must_use]
    pub fn set_notify(mut self, users: Vec<UserId>) -> Self {
        self.users_to_notify = Some(users);
        self
    }

    /// Whether the update touches fields frozen by existing entries.
    #[must_use]
    pub fn touches_frozen_fields(&self) -> bool {
        self.model.is_some() || self.target.is_some()
    }
}
