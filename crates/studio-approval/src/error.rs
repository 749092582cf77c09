use studio_core::{ModelName, RecordId, RuleId};
use studio_host::HostError;

/// Errors surfaced by the approval engine.
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    /// A rule definition is invalid (bad target, private or primitive
    /// method, unknown model or method, level out of range).
    #[error("invalid rule: {reason}")]
    Validation {
        /// Human-readable reason.
        reason: String,
    },

    /// A rule with existing entries was edited or deleted on a frozen
    /// field.
    #[error("rule {rule} has existing entries: {reason}")]
    Immutability {
        /// The frozen rule.
        rule: RuleId,
        /// Human-readable reason.
        reason: String,
    },

    /// The caller lacks a required capability or is not an approver.
    #[error("not allowed: {reason}")]
    Permission {
        /// Human-readable reason.
        reason: String,
    },

    /// A decision already exists, or an exclusive-approver constraint
    /// would be bypassed.
    #[error("conflicting approval: {reason}")]
    Conflict {
        /// Human-readable reason.
        reason: String,
    },

    /// An entry deletion or state change is not permitted from the
    /// current state.
    #[error("invalid state: {reason}")]
    State {
        /// Human-readable reason.
        reason: String,
    },

    /// The nowait lock over the governing rule set could not be
    /// acquired. The host's transaction runtime retries these.
    #[error("rules for {model}{record} are locked by a concurrent approval")]
    LockContention {
        /// The governed entity type.
        model: ModelName,
        /// The record being decided.
        record: RecordId,
    },

    /// A host collaborator failed.
    #[error("host error: {0}")]
    Host(#[from] HostError),

    /// Engine storage error (lock poisoned).
    #[error("storage error: {0}")]
    Storage(String),
}

impl ApprovalError {
    /// Whether the error is one a pending Request should be created
    /// for: the caller simply cannot decide this rule right now, but
    /// someone else can.
    #[must_use]
    pub fn is_approval_blocker(&self) -> bool {
        matches!(
            self,
            Self::Permission { .. } | Self::Conflict { .. } | Self::State { .. }
        )
    }

    /// Fold a host capability check into the engine taxonomy: access
    /// denials become permission errors, anything else stays a host
    /// error.
    #[must_use]
    pub fn from_capability(err: HostError) -> Self {
        match err {
            HostError::AccessDenied { reason } => Self::Permission { reason },
            other => Self::Host(other),
        }
    }
}

/// Result type for approval operations.
pub type ApprovalResult<T> = Result<T, ApprovalError>;
