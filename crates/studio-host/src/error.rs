use studio_core::{MethodName, ModelName, RecordId};

/// Errors surfaced by host collaborators.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// The named entity type is not registered.
    #[error("unknown model: {model}")]
    UnknownModel {
        /// The entity type that was looked up.
        model: ModelName,
    },

    /// The named operation does not exist on the entity type.
    #[error("unknown operation {method} on {model}")]
    UnknownOperation {
        /// The entity type.
        model: ModelName,
        /// The operation that was looked up.
        method: MethodName,
    },

    /// The record does not exist.
    #[error("record {model}{record} not found")]
    RecordNotFound {
        /// The entity type.
        model: ModelName,
        /// The missing record.
        record: RecordId,
    },

    /// The caller lacks the required capability on the record.
    #[error("access denied: {reason}")]
    AccessDenied {
        /// Human-readable reason.
        reason: String,
    },

    /// The serialized predicate could not be evaluated.
    #[error("predicate error: {reason}")]
    Predicate {
        /// Human-readable reason.
        reason: String,
    },

    /// Activity scheduling or cancellation failed.
    #[error("activity error: {reason}")]
    Activity {
        /// Human-readable reason.
        reason: String,
    },

    /// Message posting failed (distinct from the entity type simply not
    /// supporting messaging, which is a silent no-op).
    #[error("messaging error: {reason}")]
    Messaging {
        /// Human-readable reason.
        reason: String,
    },

    /// A row-level lock could not be acquired. The host's transaction
    /// runtime retries the whole call when it sees this.
    #[error("transaction conflict: {reason}")]
    TransactionConflict {
        /// Human-readable reason.
        reason: String,
    },

    /// Host storage error (lock poisoned, persistence failed, etc.).
    #[error("host storage error: {0}")]
    Storage(String),
}

/// Result type for host operations.
pub type HostResult<T> = Result<T, HostError>;
