//! Activity scheduling — the host's task/reminder objects.

use serde::{Deserialize, Serialize};
use std::fmt;
use studio_core::{RecordRef, UserId};
use uuid::Uuid;

use crate::error::HostResult;

/// Activity type used for approval asks.
pub const GRANT_APPROVAL: &str = "grant_approval";

/// Opaque handle to a scheduled host activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActivityHandle(pub Uuid);

impl ActivityHandle {
    /// Create a new random handle.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ActivityHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActivityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "activity:{}", &self.0.to_string()[..8])
    }
}

/// What to schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRequest {
    /// Activity type (for approval asks, [`GRANT_APPROVAL`]).
    pub kind: String,
    /// The user the activity is assigned to.
    pub user: UserId,
    /// The record the activity is attached to.
    pub record: RecordRef,
    /// Short human-readable summary.
    pub summary: String,
}

impl ActivityRequest {
    /// Create a grant-approval activity request.
    #[must_use]
    pub fn grant_approval(user: UserId, record: RecordRef, summary: impl Into<String>) -> Self {
        Self {
            kind: GRANT_APPROVAL.to_string(),
            user,
            record,
            summary: summary.into(),
        }
    }
}

/// Host-provided activity store.
pub trait ActivityScheduler: Send + Sync {
    /// Schedule an activity, returning its handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the activity cannot be created.
    fn schedule(&self, request: ActivityRequest) -> HostResult<ActivityHandle>;

    /// Cancel a previously scheduled activity. Cancelling an unknown
    /// handle is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the host activity store fails.
    fn cancel(&self, handle: &ActivityHandle) -> HostResult<()>;
}
