//! Access capability checks and group membership.

use std::collections::HashSet;
use studio_core::{GroupId, ModelName, RecordId, UserId};

use crate::error::HostResult;

/// Host-provided access control.
///
/// Checks raise ([`HostError::AccessDenied`](crate::HostError::AccessDenied))
/// rather than returning a boolean, so that call sites propagate the
/// host's own error message with `?`.
pub trait AccessChecker: Send + Sync {
    /// Verify the user may read the entity type, and the record when
    /// one is given (the record-less form backs rule-editor views that
    /// browse rules without a record).
    ///
    /// # Errors
    ///
    /// Returns `AccessDenied` when the capability is missing.
    fn check_read(&self, model: &ModelName, record: Option<RecordId>, user: &UserId)
    -> HostResult<()>;

    /// Verify the user may write the record.
    ///
    /// # Errors
    ///
    /// Returns `AccessDenied` when the capability is missing.
    fn check_write(&self, model: &ModelName, record: RecordId, user: &UserId) -> HostResult<()>;

    /// Members of a named group. Unknown groups are empty.
    fn group_members(&self, group: &GroupId) -> HashSet<UserId>;
}
