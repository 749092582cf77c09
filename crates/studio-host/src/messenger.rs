//! Message posting on records.

use serde::{Deserialize, Serialize};
use studio_core::{RecordRef, UserId};

use crate::error::HostResult;

/// A human-readable note to post on a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePost {
    /// Who the note is authored by.
    pub author: UserId,
    /// Users to notify about the note.
    pub recipients: Vec<UserId>,
    /// Rendered message body.
    pub body: String,
}

/// Host-provided message posting.
///
/// Posting on an entity type that does not support messaging is a
/// silent no-op, not an error — callers must never be blocked by a
/// missing chatter.
pub trait Messenger: Send + Sync {
    /// Post a note on a record.
    ///
    /// # Errors
    ///
    /// Returns an error only for real delivery failures; unsupported
    /// entity types return `Ok(())`.
    fn post(&self, record: &RecordRef, message: MessagePost) -> HostResult<()>;
}
