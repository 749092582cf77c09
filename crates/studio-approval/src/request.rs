//! Outstanding approval requests.
//!
//! A request is an open "please approve" for one rule on one record,
//! paired with the host activities scheduled for the approvers. One
//! request row exists per `(rule, record)` whatever the number of
//! approvers; creating it again is a no-op.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use studio_core::{RecordId, RequestId, RuleId, Timestamp};
use studio_host::{ActivityHandle, ActivityScheduler};

use crate::error::{ApprovalError, ApprovalResult};

/// An outstanding approval ask.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingRequest {
    /// Unique request identifier.
    pub id: RequestId,
    /// The rule awaiting a decision.
    pub rule: RuleId,
    /// The record awaiting a decision.
    pub record: RecordId,
    /// The host activities scheduled for the approvers.
    pub activities: Vec<ActivityHandle>,
    /// When the ask was created.
    pub created_at: Timestamp,
}

impl fmt::Display for PendingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} awaiting {} on {} ({} activities)",
            self.id,
            self.rule,
            self.record,
            self.activities.len()
        )
    }
}

/// In-memory store for outstanding requests. Holds the activity
/// scheduler so deletion can cancel the paired activities.
pub struct RequestStore {
    scheduler: Arc<dyn ActivityScheduler>,
    requests: RwLock<HashMap<(RuleId, RecordId), PendingRequest>>,
}

impl RequestStore {
    /// Create an empty request store.
    #[must_use]
    pub fn new(scheduler: Arc<dyn ActivityScheduler>) -> Self {
        Self {
            scheduler,
            requests: RwLock::new(HashMap::new()),
        }
    }

    /// Record an outstanding ask. Idempotent: when a request already
    /// exists for `(rule, record)` nothing is created and `false` is
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the internal lock is poisoned.
    pub fn create(
        &self,
        rule: RuleId,
        record: RecordId,
        activities: Vec<ActivityHandle>,
    ) -> ApprovalResult<bool> {
        let mut requests = self
            .requests
            .write()
            .map_err(|e| ApprovalError::Storage(e.to_string()))?;
        if requests.contains_key(&(rule, record)) {
            return Ok(false);
        }
        let request = PendingRequest {
            id: RequestId::new(),
            rule,
            record,
            activities,
            created_at: Timestamp::now(),
        };
        tracing::debug!(request = %request, "approval request created");
        requests.insert((rule, record), request);
        Ok(true)
    }

    /// Whether an ask is outstanding for `(rule, record)`.
    #[must_use]
    pub fn has(&self, rule: RuleId, record: RecordId) -> bool {
        self.requests
            .read()
            .map(|r| r.contains_key(&(rule, record)))
            .unwrap_or(false)
    }

    /// The outstanding ask for `(rule, record)`, if any.
    #[must_use]
    pub fn get(&self, rule: RuleId, record: RecordId) -> Option<PendingRequest> {
        self.requests.read().ok()?.get(&(rule, record)).cloned()
    }

    /// Delete the ask for `(rule, record)` and cancel its paired
    /// activities. Returns how many requests were removed (0 or 1).
    pub fn delete(&self, rule: RuleId, record: RecordId) -> usize {
        let removed = {
            let Ok(mut requests) = self.requests.write() else {
                return 0;
            };
            requests.remove(&(rule, record))
        };
        match removed {
            Some(request) => {
                for handle in &request.activities {
                    if let Err(e) = self.scheduler.cancel(handle) {
                        tracing::warn!(%handle, "failed to cancel approval activity: {e}");
                    }
                }
                1
            },
            None => 0,
        }
    }

    /// Number of outstanding asks.
    #[must_use]
    pub fn count(&self) -> usize {
        self.requests.read().map(|r| r.len()).unwrap_or(0)
    }

    /// All outstanding asks for one record.
    #[must_use]
    pub fn for_record(&self, record: RecordId) -> Vec<PendingRequest> {
        let Ok(requests) = self.requests.read() else {
            return Vec::new();
        };
        requests
            .values()
            .filter(|r| r.record == record)
            .cloned()
            .collect()
    }
}

impl fmt::Debug for RequestStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestStore")
            .field("count", &self.count())
            .finish_non_exhaustive()
    }
}
