//! Approval entries — recorded decisions.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;
use studio_core::{EntryId, ModelName, RecordId, RuleId, Timestamp, UserId};

use crate::error::{ApprovalError, ApprovalResult};
use crate::rule::Rule;

/// A decision for one rule on one record. Entries are immutable:
/// flipping a decision requires deleting the entry first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    /// Unique entry identifier.
    pub id: EntryId,
    /// The rule decided.
    pub rule: RuleId,
    /// The governed entity type (denormalized from the rule for
    /// lifecycle purges).
    pub model: ModelName,
    /// The record decided.
    pub record: RecordId,
    /// Who decided.
    pub user: UserId,
    /// The decision.
    pub approved: bool,
    /// When the decision was recorded.
    pub created_at: Timestamp,
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.approved { "approved" } else { "rejected" };
        write!(f, "{} {verdict} {} on {}{}", self.user, self.rule, self.model, self.record)
    }
}

/// In-memory store for approval entries.
///
/// Enforces the `(rule, record)` uniqueness constraint under a single
/// write lock.
pub struct EntryStore {
    entries: RwLock<HashMap<(RuleId, RecordId), Entry>>,
}

impl EntryStore {
    /// Create an empty entry store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Record a decision.
    ///
    /// # Errors
    ///
    /// Returns a conflict error when a decision already exists for
    /// `(rule, record)`.
    pub fn create(
        &self,
        rule: &Rule,
        record: RecordId,
        user: UserId,
        approved: bool,
    ) -> ApprovalResult<Entry> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| ApprovalError::Storage(e.to_string()))?;
        let key = (rule.id, record);
        if entries.contains_key(&key) {
            return Err(ApprovalError::Conflict {
                reason: format!("{} already has a decision for {record}", rule.id),
            });
        }
        let entry = Entry {
            id: EntryId::new(),
            rule: rule.id,
            model: rule.model.clone(),
            record,
            user,
            approved,
            created_at: Timestamp::now(),
        };
        tracing::info!(entry = %entry, "approval entry created");
        entries.insert(key, entry.clone());
        Ok(entry)
    }

    /// The decision for `(rule, record)`, if any.
    #[must_use]
    pub fn get(&self, rule: RuleId, record: RecordId) -> Option<Entry> {
        self.entries.read().ok()?.get(&(rule, record)).cloned()
    }

    /// Remove the decision for `(rule, record)`, returning it.
    #[must_use]
    pub fn remove(&self, rule: RuleId, record: RecordId) -> Option<Entry> {
        let mut entries = self.entries.write().ok()?;
        entries.remove(&(rule, record))
    }

    /// Batch lookup over rule and record sets.
    #[must_use]
    pub fn entries_for(&self, rules: &[RuleId], records: &[RecordId]) -> Vec<Entry> {
        let Ok(entries) = self.entries.read() else {
            return Vec::new();
        };
        entries
            .values()
            .filter(|e| rules.contains(&e.rule) && records.contains(&e.record))
            .cloned()
            .collect()
    }

    /// All decisions on one record of one entity type.
    #[must_use]
    pub fn entries_for_record(&self, model: &ModelName, record: RecordId) -> Vec<Entry> {
        let Ok(entries) = self.entries.read() else {
            return Vec::new();
        };
        entries
            .values()
            .filter(|e| &e.model == model && e.record == record)
            .cloned()
            .collect()
    }

    /// Decisions made by one user (the default, non-elevated view).
    #[must_use]
    pub fn entries_of_user(&self, user: &UserId) -> Vec<Entry> {
        let Ok(entries) = self.entries.read() else {
            return Vec::new();
        };
        entries.values().filter(|e| &e.user == user).cloned().collect()
    }

    /// Every decision in the store (the elevated view).
    #[must_use]
    pub fn all(&self) -> Vec<Entry> {
        self.entries
            .read()
            .map(|entries| entries.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether a rule has any entries (which freezes its target).
    #[must_use]
    pub fn rule_has_entries(&self, rule: RuleId) -> bool {
        self.entries
            .read()
            .map(|entries| entries.keys().any(|(r, _)| *r == rule))
            .unwrap_or(false)
    }

    /// Delete every decision on one record, returning how many were
    /// removed. Called by the lifecycle hook on state regressions.
    pub fn purge_record(&self, model: &ModelName, record: RecordId) -> usize {
        let Ok(mut entries) = self.entries.write() else {
            return 0;
        };
        let before = entries.len();
        entries.retain(|_, e| !(&e.model == model && e.record == record));
        before.saturating_sub(entries.len())
    }

    /// Number of entries in the store.
    #[must_use]
    pub fn count(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }
}

impl Default for EntryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EntryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryStore")
            .field("count", &self.count())
            .finish()
    }
}
