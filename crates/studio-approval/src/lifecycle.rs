//! Lifecycle purges.
//!
//! Approval entries describe a record in a given state; when the host
//! transitions the record back to an initial state, the entries no
//! longer describe anything and must go. Which transitions qualify is
//! declared once per entity type as [`RegressionRule`]s, loadable from
//! a TOML document:
//!
//! ```toml
//! [models.document]
//! regressions = [{ field = "state", to = "draft" }]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, RwLock};
use studio_core::ModelName;
use studio_host::{Automation, RegressionRule};

use crate::entry::EntryStore;
use crate::error::{ApprovalError, ApprovalResult};

/// The qualifying transitions of one entity type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelLifecycle {
    /// Transitions that regress a record to an initial state.
    #[serde(default)]
    pub regressions: Vec<RegressionRule>,
}

/// Per-entity-type lifecycle declarations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Declarations keyed by entity type name.
    #[serde(default)]
    pub models: HashMap<String, ModelLifecycle>,
}

impl LifecycleConfig {
    /// Parse a TOML lifecycle document.
    ///
    /// # Errors
    ///
    /// Returns a validation error for malformed TOML.
    pub fn from_toml_str(source: &str) -> ApprovalResult<Self> {
        toml::from_str(source).map_err(|e| ApprovalError::Validation {
            reason: format!("bad lifecycle config: {e}"),
        })
    }
}

/// Registers regression triggers with the host and purges entries
/// when they fire.
pub struct LifecycleHook {
    automation: Arc<dyn Automation>,
    entries: Arc<EntryStore>,
    registered: RwLock<HashSet<ModelName>>,
}

impl LifecycleHook {
    /// Create a hook over the host automation registry.
    #[must_use]
    pub fn new(automation: Arc<dyn Automation>, entries: Arc<EntryStore>) -> Self {
        Self {
            automation,
            entries,
            registered: RwLock::new(HashSet::new()),
        }
    }

    /// Register purge triggers for every entity type the config
    /// declares.
    ///
    /// # Errors
    ///
    /// Propagates host registration failures.
    pub fn register(&self, config: &LifecycleConfig) -> ApprovalResult<()> {
        for (name, lifecycle) in &config.models {
            if lifecycle.regressions.is_empty() {
                continue;
            }
            self.register_model(ModelName::from(name.as_str()), lifecycle.regressions.clone())?;
        }
        Ok(())
    }

    /// Register a purge trigger for one entity type.
    ///
    /// # Errors
    ///
    /// Propagates host registration failures.
    pub fn register_model(
        &self,
        model: ModelName,
        regressions: Vec<RegressionRule>,
    ) -> ApprovalResult<()> {
        let entries = Arc::clone(&self.entries);
        self.automation.register_regression(
            model.clone(),
            regressions,
            Arc::new(move |model, records| {
                for &record in records {
                    let purged = entries.purge_record(model, record);
                    if purged > 0 {
                        tracing::info!(%model, %record, purged, "entries purged on regression");
                    }
                }
            }),
        )?;
        if let Ok(mut registered) = self.registered.write() {
            registered.insert(model);
        }
        Ok(())
    }

    /// Remove every registered trigger.
    ///
    /// # Errors
    ///
    /// Propagates host failures.
    pub fn unregister(&self) -> ApprovalResult<()> {
        let models: Vec<ModelName> = self
            .registered
            .write()
            .map_err(|e| ApprovalError::Storage(e.to_string()))?
            .drain()
            .collect();
        for model in models {
            self.automation.unregister_regression(&model)?;
        }
        Ok(())
    }

    /// Entity types with a live trigger.
    #[must_use]
    pub fn registered_models(&self) -> Vec<ModelName> {
        self.registered
            .read()
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl fmt::Debug for LifecycleHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleHook")
            .field("registered", &self.registered_models())
            .finish_non_exhaustive()
    }
}
