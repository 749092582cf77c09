//! Entity type registry and operation dispatch.
//!
//! The registry is the hook point the interceptor uses to gate
//! operations: [`EntityRegistry::replace_operation`] swaps the callable
//! registered under `(model, method)` for a wrapper and hands back the
//! original, which the interceptor keeps in its own patch map until the
//! patch is removed.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use studio_core::{MethodName, ModelName, RecordId};

use crate::error::HostResult;
use crate::session::Session;

/// One invocation of an entity operation on a recordset.
#[derive(Clone)]
pub struct OperationCall {
    /// The entity type being operated on.
    pub model: ModelName,
    /// The records the operation targets.
    pub records: Vec<RecordId>,
    /// Opaque host-side arguments, forwarded untouched.
    pub args: Value,
    /// The caller's execution context.
    pub session: Session,
}

impl OperationCall {
    /// Create a call with no extra arguments.
    #[must_use]
    pub fn new(model: ModelName, records: Vec<RecordId>, session: Session) -> Self {
        Self {
            model,
            records,
            args: Value::Null,
            session,
        }
    }

    /// Attach host-side arguments.
    #[must_use]
    pub fn with_args(mut self, args: Value) -> Self {
        self.args = args;
        self
    }

    /// Copy of this call narrowed to a subset of its records.
    #[must_use]
    pub fn narrowed(&self, records: Vec<RecordId>) -> Self {
        Self {
            model: self.model.clone(),
            records,
            args: self.args.clone(),
            session: self.session.clone(),
        }
    }
}

impl fmt::Debug for OperationCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationCall")
            .field("model", &self.model)
            .field("records", &self.records)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

/// A registered entity operation. Returns an opaque host value that
/// the host's UI layer knows how to render.
pub type OperationFn = Arc<dyn Fn(&OperationCall) -> HostResult<Value> + Send + Sync>;

/// Host-provided registry of entity types and their operations.
pub trait EntityRegistry: Send + Sync {
    /// Whether the entity type exists.
    fn model_exists(&self, model: &ModelName) -> bool;

    /// Whether `method` names a public callable declared on `model`.
    ///
    /// Private (underscore-prefixed) names are never public, whatever
    /// the registry holds.
    fn has_public_method(&self, model: &ModelName, method: &MethodName) -> bool;

    /// The callable currently registered under `(model, method)`.
    fn operation(&self, model: &ModelName, method: &MethodName) -> Option<OperationFn>;

    /// Atomically replace the callable registered under
    /// `(model, method)`, returning the one it displaces.
    ///
    /// # Errors
    ///
    /// Returns `UnknownOperation` when nothing is registered under the
    /// pair.
    fn replace_operation(
        &self,
        model: &ModelName,
        method: &MethodName,
        operation: OperationFn,
    ) -> HostResult<OperationFn>;
}
