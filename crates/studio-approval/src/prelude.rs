//! Prelude module - commonly used types for convenient import.

pub use crate::approver::{ApproverGrant, ApproverLog};
pub use crate::engine::{ApprovalEngine, ApprovalVerdict};
pub use crate::entry::{Entry, EntryStore};
pub use crate::error::{ApprovalError, ApprovalResult};
pub use crate::interceptor::{GateDiagnostic, MethodInterceptor};
pub use crate::lifecycle::{LifecycleConfig, LifecycleHook};
pub use crate::request::{PendingRequest, RequestStore};
pub use crate::rule::{NewRule, Rule, RuleStore, RuleTarget, RuleUpdate};
pub use crate::service::{ApprovalService, HostCapabilities};
pub use crate::spec::{ApprovalSpec, SpecRequest};
