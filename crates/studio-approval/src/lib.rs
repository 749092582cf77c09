//! Studio Approval - a declarative multi-step approval engine.
//!
//! Administrators declare [`Rule`]s gating business operations: one
//! public method or host action on one entity type, optionally scoped
//! to the records matching a predicate, ordered into waves by
//! [`Level`](studio_core::Level). The [`MethodInterceptor`] patches
//! the gated methods on the host's registry so every non-elevated call
//! runs through [`ApprovalEngine::check_approval`] first: rules the
//! caller may decide are auto-approved, the rest are solicited from
//! their effective approvers through the host's activity store, and
//! the call proceeds only on the records every applicable rule has
//! approved.
//!
//! Decisions are [`Entry`] rows, unique per `(rule, record)` and
//! immutable until deleted. Approval rights live in the
//! [`ApproverLog`], which supports time-bounded delegation and keeps a
//! human-readable audit trail. The [`LifecycleHook`] purges entries
//! when a record regresses to an initial state.
//!
//! [`ApprovalService`] assembles the whole engine over one set of
//! [`HostCapabilities`]:
//!
//! ```
//! use std::sync::Arc;
//! use serde_json::json;
//! use studio_approval::prelude::*;
//! use studio_core::{ModelName, MethodName, RecordId, UserId};
//! use studio_host::{MemoryHost, Session};
//!
//! let host = Arc::new(MemoryHost::new());
//! let model = ModelName::from("document");
//! host.add_model(model.clone());
//! host.insert_record(&model, RecordId(1), json!({"state": "posted"}));
//! host.register_operation(&model, &MethodName::from("validate"),
//!     Arc::new(|_| Ok(json!("validated"))));
//!
//! let service = ApprovalService::new(HostCapabilities::from_host(host));
//! let rule = service
//!     .create_rule(NewRule::method(model, MethodName::from("validate")))
//!     .unwrap();
//!
//! let approver = UserId::new();
//! let admin = Session::user(UserId::new());
//! service.set_approvers(&admin, rule.id, vec![approver]).unwrap();
//! let entry = service
//!     .set_approval(&Session::user(approver), rule.id, RecordId(1), true)
//!     .unwrap();
//! assert!(entry.approved);
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod approver;
pub mod engine;
pub mod entry;
/// Error taxonomy and result alias for approval operations.
pub mod error;
pub mod interceptor;
pub mod lifecycle;
pub mod notify;
pub mod prelude;
pub mod request;
pub mod rule;
pub mod service;
pub mod spec;

pub use approver::{ApproverGrant, ApproverLog, AuditMessage};
pub use engine::{ApprovalEngine, ApprovalVerdict};
pub use entry::{Entry, EntryStore};
pub use error::{ApprovalError, ApprovalResult};
pub use interceptor::{BlockedRecord, GateDiagnostic, MethodInterceptor, MissingApproval};
pub use lifecycle::{LifecycleConfig, LifecycleHook, ModelLifecycle};
pub use notify::NotificationAdapter;
pub use request::{PendingRequest, RequestStore};
pub use rule::{NewRule, Rule, RuleStore, RuleTarget, RuleUpdate, TargetLock};
pub use service::{ApprovalService, HostCapabilities};
pub use spec::{ApprovalSpec, RuleSnapshot, SpecRequest, SpecSlot};
