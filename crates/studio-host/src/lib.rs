//! Studio Host - the narrow capability interface between the approval
//! engine and its host application.
//!
//! The engine never talks to the host's ORM, view layer, or RPC stack
//! directly. Everything it needs is expressed as a small set of
//! object-safe traits:
//!
//! - [`EntityRegistry`]: look up entity types, introspect their public
//!   operations, and swap a named operation for a gated wrapper.
//! - [`PredicateEvaluator`]: decide whether a record matches a
//!   serialized record predicate ([`Predicate`]). The predicate
//!   language itself stays opaque to the engine.
//! - [`AccessChecker`]: read/write capability checks and group
//!   membership.
//! - [`ActivityScheduler`]: schedule and cancel the host's
//!   task/reminder objects backing approval requests.
//! - [`Messenger`]: post human-readable notes on records that support
//!   messaging (no-op otherwise).
//! - [`Automation`]: register per-entity-type triggers that fire when a
//!   record regresses to an initial state.
//!
//! [`Session`] is the per-call execution context: current user, current
//! date in the caller's timezone, and the elevated-context flag.
//!
//! [`MemoryHost`] is a complete in-memory implementation of all of the
//! above, used by the engine's unit and scenario tests.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod access;
pub mod activity;
pub mod automation;
/// Error types and results for host operations.
pub mod error;
pub mod memory;
pub mod messenger;
pub mod predicate;
pub mod prelude;
pub mod registry;
pub mod session;

pub use access::AccessChecker;
pub use activity::{ActivityHandle, ActivityRequest, ActivityScheduler, GRANT_APPROVAL};
pub use automation::{Automation, RegressionCallback, RegressionRule};
pub use error::{HostError, HostResult};
pub use memory::MemoryHost;
pub use messenger::{MessagePost, Messenger};
pub use predicate::{Predicate, PredicateEvaluator};
pub use registry::{EntityRegistry, OperationCall, OperationFn};
pub use session::Session;
