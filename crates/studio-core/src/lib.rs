//! Studio Core - Foundation types for the Studio approval engine.
//!
//! This crate provides the identifier newtypes and small value types
//! shared by the host interface and the approval engine:
//!
//! - Entity addressing: [`ModelName`], [`RecordId`], [`RecordRef`]
//! - Operation targets: [`MethodName`], [`ActionId`]
//! - Principals: [`UserId`], [`GroupId`]
//! - Engine record ids: [`RuleId`], [`EntryId`], [`RequestId`]
//! - Ordering: [`Level`] (approval waves, 1..=9)
//! - Time: [`Timestamp`]

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod prelude;
pub mod types;

pub use types::{
    ActionId, EntryId, GroupId, InvalidLevel, Level, MethodName, ModelName, RecordId, RecordRef,
    RequestId, RuleId, Timestamp, UserId,
};
