//! Prelude module - commonly used types for convenient import.
//!
//! Use `use studio_core::prelude::*;` to import all foundation types.

pub use crate::types::{
    ActionId, EntryId, GroupId, Level, MethodName, ModelName, RecordId, RecordRef, RequestId,
    RuleId, Timestamp, UserId,
};
