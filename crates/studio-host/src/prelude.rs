//! Prelude module - commonly used types for convenient import.

pub use crate::access::AccessChecker;
pub use crate::activity::{ActivityHandle, ActivityRequest, ActivityScheduler};
pub use crate::automation::{Automation, RegressionCallback, RegressionRule};
pub use crate::error::{HostError, HostResult};
pub use crate::memory::MemoryHost;
pub use crate::messenger::{MessagePost, Messenger};
pub use crate::predicate::{Predicate, PredicateEvaluator};
pub use crate::registry::{EntityRegistry, OperationCall, OperationFn};
pub use crate::session::Session;
