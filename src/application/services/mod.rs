//! Application services
//!
//! Concrete service implementations that orchestrate domain logic.
//! Services depend on I/O boundary traits (FileSystem, DecisionOracle)
//! but are themselves concrete structs, not traits.

mod hierarchy;
mod retry;
mod traversal;

pub use hierarchy::{BuildOutput, HierarchyService};
pub use retry::{call_with_retry, RetryPolicy};
pub use traversal::{PendingQuestion, TraversalEngine, TraversalSettings};
