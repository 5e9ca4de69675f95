//! Domain layer: entities and business logic
//!
//! This layer is independent of external concerns (no I/O, no CLI, no config loading).

pub mod answer;
pub mod builder;
pub mod entities;
pub mod error;
pub mod navigator;
pub mod store;

pub use answer::{AnswerParser, OracleAnswer};
pub use builder::{HierarchyBuilder, DEFAULT_MAX_LEAF_DEPTH};
pub use entities::*;
pub use error::DomainError;
pub use navigator::{CodeLevel, HierarchyNavigator};
pub use store::{HierarchyNode, HierarchyStore, StoreStats};
