//! Dependency ordering of changes
//!
//! - `rules.rs` - `change-group` / `change-rule` annotations
//! - `graph.rs` - [`ChangeGraph`] construction and batching

pub mod graph;
pub mod rules;

pub use graph::{ChangeGraph, EdgeKind};
pub use rules::{ChangeRule, RuleAction, RuleOrder};
