//! Change calculation
//!
//! Structural diffs are computed with `json-patch`; this module decides what
//! is compared and turns the result into [`Change`]s.

pub mod change;
pub mod change_set;
pub mod rebase;

pub use change::{Change, ChangeFactory, ChangeOp};
pub use change_set::{ChangeSet, ChangeSetOpts};
