//! Model layer
//!
//! Structure:
//! - `kind.rs` - Built-in kinds with special ordering/convergence handling
//! - `annotations.rs` - Annotation and label keys the engine reads or writes

pub mod annotations;
pub mod kind;

pub use kind::WellKnownKind;
