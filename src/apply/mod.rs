//! Applying a change graph to the cluster
//!
//! - `change_set.rs` - batch execution with bounded concurrency
//! - `cluster_change.rs` - one change: submit, retry, replace, wait
//! - `converged.rs` - per-kind convergence checks
//! - `failing_api_services.rs` - refusal of changes behind unavailable APIs
//! - `events.rs` - progress events

pub mod change_set;
pub mod cluster_change;
pub mod converged;
pub mod events;
pub mod failing_api_services;

pub use change_set::{ApplyOpts, ApplySummary, ClusterChangeSet};
pub use cluster_change::{ChangeState, ClusterChange, UpdateStrategy, WaitPolicy};
pub use converged::Convergence;
pub use events::{ApplyEvent, EventSink};
pub use failing_api_services::FailingApiServicesPolicy;
