//! kapply library
//!
//! Declarative apply engine: reconciles a desired set of Kubernetes resources
//! against the live state of a cluster. The pipeline is
//! parse → label → diff → order → apply/wait → record history.
//!
//! The binary is a thin CLI over [`services::AppService`]; everything else can
//! be used as a library (tests drive it against [`store::MemoryStore`]).

pub mod app;
pub mod apply;
pub mod config;
pub mod diff;
pub mod diffgraph;
pub mod error;
pub mod kube;
pub mod models;
pub mod resources;
pub mod services;
pub mod store;

// Re-export commonly used types for convenience
pub use apply::{ApplyEvent, EventSink};
pub use error::{Error, Result};
pub use resources::{LabelSelector, Resource, ResourceKey};
pub use services::{AppService, DeleteOutcome, DeployOutcome};
pub use store::{MemoryStore, ResourceStore, StoreError};
