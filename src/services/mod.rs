//! Service layer for app operations
//!
//! This module sits between callers (the CLI or library users) and the
//! apply pipeline: it resolves the app record, calculates changes, applies
//! them and records the outcome.

pub mod app_service;
pub mod delete;
pub mod deploy;

pub use app_service::{AppService, apply_opts};
pub use delete::DeleteOutcome;
pub use deploy::{DeployOutcome, DeployPlan, op_counts, render_plan};
