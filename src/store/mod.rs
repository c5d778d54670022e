//! Remote resource store
//!
//! The apply engine talks to the cluster only through [`ResourceStore`].
//! [`crate::kube::KubeStore`] implements it against a real API server,
//! [`MemoryStore`] in memory for tests and offline use.

mod memory;

pub use memory::{MemoryStore, StoreOp};

use async_trait::async_trait;

use crate::resources::{GroupVersion, LabelSelector, Resource, ResourceKey};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid: {0}")]
    Invalid(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Other(String),
}

impl StoreError {
    /// Conflicts, throttling and server timeouts go away on their own
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict(_) | StoreError::Unavailable(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// All resources matching the selector, across namespaces
    async fn list(&self, selector: &LabelSelector) -> Result<Vec<Resource>, StoreError>;

    async fn get(&self, key: &ResourceKey) -> Result<Option<Resource>, StoreError>;

    async fn create(&self, resource: &Resource) -> Result<Resource, StoreError>;

    /// Full replacement; a stale `metadata.resourceVersion` yields `Conflict`
    async fn update(&self, resource: &Resource) -> Result<Resource, StoreError>;

    /// Request deletion. The object may linger until finalizers complete.
    async fn delete(&self, key: &ResourceKey) -> Result<(), StoreError>;

    /// Group-versions whose serving API service is currently unavailable
    async fn failing_group_versions(&self) -> Result<Vec<GroupVersion>, StoreError>;
}
