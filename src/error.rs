//! Error types for the apply pipeline
//!
//! Every failure that reaches a caller of `deploy`/`delete` is one of these.
//! Configuration errors are always raised before the first remote mutation.

use std::time::Duration;

use crate::diff::ChangeOp;
use crate::store::StoreError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to parse manifest: {0}")]
    Parse(String),

    #[error("Invalid resource: {0}")]
    InvalidResource(String),

    #[error("Resource {0} is specified more than once")]
    DuplicateResource(String),

    #[error("Invalid label selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error(
        "Trying to apply empty set of resources will result in deletion of {existing} resource(s) on cluster. \
         Refusing to continue unless allowEmpty is set"
    )]
    EmptyResourceSet { existing: usize },

    #[error("Expected label '{key}' on {resource} to be '{expected}', but found '{found}'")]
    LabelConflict {
        resource: String,
        key: String,
        expected: String,
        found: String,
    },

    #[error("Resource {resource} is already associated with {owner}")]
    OwnershipConflict { resource: String, owner: String },

    #[error("Invalid change rule '{rule}' on {resource}: {reason}")]
    InvalidChangeRule {
        resource: String,
        rule: String,
        reason: String,
    },

    #[error("Found cycle in change graph between: {}", .changes.join(", "))]
    CyclicGraph { changes: Vec<String> },

    #[error("Listing resources: {0}")]
    RemoteList(#[source] StoreError),

    #[error("{op} {resource}: {source}")]
    Remote {
        op: String,
        resource: String,
        #[source]
        source: StoreError,
    },

    #[error("{op} {resource}: timed out after {timeout:?} waiting to converge")]
    ConvergenceTimeout {
        op: ChangeOp,
        resource: String,
        timeout: Duration,
    },

    #[error("{op} {resource}: {message}")]
    ConvergenceFailed {
        op: ChangeOp,
        resource: String,
        message: String,
    },

    #[error("{op} {resource}: API service for '{group_version}' is unavailable")]
    FailingApiService {
        op: ChangeOp,
        resource: String,
        group_version: String,
    },

    #[error("App record {app}: {reason}")]
    AppRecord { app: String, reason: String },
}

impl Error {
    /// Errors caused by the input rather than the cluster; retrying with
    /// corrected input fixes them.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::Parse(_)
                | Error::InvalidResource(_)
                | Error::DuplicateResource(_)
                | Error::InvalidSelector { .. }
                | Error::EmptyResourceSet { .. }
                | Error::LabelConflict { .. }
                | Error::OwnershipConflict { .. }
                | Error::InvalidChangeRule { .. }
                | Error::CyclicGraph { .. }
        )
    }

    /// Convergence timeouts can be re-polled instead of re-applied.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::ConvergenceTimeout { .. })
    }

    pub(crate) fn remote(op: impl Into<String>, resource: impl Into<String>, source: StoreError) -> Self {
        Error::Remote {
            op: op.into(),
            resource: resource.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_classification() {
        assert!(Error::EmptyResourceSet { existing: 2 }.is_configuration());
        assert!(
            Error::CyclicGraph {
                changes: vec!["a".into(), "b".into()]
            }
            .is_configuration()
        );
        assert!(!Error::RemoteList(StoreError::Unavailable("down".into())).is_configuration());
    }

    #[test]
    fn test_timeout_is_distinguishable() {
        let err = Error::ConvergenceTimeout {
            op: ChangeOp::Add,
            resource: "deployment/web (apps/v1) namespace: ns1".into(),
            timeout: Duration::from_secs(1),
        };
        assert!(err.is_timeout());
        assert!(!err.is_configuration());
        let msg = err.to_string();
        assert!(msg.starts_with("create deployment/web"));
    }

    #[test]
    fn test_cycle_message_lists_changes() {
        let err = Error::CyclicGraph {
            changes: vec!["create configmap/a".into(), "create configmap/b".into()],
        };
        assert_eq!(
            err.to_string(),
            "Found cycle in change graph between: create configmap/a, create configmap/b"
        );
    }
}
