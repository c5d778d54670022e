//! Well-known resource kinds
//!
//! Centralized enum for the built-in kinds the apply pipeline treats
//! specially (ordering, scoping, convergence checks). Everything else is
//! handled generically by its apiVersion/kind strings.

use std::fmt;
use std::str::FromStr;

/// Built-in kinds with special handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WellKnownKind {
    // Cluster-level
    Namespace,
    CustomResourceDefinition,
    ClusterRole,
    ClusterRoleBinding,
    PersistentVolume,
    StorageClass,
    PriorityClass,
    ApiService,
    MutatingWebhookConfiguration,
    ValidatingWebhookConfiguration,
    // Workloads
    Deployment,
    StatefulSet,
    DaemonSet,
    ReplicaSet,
    Job,
    CronJob,
    Pod,
    // Config and storage
    ConfigMap,
    Secret,
    Service,
    ServiceAccount,
    PersistentVolumeClaim,
}

impl WellKnownKind {
    /// Get the kind name as it appears in manifests
    pub fn as_str(&self) -> &'static str {
        match self {
            WellKnownKind::Namespace => "Namespace",
            WellKnownKind::CustomResourceDefinition => "CustomResourceDefinition",
            WellKnownKind::ClusterRole => "ClusterRole",
            WellKnownKind::ClusterRoleBinding => "ClusterRoleBinding",
            WellKnownKind::PersistentVolume => "PersistentVolume",
            WellKnownKind::StorageClass => "StorageClass",
            WellKnownKind::PriorityClass => "PriorityClass",
            WellKnownKind::ApiService => "APIService",
            WellKnownKind::MutatingWebhookConfiguration => "MutatingWebhookConfiguration",
            WellKnownKind::ValidatingWebhookConfiguration => "ValidatingWebhookConfiguration",
            WellKnownKind::Deployment => "Deployment",
            WellKnownKind::StatefulSet => "StatefulSet",
            WellKnownKind::DaemonSet => "DaemonSet",
            WellKnownKind::ReplicaSet => "ReplicaSet",
            WellKnownKind::Job => "Job",
            WellKnownKind::CronJob => "CronJob",
            WellKnownKind::Pod => "Pod",
            WellKnownKind::ConfigMap => "ConfigMap",
            WellKnownKind::Secret => "Secret",
            WellKnownKind::Service => "Service",
            WellKnownKind::ServiceAccount => "ServiceAccount",
            WellKnownKind::PersistentVolumeClaim => "PersistentVolumeClaim",
        }
    }

    /// Try to parse a kind, returning None for anything not built in
    pub fn parse_optional(s: &str) -> Option<Self> {
        s.parse().ok()
    }

    /// Kinds that never carry a namespace
    pub fn is_cluster_scoped(&self) -> bool {
        matches!(
            self,
            WellKnownKind::Namespace
                | WellKnownKind::CustomResourceDefinition
                | WellKnownKind::ClusterRole
                | WellKnownKind::ClusterRoleBinding
                | WellKnownKind::PersistentVolume
                | WellKnownKind::StorageClass
                | WellKnownKind::PriorityClass
                | WellKnownKind::ApiService
                | WellKnownKind::MutatingWebhookConfiguration
                | WellKnownKind::ValidatingWebhookConfiguration
        )
    }

    pub fn all() -> &'static [Self] {
        &[
            WellKnownKind::Namespace,
            WellKnownKind::CustomResourceDefinition,
            WellKnownKind::ClusterRole,
            WellKnownKind::ClusterRoleBinding,
            WellKnownKind::PersistentVolume,
            WellKnownKind::StorageClass,
            WellKnownKind::PriorityClass,
            WellKnownKind::ApiService,
            WellKnownKind::MutatingWebhookConfiguration,
            WellKnownKind::ValidatingWebhookConfiguration,
            WellKnownKind::Deployment,
            WellKnownKind::StatefulSet,
            WellKnownKind::DaemonSet,
            WellKnownKind::ReplicaSet,
            WellKnownKind::Job,
            WellKnownKind::CronJob,
            WellKnownKind::Pod,
            WellKnownKind::ConfigMap,
            WellKnownKind::Secret,
            WellKnownKind::Service,
            WellKnownKind::ServiceAccount,
            WellKnownKind::PersistentVolumeClaim,
        ]
    }
}

impl fmt::Display for WellKnownKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for WellKnownKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WellKnownKind::all()
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("Unknown kind: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_as_str_round_trips_through_from_str() {
        for kind in WellKnownKind::all() {
            assert_eq!(kind.as_str().parse::<WellKnownKind>(), Ok(*kind));
        }
    }

    #[test]
    fn test_parse_optional() {
        assert_eq!(
            WellKnownKind::parse_optional("APIService"),
            Some(WellKnownKind::ApiService)
        );
        assert_eq!(WellKnownKind::parse_optional("Widget"), None);
        // kinds are case sensitive in manifests
        assert_eq!(WellKnownKind::parse_optional("namespace"), None);
    }

    #[test]
    fn test_scope_helpers() {
        assert!(WellKnownKind::Namespace.is_cluster_scoped());
        assert!(WellKnownKind::CustomResourceDefinition.is_cluster_scoped());
        assert!(!WellKnownKind::ConfigMap.is_cluster_scoped());
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", WellKnownKind::PersistentVolumeClaim), "PersistentVolumeClaim");
    }
}
