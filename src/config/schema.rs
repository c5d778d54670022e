//! Configuration schema definitions
//!
//! Defines the structure of configuration files using serde for serialization.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::apply::UpdateStrategy;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// How changes are applied and waited on
    #[serde(default)]
    pub apply: ApplyConfig,

    /// Ownership labeling of resources
    #[serde(default)]
    pub ownership: OwnershipConfig,

    /// History retention
    #[serde(default)]
    pub history: HistoryConfig,

    /// Allow an empty manifest to delete every resource of an app
    #[serde(default = "default_false")]
    pub allow_empty: bool,

    /// Apply changes even when an API service they depend on is failing
    #[serde(default = "default_false")]
    pub ignore_failing_api_services: bool,

    /// Cluster connection
    #[serde(default)]
    pub kube: KubeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApplyConfig {
    /// Changes applied at once within a batch
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Seconds between convergence checks
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,

    /// Seconds a change may take to converge
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries of transient failures per change
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Wait for changes to converge
    #[serde(default = "default_true")]
    pub wait: bool,

    /// Apply changes of resources annotated with ignore-changes
    #[serde(default = "default_false")]
    pub apply_ignored: bool,

    /// Wait on ignored changes that were applied
    #[serde(default = "default_false")]
    pub wait_ignored: bool,

    /// Diff against the last applied configuration instead of the live object
    #[serde(default = "default_true")]
    pub against_last_applied: bool,

    #[serde(default)]
    pub default_update_strategy: UpdateStrategy,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct OwnershipConfig {
    /// Take over resources owned by other apps instead of failing
    #[serde(default = "default_false")]
    pub skip_ownership_check: bool,

    /// Labels stamped on every resource next to the ownership label
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryConfig {
    /// History entries kept per app
    #[serde(default = "default_retention")]
    pub retention: usize,
}

/// Cluster connection options; unset fields fall back to the kubeconfig
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct KubeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Overrides the API server URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Skip TLS verification of the API server
    #[serde(default = "default_false")]
    pub insecure: bool,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_false() -> bool {
    false
}

fn default_concurrency() -> usize {
    5
}

fn default_check_interval_secs() -> u64 {
    5
}

fn default_timeout_secs() -> u64 {
    900
}

fn default_max_retries() -> usize {
    3
}

fn default_retention() -> usize {
    200
}

impl Default for Config {
    fn default() -> Self {
        Self {
            apply: ApplyConfig::default(),
            ownership: OwnershipConfig::default(),
            history: HistoryConfig::default(),
            allow_empty: default_false(),
            ignore_failing_api_services: default_false(),
            kube: KubeConfig::default(),
        }
    }
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            check_interval_secs: default_check_interval_secs(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            wait: default_true(),
            apply_ignored: default_false(),
            wait_ignored: default_false(),
            against_last_applied: default_true(),
            default_update_strategy: UpdateStrategy::default(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            retention: default_retention(),
        }
    }
}
