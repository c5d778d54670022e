//! Kubernetes client module
//!
//! Handles connection to the Kubernetes API server and provides the
//! cluster-backed [`KubeStore`].
//!
//! HTTP/HTTPS proxies are honored through the standard `HTTPS_PROXY` /
//! `NO_PROXY` environment variables.

pub mod store;

pub use store::KubeStore;

use anyhow::{Context, Result};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};

use crate::config::KubeConfig;

/// Build a client from connection options
///
/// Without a kubeconfig path or context/cluster/user selection the default
/// loading strategy applies:
/// 1. In-cluster config (if running in a pod)
/// 2. KUBECONFIG environment variable
/// 3. ~/.kube/config
pub async fn create_client(opts: &KubeConfig) -> Result<Client> {
    let selection = KubeConfigOptions {
        context: opts.context.clone(),
        cluster: opts.cluster.clone(),
        user: opts.user.clone(),
    };
    let selected = selection.context.is_some() || selection.cluster.is_some() || selection.user.is_some();

    let mut config = match &opts.config_path {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .with_context(|| format!("Failed to read kubeconfig: {}", path.display()))?;
            Config::from_custom_kubeconfig(kubeconfig, &selection)
                .await
                .with_context(|| format!("Failed to load kubeconfig: {}", path.display()))?
        }
        None if selected => Config::from_kubeconfig(&selection)
            .await
            .context("Failed to load kubeconfig")?,
        None => Config::infer()
            .await
            .context("Failed to infer Kubernetes configuration")?,
    };

    if let Some(host) = &opts.host {
        config.cluster_url = host
            .parse()
            .with_context(|| format!("Invalid API server URL: {}", host))?;
    }
    if opts.insecure {
        tracing::warn!("TLS verification of the API server is disabled");
        config.accept_invalid_certs = true;
    }

    tracing::debug!("Connecting to {}", config.cluster_url);
    Client::try_from(config).context("Failed to create Kubernetes client")
}
