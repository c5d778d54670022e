//! Entry point for operations on apps
//!
//! `AppService` ties a store, configuration and an optional event sink
//! together. Deploy and delete live in `deploy.rs` and `delete.rs`.

use std::sync::Arc;
use std::time::Duration;

use crate::app::App;
use crate::apply::{ApplyOpts, EventSink, WaitPolicy};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::resources::{LabeledResources, Resource, ResourceFilter};
use crate::store::ResourceStore;

/// Operations on apps backed by a [`ResourceStore`]
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use kapply::{AppService, MemoryStore};
/// use kapply::config::Config;
///
/// # async fn example() -> kapply::Result<()> {
/// let service = AppService::new(Arc::new(MemoryStore::new()), Config::default());
/// let manifest = b"apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: settings\n";
/// let outcome = service.deploy("web", "default", manifest).await?;
/// assert!(!outcome.no_changes);
/// # Ok(())
/// # }
/// ```
pub struct AppService {
    pub(crate) store: Arc<dyn ResourceStore>,
    pub(crate) config: Config,
    pub(crate) events: EventSink,
    pub(crate) filter: ResourceFilter,
    pub(crate) apply_opts: ApplyOpts,
}

impl AppService {
    pub fn new(store: Arc<dyn ResourceStore>, config: Config) -> Self {
        let apply_opts = apply_opts(&config);
        Self {
            store,
            config,
            events: EventSink::disabled(),
            filter: ResourceFilter::default(),
            apply_opts,
        }
    }

    /// Report progress on `events`
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Restrict deploy and delete to resources passing `filter`
    pub fn with_filter(mut self, filter: ResourceFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Override the options derived from the configuration
    pub fn with_apply_opts(mut self, opts: ApplyOpts) -> Self {
        self.apply_opts = opts;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn app(&self, name: &str, namespace: &str) -> App {
        App::new(name, namespace, self.store.clone())
    }

    pub async fn exists(&self, name: &str, namespace: &str) -> Result<bool> {
        self.app(name, namespace).exists().await
    }

    /// Resources currently owned by the app, sorted by identity
    pub async fn inspect(&self, name: &str, namespace: &str) -> Result<Vec<Resource>> {
        let app = self.app(name, namespace);
        let meta = app.meta().await?.ok_or_else(|| Error::AppRecord {
            app: app.description(),
            reason: "does not exist".to_string(),
        })?;

        let labeled = LabeledResources::new(&meta.label_key, &meta.label_value, self.store.clone());
        let mut owned = labeled.list().await?;
        owned.sort_by_key(Resource::key);
        Ok(owned)
    }
}

/// Apply options from the `apply` section
pub fn apply_opts(config: &Config) -> ApplyOpts {
    let apply = &config.apply;
    ApplyOpts {
        concurrency: apply.concurrency.max(1),
        wait: apply.wait,
        wait_policy: WaitPolicy {
            check_interval: Duration::from_secs(apply.check_interval_secs),
            timeout: Duration::from_secs(apply.timeout_secs),
        },
        max_retries: apply.max_retries,
        apply_ignored: apply.apply_ignored,
        wait_ignored: apply.wait_ignored,
        ignore_failing_api_services: config.ignore_failing_api_services,
        default_update_strategy: apply.default_update_strategy,
        ..ApplyOpts::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MockResourceStore, StoreError};
    use crate::resources::parse_manifest;

    const MANIFEST: &[u8] = br#"
apiVersion: v1
kind: Namespace
metadata:
  name: ns1
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: cm1
  namespace: ns1
data:
  key: value
"#;

    #[tokio::test]
    async fn test_diff_never_writes() {
        let mut store = MockResourceStore::new();
        store.expect_get().returning(|_| Ok(None));
        store.expect_list().returning(|_| Ok(Vec::new()));
        store.expect_create().never();
        store.expect_update().never();
        store.expect_delete().never();

        let service = AppService::new(Arc::new(store), Config::default());
        let graph = service
            .diff("web", "apps", parse_manifest(MANIFEST).unwrap())
            .await
            .unwrap();
        assert_eq!(graph.len(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_store_fails_listing() {
        let mut store = MockResourceStore::new();
        store.expect_get().returning(|_| Ok(None));
        store
            .expect_list()
            .returning(|_| Err(StoreError::Unavailable("connection refused".into())));

        let service = AppService::new(Arc::new(store), Config::default());
        let err = service
            .diff("web", "apps", parse_manifest(MANIFEST).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RemoteList(_)));
    }

    #[tokio::test]
    async fn test_inspect_missing_app() {
        let mut store = MockResourceStore::new();
        store.expect_get().returning(|_| Ok(None));

        let service = AppService::new(Arc::new(store), Config::default());
        assert!(!service.exists("web", "apps").await.unwrap());
        assert!(matches!(
            service.inspect("web", "apps").await.unwrap_err(),
            Error::AppRecord { .. }
        ));
    }

    #[test]
    fn test_apply_opts_from_config() {
        let mut config = Config::default();
        config.apply.concurrency = 0;
        config.apply.timeout_secs = 30;
        config.ignore_failing_api_services = true;

        let opts = apply_opts(&config);
        assert_eq!(opts.concurrency, 1);
        assert_eq!(opts.wait_policy.timeout, Duration::from_secs(30));
        assert!(opts.ignore_failing_api_services);
    }
}
