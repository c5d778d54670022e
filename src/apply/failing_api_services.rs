//! Guard against writing through unavailable aggregated APIs
//!
//! An aggregated API server that is down makes every request for its
//! group/version fail. Changes to resources served by such an API are
//! refused with a dedicated error instead of a generic remote failure,
//! unless the app opted into ignoring failing API services.

use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::diff::Change;
use crate::error::{Error, Result};
use crate::resources::GroupVersion;
use crate::store::ResourceStore;

#[derive(Debug, Clone, Default)]
pub struct FailingApiServicesPolicy {
    ignore: bool,
    required: BTreeSet<GroupVersion>,
    failing: BTreeSet<GroupVersion>,
}

impl FailingApiServicesPolicy {
    pub fn new(ignore: bool) -> Self {
        Self {
            ignore,
            ..Default::default()
        }
    }

    /// Group/versions the app depends on
    pub fn mark_required(&mut self, gvs: impl IntoIterator<Item = GroupVersion>) {
        self.required.extend(gvs);
    }

    /// Re-read the failing set. A read error keeps the previous set.
    pub async fn refresh(&mut self, store: &dyn ResourceStore) {
        match store.failing_group_versions().await {
            Ok(gvs) => {
                self.failing = gvs.into_iter().collect();
                if !self.failing.is_empty() {
                    debug!("Failing API services: {:?}", self.failing);
                }
            }
            Err(e) => warn!("Could not determine failing API services: {}", e),
        }
    }

    pub fn check(&self, change: &Change) -> Result<()> {
        if self.ignore {
            return Ok(());
        }
        let resource = change.resource();
        let gv = resource.group_version();
        if self.required.contains(&gv) && self.failing.contains(&gv) {
            return Err(Error::FailingApiService {
                op: change.op(),
                resource: resource.description(),
                group_version: gv.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::ChangeFactory;
    use crate::resources::Resource;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn metrics_change() -> Change {
        let res = Resource::from_value(json!({
            "apiVersion": "metrics.example.com/v1", "kind": "Gauge",
            "metadata": {"name": "g", "namespace": "ns1"}
        }))
        .unwrap();
        ChangeFactory::default().new_change(None, Some(res)).unwrap()
    }

    #[tokio::test]
    async fn test_refuses_failing_required_group_version() {
        let store = MemoryStore::new();
        store.set_failing_group_versions(vec![GroupVersion::new("metrics.example.com", "v1")]);

        let mut policy = FailingApiServicesPolicy::new(false);
        policy.mark_required([GroupVersion::new("metrics.example.com", "v1")]);
        policy.refresh(&store).await;

        let err = policy.check(&metrics_change()).unwrap_err();
        assert!(matches!(err, Error::FailingApiService { ref group_version, .. } if group_version == "metrics.example.com/v1"));
    }

    #[tokio::test]
    async fn test_ignore_and_unrequired_pass() {
        let store = MemoryStore::new();
        store.set_failing_group_versions(vec![GroupVersion::new("metrics.example.com", "v1")]);

        let mut ignoring = FailingApiServicesPolicy::new(true);
        ignoring.mark_required([GroupVersion::new("metrics.example.com", "v1")]);
        ignoring.refresh(&store).await;
        assert!(ignoring.check(&metrics_change()).is_ok());

        let mut unrequired = FailingApiServicesPolicy::new(false);
        unrequired.refresh(&store).await;
        assert!(unrequired.check(&metrics_change()).is_ok());
    }
}
