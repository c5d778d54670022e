//! Label-scoped resources
//!
//! An app owns exactly the resources carrying its ownership label. This
//! module stamps that label onto desired resources and lists what an app
//! currently owns, plus unlabeled objects that a desired resource would
//! take over.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use futures::{StreamExt, TryStreamExt, stream};
use serde_json::Value;
use tracing::{debug, warn};

use super::resource::{Resource, ResourceKey, ensure_object};
use super::selector::LabelSelector;
use crate::error::{Error, Result};
use crate::models::WellKnownKind;
use crate::store::ResourceStore;

const LOOKUP_CONCURRENCY: usize = 8;

/// Where a label gets written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMod {
    /// Object keys leading to a string map, e.g. `["metadata", "labels"]`
    pub path: Vec<String>,
    /// Kinds the mod applies to (empty = every kind)
    pub kinds: Vec<WellKnownKind>,
    /// Create the map when absent. Scoping mods never do: selectors are
    /// immutable, so only selectors the author already wrote are extended.
    pub create: bool,
}

impl LabelMod {
    fn new(path: &[&str], kinds: &[WellKnownKind], create: bool) -> Self {
        Self {
            path: path.iter().map(|p| p.to_string()).collect(),
            kinds: kinds.to_vec(),
            create,
        }
    }

    /// Ownership label locations: metadata plus every pod/job template
    pub fn ownership_defaults() -> Vec<Self> {
        use WellKnownKind::*;
        vec![
            Self::new(&["metadata", "labels"], &[], true),
            Self::new(
                &["spec", "template", "metadata", "labels"],
                &[Deployment, StatefulSet, DaemonSet, ReplicaSet, Job],
                true,
            ),
            Self::new(
                &["spec", "jobTemplate", "metadata", "labels"],
                &[CronJob],
                true,
            ),
            Self::new(
                &["spec", "jobTemplate", "spec", "template", "metadata", "labels"],
                &[CronJob],
                true,
            ),
        ]
    }

    /// Selector locations extended with the ownership label when present
    pub fn scoping_defaults() -> Vec<Self> {
        use WellKnownKind::*;
        vec![
            Self::new(
                &["spec", "selector", "matchLabels"],
                &[Deployment, StatefulSet, DaemonSet, ReplicaSet],
                false,
            ),
            Self::new(&["spec", "selector"], &[Service], false),
        ]
    }

    fn applies_to(&self, kind: Option<WellKnownKind>) -> bool {
        self.kinds.is_empty() || kind.is_some_and(|kind| self.kinds.contains(&kind))
    }

    /// The string map at `path`, created on the way if allowed
    fn target<'a>(&self, obj: &'a mut Value) -> Option<&'a mut serde_json::Map<String, Value>> {
        let mut current = obj;
        for key in &self.path {
            let map = current.as_object_mut()?;
            if !map.contains_key(key) {
                if !self.create {
                    return None;
                }
                map.insert(key.clone(), Value::Object(Default::default()));
            }
            current = map.get_mut(key)?;
        }
        if current.is_null() && self.create {
            ensure_object(current);
        }
        current.as_object_mut()
    }
}

/// Options for [`LabeledResources::all_and_matching`]
#[derive(Debug, Clone, Default)]
pub struct AllAndMatchingOpts {
    /// Adopt matching objects even when another app owns them
    pub skip_ownership_check: bool,
    /// Matching objects carrying any of these label keys are never adopted
    pub blacklisted_label_keys: Vec<String>,
    /// Ownership label value → owner description, used in conflict errors
    pub known_owners: BTreeMap<String, String>,
}

pub struct LabeledResources {
    label_key: String,
    label_value: String,
    store: Arc<dyn ResourceStore>,
}

impl LabeledResources {
    pub fn new(label_key: &str, label_value: &str, store: Arc<dyn ResourceStore>) -> Self {
        Self {
            label_key: label_key.to_string(),
            label_value: label_value.to_string(),
            store,
        }
    }

    pub fn selector(&self) -> LabelSelector {
        LabelSelector::equals(&self.label_key, &self.label_value)
    }

    /// Stamp the ownership label (and additional labels) onto desired resources
    ///
    /// `resolution` is asked what to do when a resource already carries a
    /// different ownership label value; returning `true` overrides it.
    pub fn prepare(
        &self,
        resources: &mut [Resource],
        ownership_mods: &[LabelMod],
        scoping_mods: &[LabelMod],
        additional_labels: &BTreeMap<String, String>,
        resolution: &dyn Fn(&Resource, &str) -> bool,
    ) -> Result<()> {
        for res in resources.iter_mut() {
            if let Some(found) = res.labels().get(&self.label_key) {
                if found != &self.label_value && !resolution(res, found) {
                    return Err(Error::LabelConflict {
                        resource: res.description(),
                        key: self.label_key.clone(),
                        expected: self.label_value.clone(),
                        found: found.clone(),
                    });
                }
            }

            let kind = res.well_known_kind();
            let description = res.description();

            for label_mod in ownership_mods.iter().filter(|m| m.applies_to(kind)) {
                if let Some(labels) = label_mod.target(res.as_value_mut()) {
                    labels.insert(self.label_key.clone(), Value::String(self.label_value.clone()));
                    for (k, v) in additional_labels {
                        labels.insert(k.clone(), Value::String(v.clone()));
                    }
                }
            }

            for label_mod in scoping_mods.iter().filter(|m| m.applies_to(kind)) {
                if let Some(selector) = label_mod.target(res.as_value_mut()) {
                    debug!("Scoping selector {:?} of {}", label_mod.path, description);
                    selector.insert(self.label_key.clone(), Value::String(self.label_value.clone()));
                }
            }
        }
        Ok(())
    }

    /// Resources owned by the app, excluding controller-created objects
    pub async fn list(&self) -> Result<Vec<Resource>> {
        let listed = self
            .store
            .list(&self.selector())
            .await
            .map_err(Error::RemoteList)?;

        Ok(listed
            .into_iter()
            .filter(|res| {
                if res.has_owner_references() {
                    debug!("Skipping controller-owned {}", res.description());
                    return false;
                }
                true
            })
            .map(|mut res| {
                res.mark_from_annotations();
                res
            })
            .collect())
    }

    /// Owned resources plus unlabeled live objects matching a desired resource
    pub async fn all_and_matching(
        &self,
        desired: &[Resource],
        opts: &AllAndMatchingOpts,
    ) -> Result<Vec<Resource>> {
        let mut owned = self.list().await?;
        let owned_keys: HashSet<ResourceKey> = owned.iter().map(Resource::key).collect();

        let lookups: Vec<ResourceKey> = desired
            .iter()
            .map(Resource::key)
            .filter(|key| !owned_keys.contains(key))
            .collect();

        let store = &self.store;
        let matched: Vec<Option<Resource>> = stream::iter(lookups)
            .map(|key| async move {
                store
                    .get(&key)
                    .await
                    .map_err(|e| Error::remote("get", key.to_string(), e))
            })
            .buffered(LOOKUP_CONCURRENCY)
            .try_collect()
            .await?;

        for mut res in matched.into_iter().flatten() {
            let labels = res.labels();
            if opts
                .blacklisted_label_keys
                .iter()
                .any(|key| labels.contains_key(key))
            {
                debug!("Not adopting blacklisted {}", res.description());
                continue;
            }

            if let Some(owner) = labels.get(&self.label_key) {
                if owner != &self.label_value {
                    if !opts.skip_ownership_check {
                        return Err(Error::OwnershipConflict {
                            resource: res.description(),
                            owner: opts
                                .known_owners
                                .get(owner)
                                .cloned()
                                .unwrap_or_else(|| format!("{}={}", self.label_key, owner)),
                        });
                    }
                    warn!(
                        "Taking over {} from {}={}",
                        res.description(),
                        self.label_key,
                        owner
                    );
                }
            }

            res.mark_from_annotations();
            owned.push(res);
        }

        Ok(owned)
    }
}
