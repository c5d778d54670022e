//! Desired-resource preparation
//!
//! Runs before labeling: fills in the default namespace, sets runtime flags
//! from annotations and rejects duplicate identities.

use std::collections::{BTreeSet, HashSet};

use tracing::debug;

use super::resource::{Resource, ResourceKey};
use crate::error::{Error, Result};
use crate::models::{WellKnownKind, annotations};

pub struct Preparation {
    default_namespace: String,
}

impl Preparation {
    pub fn new(default_namespace: impl Into<String>) -> Self {
        Self {
            default_namespace: default_namespace.into(),
        }
    }

    pub fn prepare(&self, mut resources: Vec<Resource>) -> Result<Vec<Resource>> {
        let cluster_kinds = custom_cluster_kinds(&resources);

        for res in resources.iter_mut() {
            if res.namespace().is_empty() && !is_cluster_scoped(res, &cluster_kinds) {
                debug!(
                    "Defaulting namespace of {} to {}",
                    res.description(),
                    self.default_namespace
                );
                res.set_namespace(&self.default_namespace);
            }
            // never carried over from a previous apply
            res.remove_annotation(annotations::ORIGINAL);
            res.mark_from_annotations();
        }

        let mut seen: HashSet<ResourceKey> = HashSet::new();
        for res in &resources {
            if !seen.insert(res.key()) {
                return Err(Error::DuplicateResource(res.description()));
            }
        }

        Ok(resources)
    }
}

/// `(group, kind)` pairs served by cluster-scoped CRDs in the same manifest
fn custom_cluster_kinds(resources: &[Resource]) -> BTreeSet<(String, String)> {
    resources
        .iter()
        .filter(|r| r.well_known_kind() == Some(WellKnownKind::CustomResourceDefinition))
        .filter(|r| r.field(&["spec", "scope"]).and_then(|v| v.as_str()) == Some("Cluster"))
        .filter_map(|crd| {
            let group = crd.field(&["spec", "group"])?.as_str()?;
            let kind = crd.field(&["spec", "names", "kind"])?.as_str()?;
            Some((group.to_string(), kind.to_string()))
        })
        .collect()
}

fn is_cluster_scoped(res: &Resource, cluster_kinds: &BTreeSet<(String, String)>) -> bool {
    if let Some(kind) = res.well_known_kind() {
        return kind.is_cluster_scoped();
    }
    cluster_kinds.contains(&(res.group(), res.kind().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn res(value: serde_json::Value) -> Resource {
        Resource::from_value(value).unwrap()
    }

    #[test]
    fn test_defaults_namespace_for_namespaced_kinds_only() {
        let prepared = Preparation::new("default-ns")
            .prepare(vec![
                res(json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "a"}})),
                res(json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "b", "namespace": "other"}})),
                res(json!({"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": "ns1"}})),
            ])
            .unwrap();
        assert_eq!(prepared[0].namespace(), "default-ns");
        assert_eq!(prepared[1].namespace(), "other");
        assert_eq!(prepared[2].namespace(), "");
    }

    #[test]
    fn test_cluster_scoped_custom_resources_stay_unnamespaced() {
        let prepared = Preparation::new("default-ns")
            .prepare(vec![
                res(json!({
                    "apiVersion": "apiextensions.k8s.io/v1",
                    "kind": "CustomResourceDefinition",
                    "metadata": {"name": "widgets.example.com"},
                    "spec": {"group": "example.com", "scope": "Cluster", "names": {"kind": "Widget", "plural": "widgets"}}
                })),
                res(json!({"apiVersion": "example.com/v1", "kind": "Widget", "metadata": {"name": "w"}})),
                res(json!({"apiVersion": "example.com/v1", "kind": "Gadget", "metadata": {"name": "g"}})),
            ])
            .unwrap();
        assert_eq!(prepared[1].namespace(), "");
        assert_eq!(prepared[2].namespace(), "default-ns");
    }

    #[test]
    fn test_duplicates_are_rejected_after_defaulting() {
        let err = Preparation::new("ns1")
            .prepare(vec![
                res(json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "a"}})),
                res(json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "a", "namespace": "ns1"}})),
            ])
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateResource(_)));
    }

    #[test]
    fn test_flags_follow_annotations() {
        let prepared = Preparation::new("ns1")
            .prepare(vec![res(json!({
                "apiVersion": "v1", "kind": "ConfigMap",
                "metadata": {"name": "a", "annotations": {"kapply.dev/ignore-changes": ""}}
            }))])
            .unwrap();
        assert!(prepared[0].is_ignored());
        assert!(!prepared[0].is_transient());
    }
}
