//! Include/exclude filtering of resources by kind and namespace
//!
//! The same filter is applied to desired and existing resources so a
//! filtered-out resource is neither created nor deleted.

use serde::{Deserialize, Serialize};

use super::resource::Resource;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceFilter {
    /// Only these kinds (empty = all)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kinds: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_kinds: Vec<String>,
    /// Only these namespaces (empty = all). Cluster-scoped resources are
    /// matched by the empty namespace `""`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_namespaces: Vec<String>,
}

impl ResourceFilter {
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
            && self.exclude_kinds.is_empty()
            && self.namespaces.is_empty()
            && self.exclude_namespaces.is_empty()
    }

    pub fn matches(&self, res: &Resource) -> bool {
        let kind = res.kind();
        let ns = res.namespace();

        if !self.kinds.is_empty() && !self.kinds.iter().any(|k| k == kind) {
            return false;
        }
        if self.exclude_kinds.iter().any(|k| k == kind) {
            return false;
        }
        if !self.namespaces.is_empty() && !self.namespaces.iter().any(|n| n == ns) {
            return false;
        }
        !self.exclude_namespaces.iter().any(|n| n == ns)
    }

    pub fn apply(&self, resources: Vec<Resource>) -> Vec<Resource> {
        if self.is_empty() {
            return resources;
        }
        resources.into_iter().filter(|r| self.matches(r)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn res(kind: &str, ns: Option<&str>, name: &str) -> Resource {
        let mut meta = json!({"name": name});
        if let Some(ns) = ns {
            meta["namespace"] = json!(ns);
        }
        Resource::from_value(json!({"apiVersion": "v1", "kind": kind, "metadata": meta})).unwrap()
    }

    #[test]
    fn test_empty_filter_keeps_everything() {
        let filter = ResourceFilter::default();
        assert!(filter.is_empty());
        assert_eq!(filter.apply(vec![res("ConfigMap", Some("a"), "x")]).len(), 1);
    }

    #[test]
    fn test_include_and_exclude() {
        let filter = ResourceFilter {
            kinds: vec!["ConfigMap".into(), "Namespace".into()],
            exclude_namespaces: vec!["kube-system".into()],
            ..Default::default()
        };
        assert!(filter.matches(&res("ConfigMap", Some("ns1"), "a")));
        assert!(filter.matches(&res("Namespace", None, "ns1")));
        assert!(!filter.matches(&res("Secret", Some("ns1"), "a")));
        assert!(!filter.matches(&res("ConfigMap", Some("kube-system"), "a")));
    }

    #[test]
    fn test_namespace_include_matches_cluster_scope_by_empty_string() {
        let filter = ResourceFilter {
            namespaces: vec!["".into()],
            ..Default::default()
        };
        assert!(filter.matches(&res("Namespace", None, "ns1")));
        assert!(!filter.matches(&res("ConfigMap", Some("ns1"), "a")));
    }
}
