//! Resource model
//!
//! A [`Resource`] wraps the JSON form of a remote object. Identity is
//! `(group, kind, namespace, name)`; the version is deliberately left out so
//! the same object served under two versions is still one resource.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::models::{WellKnownKind, annotations};

/// API group and version of a resource, e.g. `apps/v1` or core `v1`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupVersion {
    pub group: String,
    pub version: String,
}

impl GroupVersion {
    pub fn new(group: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
        }
    }

    /// Split an apiVersion string; core resources have an empty group
    pub fn from_api_version(api_version: &str) -> Self {
        match api_version.split_once('/') {
            Some((group, version)) => Self::new(group, version),
            None => Self::new("", api_version),
        }
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for GroupVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.api_version())
    }
}

/// Identity of a resource. Cluster-scoped resources have an empty namespace.
///
/// Field order defines the lexical ordering used inside change batches.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    pub group: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(
        group: impl Into<String>,
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn is_cluster_scoped(&self) -> bool {
        self.namespace.is_empty()
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.group.is_empty() {
            self.kind.clone()
        } else {
            format!("{}.{}", self.kind, self.group)
        };
        if self.namespace.is_empty() {
            write!(f, "{}/{}", kind, self.name)
        } else {
            write!(f, "{}/{}/{}", kind, self.namespace, self.name)
        }
    }
}

/// Owner of a resource as declared in `metadata.ownerReferences`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
}

/// A remote object plus the runtime-only flags set by the annotation pass
#[derive(Debug, Clone)]
pub struct Resource {
    obj: Value,
    transient: bool,
    ignored: bool,
}

/// Two resources are equal when they identify the same remote object.
impl PartialEq for Resource {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Resource {}

impl Resource {
    /// Wrap a JSON object, validating apiVersion, kind and metadata.name
    pub fn from_value(mut obj: Value) -> Result<Self> {
        let map = obj
            .as_object_mut()
            .ok_or_else(|| Error::InvalidResource("expected an object".to_string()))?;

        for field in ["apiVersion", "kind"] {
            match map.get(field) {
                Some(Value::String(s)) if !s.is_empty() => {}
                _ => {
                    return Err(Error::InvalidResource(format!(
                        "missing or empty '{}'",
                        field
                    )));
                }
            }
        }

        let metadata = map
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()));
        let name = metadata.get("name").and_then(Value::as_str).unwrap_or("");
        if name.is_empty() {
            return Err(Error::InvalidResource(format!(
                "{} without metadata.name",
                map.get("kind").and_then(Value::as_str).unwrap_or_default()
            )));
        }

        Ok(Self {
            obj,
            transient: false,
            ignored: false,
        })
    }

    pub fn api_version(&self) -> &str {
        self.obj["apiVersion"].as_str().unwrap_or_default()
    }

    pub fn kind(&self) -> &str {
        self.obj["kind"].as_str().unwrap_or_default()
    }

    pub fn well_known_kind(&self) -> Option<WellKnownKind> {
        WellKnownKind::parse_optional(self.kind())
    }

    pub fn group_version(&self) -> GroupVersion {
        GroupVersion::from_api_version(self.api_version())
    }

    pub fn group(&self) -> String {
        self.group_version().group
    }

    pub fn name(&self) -> &str {
        self.obj["metadata"]["name"].as_str().unwrap_or_default()
    }

    /// Namespace, or an empty string for cluster-scoped resources
    pub fn namespace(&self) -> &str {
        self.obj["metadata"]["namespace"]
            .as_str()
            .unwrap_or_default()
    }

    pub fn set_namespace(&mut self, namespace: &str) {
        let metadata = self.metadata_mut();
        if namespace.is_empty() {
            metadata.remove("namespace");
        } else {
            metadata.insert("namespace".to_string(), Value::String(namespace.to_string()));
        }
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.group(), self.kind(), self.namespace(), self.name())
    }

    /// `kind/name (apiVersion) namespace: ns`, or `... cluster` when unnamespaced
    pub fn description(&self) -> String {
        let kind = self.kind().to_lowercase();
        if self.namespace().is_empty() {
            format!("{}/{} ({}) cluster", kind, self.name(), self.api_version())
        } else {
            format!(
                "{}/{} ({}) namespace: {}",
                kind,
                self.name(),
                self.api_version(),
                self.namespace()
            )
        }
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        string_map(&self.obj["metadata"]["labels"])
    }

    pub fn annotations(&self) -> BTreeMap<String, String> {
        string_map(&self.obj["metadata"]["annotations"])
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.obj["metadata"]["annotations"][key].as_str()
    }

    pub fn set_label(&mut self, key: &str, value: &str) {
        let labels = self.metadata_child_mut("labels");
        labels.insert(key.to_string(), Value::String(value.to_string()));
    }

    pub fn set_annotation(&mut self, key: &str, value: &str) {
        let annotations = self.metadata_child_mut("annotations");
        annotations.insert(key.to_string(), Value::String(value.to_string()));
    }

    pub fn remove_annotation(&mut self, key: &str) {
        let metadata = self.metadata_mut();
        let now_empty = match metadata.get_mut("annotations").and_then(Value::as_object_mut) {
            Some(annotations) => {
                annotations.remove(key);
                annotations.is_empty()
            }
            None => false,
        };
        if now_empty {
            metadata.remove("annotations");
        }
    }

    pub fn is_transient(&self) -> bool {
        self.transient
    }

    pub fn mark_transient(&mut self, transient: bool) {
        self.transient = transient;
    }

    pub fn is_ignored(&self) -> bool {
        self.ignored
    }

    pub fn mark_ignored(&mut self, ignored: bool) {
        self.ignored = ignored;
    }

    /// Set the runtime flags from the resource's own annotations
    pub fn mark_from_annotations(&mut self) {
        let annotations = self.annotations();
        self.transient = annotations.contains_key(annotations::OWNED_FOR_DELETION);
        self.ignored = annotations.contains_key(annotations::IGNORE_CHANGES);
    }

    pub fn owner_references(&self) -> Vec<OwnerRef> {
        self.obj["metadata"]["ownerReferences"]
            .as_array()
            .map(|refs| {
                refs.iter()
                    .filter_map(|r| {
                        Some(OwnerRef {
                            api_version: r.get("apiVersion")?.as_str()?.to_string(),
                            kind: r.get("kind")?.as_str()?.to_string(),
                            name: r.get("name")?.as_str()?.to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn has_owner_references(&self) -> bool {
        self.obj["metadata"]["ownerReferences"]
            .as_array()
            .is_some_and(|refs| !refs.is_empty())
    }

    pub fn resource_version(&self) -> Option<&str> {
        self.obj["metadata"]["resourceVersion"].as_str()
    }

    pub fn set_resource_version(&mut self, version: Option<&str>) {
        let metadata = self.metadata_mut();
        match version {
            Some(v) => {
                metadata.insert("resourceVersion".to_string(), Value::String(v.to_string()));
            }
            None => {
                metadata.remove("resourceVersion");
            }
        }
    }

    /// Look up a nested field by object keys
    pub fn field(&self, path: &[&str]) -> Option<&Value> {
        path.iter().try_fold(&self.obj, |value, key| value.get(*key))
    }

    pub fn as_value(&self) -> &Value {
        &self.obj
    }

    pub fn as_value_mut(&mut self) -> &mut Value {
        &mut self.obj
    }

    pub fn into_value(self) -> Value {
        self.obj
    }

    /// Replace the object while keeping the runtime flags
    pub fn with_value(&self, obj: Value) -> Result<Self> {
        let mut res = Self::from_value(obj)?;
        res.transient = self.transient;
        res.ignored = self.ignored;
        Ok(res)
    }

    fn metadata_mut(&mut self) -> &mut Map<String, Value> {
        let root = ensure_object(&mut self.obj);
        let metadata = root
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()));
        ensure_object(metadata)
    }

    fn metadata_child_mut(&mut self, child: &str) -> &mut Map<String, Value> {
        let entry = self
            .metadata_mut()
            .entry(child)
            .or_insert_with(|| Value::Object(Map::new()));
        ensure_object(entry)
    }
}

impl Serialize for Resource {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.obj.serialize(serializer)
    }
}

/// Coerce a value into an object, replacing anything else (including null)
pub(crate) fn ensure_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just made an object"),
    }
}

fn string_map(value: &Value) -> BTreeMap<String, String> {
    value
        .as_object()
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn configmap(ns: &str, name: &str) -> Resource {
        Resource::from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": name, "namespace": ns},
            "data": {"a": "1"}
        }))
        .unwrap()
    }

    #[test]
    fn test_from_value_requires_identity() {
        assert!(Resource::from_value(json!({"kind": "ConfigMap", "metadata": {"name": "a"}})).is_err());
        assert!(Resource::from_value(json!({"apiVersion": "v1", "kind": "ConfigMap"})).is_err());
        assert!(Resource::from_value(json!("not an object")).is_err());
    }

    #[test]
    fn test_identity_ignores_version_and_content() {
        let a = Resource::from_value(json!({
            "apiVersion": "apps/v1", "kind": "Deployment",
            "metadata": {"name": "web", "namespace": "ns1"}
        }))
        .unwrap();
        let b = Resource::from_value(json!({
            "apiVersion": "apps/v1beta2", "kind": "Deployment",
            "metadata": {"name": "web", "namespace": "ns1"},
            "spec": {"replicas": 3}
        }))
        .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.key(), ResourceKey::new("apps", "Deployment", "ns1", "web"));
    }

    #[test]
    fn test_description() {
        assert_eq!(
            configmap("ns1", "cm1").description(),
            "configmap/cm1 (v1) namespace: ns1"
        );
        let ns = Resource::from_value(json!({
            "apiVersion": "v1", "kind": "Namespace", "metadata": {"name": "ns1"}
        }))
        .unwrap();
        assert_eq!(ns.description(), "namespace/ns1 (v1) cluster");
    }

    #[test]
    fn test_labels_and_annotations() {
        let mut res = configmap("ns1", "cm1");
        assert!(res.labels().is_empty());
        res.set_label("kapply.dev/app", "123");
        res.set_annotation(annotations::IGNORE_CHANGES, "");
        assert_eq!(res.labels().get("kapply.dev/app").map(String::as_str), Some("123"));

        res.mark_from_annotations();
        assert!(res.is_ignored());
        assert!(!res.is_transient());

        res.remove_annotation(annotations::IGNORE_CHANGES);
        assert!(res.as_value()["metadata"].get("annotations").is_none());
    }

    #[test]
    fn test_transient_from_annotation() {
        let mut res = configmap("ns1", "pvc");
        res.set_annotation(annotations::OWNED_FOR_DELETION, "");
        res.mark_from_annotations();
        assert!(res.is_transient());
    }

    #[test]
    fn test_owner_references() {
        let res = Resource::from_value(json!({
            "apiVersion": "apps/v1", "kind": "ReplicaSet",
            "metadata": {
                "name": "web-abc", "namespace": "ns1",
                "ownerReferences": [{"apiVersion": "apps/v1", "kind": "Deployment", "name": "web", "uid": "1"}]
            }
        }))
        .unwrap();
        assert!(res.has_owner_references());
        assert_eq!(res.owner_references()[0].name, "web");
        assert!(!configmap("ns1", "a").has_owner_references());
    }

    #[test]
    fn test_key_ordering_is_lexical() {
        let mut keys = vec![
            ResourceKey::new("", "ConfigMap", "ns1", "b"),
            ResourceKey::new("apps", "Deployment", "ns1", "a"),
            ResourceKey::new("", "ConfigMap", "ns1", "a"),
        ];
        keys.sort();
        assert_eq!(keys[0].name, "a");
        assert_eq!(keys[1].name, "b");
        assert_eq!(keys[2].group, "apps");
    }

    #[test]
    fn test_group_version_parsing() {
        assert_eq!(GroupVersion::from_api_version("v1"), GroupVersion::new("", "v1"));
        assert_eq!(
            GroupVersion::from_api_version("apps/v1").to_string(),
            "apps/v1"
        );
    }
}
