//! Changes between an existing and a desired resource

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use super::rebase::rebase;
use crate::error::{Error, Result};
use crate::models::annotations;
use crate::resources::resource::ensure_object;
use crate::resources::{Resource, ResourceKey};

/// Server-managed metadata never compared
const SERVER_METADATA: &[&str] = &[
    "resourceVersion",
    "uid",
    "generation",
    "creationTimestamp",
    "managedFields",
    "selfLink",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Add,
    Delete,
    Update,
    Noop,
}

impl ChangeOp {
    pub fn is_upsert(&self) -> bool {
        matches!(self, ChangeOp::Add | ChangeOp::Update)
    }
}

impl fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeOp::Add => "create",
            ChangeOp::Delete => "delete",
            ChangeOp::Update => "update",
            ChangeOp::Noop => "noop",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone)]
pub struct Change {
    op: ChangeOp,
    existing: Option<Resource>,
    desired: Option<Resource>,
    ignored: bool,
    patch: json_patch::Patch,
}

impl Change {
    pub fn op(&self) -> ChangeOp {
        self.op
    }

    /// The resource the change acts on: desired for upserts, existing for deletes
    pub fn resource(&self) -> &Resource {
        match (&self.desired, &self.existing) {
            (Some(desired), _) if self.op != ChangeOp::Delete => desired,
            (_, Some(existing)) => existing,
            (Some(desired), None) => desired,
            (None, None) => unreachable!("changes are built from at least one resource"),
        }
    }

    pub fn key(&self) -> ResourceKey {
        self.resource().key()
    }

    pub fn existing(&self) -> Option<&Resource> {
        self.existing.as_ref()
    }

    /// Desired post-state, including the last-applied annotation
    pub fn desired(&self) -> Option<&Resource> {
        self.desired.as_ref()
    }

    pub fn is_ignored(&self) -> bool {
        self.ignored
    }

    pub fn patch(&self) -> &json_patch::Patch {
        &self.patch
    }

    /// One line per patch operation, e.g. `replace /data/key`
    pub fn patch_summary(&self) -> Vec<String> {
        self.patch
            .0
            .iter()
            .filter_map(|op| serde_json::to_value(op).ok())
            .map(|op| {
                format!(
                    "{} {}",
                    op["op"].as_str().unwrap_or_default(),
                    op["path"].as_str().unwrap_or_default()
                )
            })
            .collect()
    }

    /// `create configmap/a (v1) namespace: ns1`
    pub fn description(&self) -> String {
        format!("{} {}", self.op, self.resource().description())
    }
}

/// Builds [`Change`]s, choosing how existing and desired are compared
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeFactory {
    against_last_applied: bool,
}

impl ChangeFactory {
    pub fn new(against_last_applied: bool) -> Self {
        Self {
            against_last_applied,
        }
    }

    pub fn new_change(&self, existing: Option<Resource>, desired: Option<Resource>) -> Result<Change> {
        let ignored = existing.as_ref().is_some_and(Resource::is_ignored)
            || desired.as_ref().is_some_and(Resource::is_ignored);

        match (existing, desired) {
            (None, Some(desired)) => Ok(Change {
                op: ChangeOp::Add,
                existing: None,
                desired: Some(with_last_applied(&desired)?),
                ignored,
                patch: json_patch::Patch::default(),
            }),
            (Some(existing), None) => Ok(Change {
                op: ChangeOp::Delete,
                existing: Some(existing),
                desired: None,
                ignored,
                patch: json_patch::Patch::default(),
            }),
            (Some(existing), Some(desired)) => {
                let (left, right) = self.comparison(&existing, &desired);
                let patch = json_patch::diff(&left, &right);
                let mut applied = with_last_applied(&desired)?;

                let op = if patch.0.is_empty() {
                    ChangeOp::Noop
                } else {
                    rebase(existing.as_value(), applied.as_value_mut());
                    ChangeOp::Update
                };

                Ok(Change {
                    op,
                    existing: Some(existing),
                    desired: Some(applied),
                    ignored,
                    patch,
                })
            }
            (None, None) => Err(Error::InvalidResource(
                "change needs an existing or a desired resource".to_string(),
            )),
        }
    }

    /// The two documents whose structural diff decides Update vs Noop
    fn comparison(&self, existing: &Resource, desired: &Resource) -> (Value, Value) {
        let desired = normalize(desired.as_value());

        if self.against_last_applied {
            let last_applied = existing
                .annotation(annotations::ORIGINAL)
                .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
                .filter(Value::is_object);
            if let Some(last_applied) = last_applied {
                return (normalize(&last_applied), desired);
            }
        }

        // without a last-applied snapshot the live object is the baseline;
        // fields the cluster assigned are carried over so they do not read as removals
        let mut rebased = desired;
        rebase(existing.as_value(), &mut rebased);
        (normalize(existing.as_value()), normalize(&rebased))
    }
}

/// Desired resource annotated with its own last-applied JSON
fn with_last_applied(desired: &Resource) -> Result<Resource> {
    let mut applied = desired.clone();
    applied.remove_annotation(annotations::ORIGINAL);
    let snapshot = serde_json::to_string(applied.as_value())
        .map_err(|e| Error::InvalidResource(format!("{}: {}", desired.description(), e)))?;
    applied.set_annotation(annotations::ORIGINAL, &snapshot);
    Ok(applied)
}

/// Strip fields the server owns so they never show up in diffs
pub fn normalize(value: &Value) -> Value {
    let mut copy = value.clone();
    let root = ensure_object(&mut copy);
    root.remove("status");

    if let Some(metadata) = root.get_mut("metadata").and_then(Value::as_object_mut) {
        for field in SERVER_METADATA {
            metadata.remove(*field);
        }
        let drop_annotations = match metadata.get_mut("annotations").and_then(Value::as_object_mut) {
            Some(map) => {
                map.remove(annotations::ORIGINAL);
                map.is_empty()
            }
            None => false,
        };
        if drop_annotations {
            metadata.remove("annotations");
        }
    }
    copy
}
