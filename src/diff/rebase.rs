//! Rebase rules
//!
//! Before an update, fields the cluster assigned to the live object are
//! copied into the desired object when the manifest leaves them unset.
//! Several of these are immutable; omitting them makes the update fail.

use serde_json::{Map, Value};

use crate::models::WellKnownKind;
use crate::resources::resource::ensure_object;

const JOB_TEMPLATE_LABELS: &[&str] = &[
    "controller-uid",
    "batch.kubernetes.io/controller-uid",
    "job-name",
    "batch.kubernetes.io/job-name",
];

/// Copy cluster-assigned fields of `existing` into `desired`
pub fn rebase(existing: &Value, desired: &mut Value) {
    if let Some(rv) = existing["metadata"].get("resourceVersion") {
        let root = ensure_object(desired);
        let metadata = ensure_object(root.entry("metadata").or_insert(Value::Null));
        metadata.insert("resourceVersion".to_string(), rv.clone());
    }

    let kind = desired["kind"].as_str().and_then(WellKnownKind::parse_optional);
    match kind {
        Some(WellKnownKind::Service) => {
            for field in ["clusterIP", "clusterIPs", "healthCheckNodePort"] {
                copy_if_absent(existing, desired, &["spec", field]);
            }
            copy_node_ports(existing, desired);
        }
        Some(WellKnownKind::PersistentVolumeClaim) => {
            copy_if_absent(existing, desired, &["spec", "volumeName"]);
        }
        Some(WellKnownKind::Job) => {
            copy_if_absent(existing, desired, &["spec", "selector"]);
            for label in JOB_TEMPLATE_LABELS {
                copy_if_absent(
                    existing,
                    desired,
                    &["spec", "template", "metadata", "labels", *label],
                );
            }
        }
        Some(WellKnownKind::ServiceAccount) => {
            copy_if_absent(existing, desired, &["secrets"]);
        }
        _ => {}
    }
}

fn copy_if_absent(existing: &Value, desired: &mut Value, path: &[&str]) {
    let Some(source) = lookup(existing, path) else {
        return;
    };
    if lookup(desired, path).is_some() {
        return;
    }
    let Some((last, parents)) = path.split_last() else {
        return;
    };

    let mut current = ensure_object(desired);
    for key in parents {
        let next = current
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        current = ensure_object(next);
    }
    current.insert(last.to_string(), source.clone());
}

/// Ports keep their allocated nodePort when the manifest names none
fn copy_node_ports(existing: &Value, desired: &mut Value) {
    let Some(live_ports) = existing["spec"]["ports"].as_array() else {
        return;
    };
    let Some(ports) = desired
        .get_mut("spec")
        .and_then(|spec| spec.get_mut("ports"))
        .and_then(Value::as_array_mut)
    else {
        return;
    };

    for port in ports.iter_mut() {
        if port.get("nodePort").is_some() {
            continue;
        }
        let protocol = port["protocol"].as_str().unwrap_or("TCP");
        let matching = live_ports.iter().find(|live| {
            live.get("port") == port.get("port")
                && live["protocol"].as_str().unwrap_or("TCP") == protocol
        });
        if let (Some(node_port), Some(map)) = (
            matching.and_then(|live| live.get("nodePort")),
            port.as_object_mut(),
        ) {
            map.insert("nodePort".to_string(), node_port.clone());
        }
    }
}

fn lookup<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter()
        .try_fold(value, |v, key| v.get(*key))
        .filter(|v| !v.is_null())
}
