//! Convergence checks
//!
//! Decides from a live object whether an applied change has settled.
//! Built-in workloads are inspected through their typed `k8s-openapi`
//! definitions; everything else only fails on a `Ready=False` condition
//! with reason `Failed` and is otherwise converged as soon as it exists.

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Namespace, PersistentVolumeClaim};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::kube_aggregator::pkg::apis::apiregistration::v1::APIService;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::models::WellKnownKind;
use crate::resources::{Resource, ResourceKey};
use crate::store::ResourceStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Convergence {
    Converged,
    Waiting(String),
    Failed(String),
}

pub async fn check(store: &dyn ResourceStore, res: &Resource) -> Convergence {
    let value = res.as_value();
    let typed_outcome = match res.well_known_kind() {
        Some(WellKnownKind::Deployment) => typed(value).map(|d| deployment(&d)),
        Some(WellKnownKind::StatefulSet) => typed(value).map(|s| stateful_set(&s)),
        Some(WellKnownKind::DaemonSet) => typed(value).map(|d| daemon_set(&d)),
        Some(WellKnownKind::ReplicaSet) => typed(value).map(|r| replica_set(&r)),
        Some(WellKnownKind::Job) => typed(value).map(|j| job(&j)),
        Some(WellKnownKind::CustomResourceDefinition) => typed(value).map(|c| crd(&c)),
        Some(WellKnownKind::Namespace) => typed(value).map(|n| namespace(&n)),
        Some(WellKnownKind::ApiService) => typed(value).map(|a| api_service(&a)),
        Some(WellKnownKind::PersistentVolumeClaim) => match typed::<PersistentVolumeClaim>(value) {
            Some(pvc) => Some(claim(store, &pvc).await),
            None => None,
        },
        _ => None,
    };

    typed_outcome.unwrap_or_else(|| generic(value))
}

fn typed<T: DeserializeOwned>(value: &Value) -> Option<T> {
    serde_json::from_value(value.clone())
        .map_err(|e| debug!("Falling back to generic convergence check: {}", e))
        .ok()
}

fn generic(value: &Value) -> Convergence {
    let failed = value["status"]["conditions"]
        .as_array()
        .into_iter()
        .flatten()
        .find(|c| c["type"] == "Ready" && c["status"] == "False" && c["reason"] == "Failed");
    match failed {
        Some(condition) => Convergence::Failed(
            condition["message"]
                .as_str()
                .unwrap_or("Ready condition reports failure")
                .to_string(),
        ),
        None => Convergence::Converged,
    }
}

fn generation_observed(generation: Option<i64>, observed: Option<i64>) -> Option<Convergence> {
    let generation = generation.unwrap_or(0);
    if observed.unwrap_or(0) < generation {
        return Some(Convergence::Waiting(format!(
            "waiting for generation {} to be observed",
            generation
        )));
    }
    None
}

fn deployment(d: &Deployment) -> Convergence {
    let Some(status) = &d.status else {
        return Convergence::Waiting("waiting for status".to_string());
    };
    if let Some(waiting) = generation_observed(d.metadata.generation, status.observed_generation) {
        return waiting;
    }

    let deadline_exceeded = status.conditions.iter().flatten().find(|c| {
        c.type_ == "Progressing"
            && c.status == "False"
            && c.reason.as_deref() == Some("ProgressDeadlineExceeded")
    });
    if let Some(condition) = deadline_exceeded {
        return Convergence::Failed(
            condition
                .message
                .clone()
                .unwrap_or_else(|| "progress deadline exceeded".to_string()),
        );
    }

    let desired = d.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let updated = status.updated_replicas.unwrap_or(0);
    if updated < desired {
        return Convergence::Waiting(format!("{} of {} replicas updated", updated, desired));
    }
    let total = status.replicas.unwrap_or(0);
    if total > updated {
        return Convergence::Waiting(format!(
            "{} old replicas pending termination",
            total - updated
        ));
    }
    let available = status.available_replicas.unwrap_or(0);
    if available < updated {
        return Convergence::Waiting(format!("{} of {} updated replicas available", available, updated));
    }
    Convergence::Converged
}

fn stateful_set(s: &StatefulSet) -> Convergence {
    let Some(status) = &s.status else {
        return Convergence::Waiting("waiting for status".to_string());
    };
    if let Some(waiting) = generation_observed(s.metadata.generation, status.observed_generation) {
        return waiting;
    }

    let spec = s.spec.as_ref();
    let desired = spec.and_then(|s| s.replicas).unwrap_or(1);
    let ready = status.ready_replicas.unwrap_or(0);
    if ready < desired {
        return Convergence::Waiting(format!("{} of {} replicas ready", ready, desired));
    }

    let on_delete = spec
        .and_then(|s| s.update_strategy.as_ref())
        .and_then(|u| u.type_.as_deref())
        == Some("OnDelete");
    let updated = status.updated_replicas.unwrap_or(0);
    if !on_delete && updated < desired {
        return Convergence::Waiting(format!("{} of {} replicas updated", updated, desired));
    }
    Convergence::Converged
}

fn daemon_set(d: &DaemonSet) -> Convergence {
    let Some(status) = &d.status else {
        return Convergence::Waiting("waiting for status".to_string());
    };
    if let Some(waiting) = generation_observed(d.metadata.generation, status.observed_generation) {
        return waiting;
    }

    let desired = status.desired_number_scheduled;
    let updated = status.updated_number_scheduled.unwrap_or(0);
    if updated < desired {
        return Convergence::Waiting(format!("{} of {} pods updated", updated, desired));
    }
    let available = status.number_available.unwrap_or(0);
    if available < desired {
        return Convergence::Waiting(format!("{} of {} pods available", available, desired));
    }
    Convergence::Converged
}

fn replica_set(r: &ReplicaSet) -> Convergence {
    let Some(status) = &r.status else {
        return Convergence::Waiting("waiting for status".to_string());
    };
    if let Some(waiting) = generation_observed(r.metadata.generation, status.observed_generation) {
        return waiting;
    }
    let desired = r.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let ready = status.ready_replicas.unwrap_or(0);
    if ready < desired {
        return Convergence::Waiting(format!("{} of {} replicas ready", ready, desired));
    }
    Convergence::Converged
}

fn job(j: &Job) -> Convergence {
    let conditions = j
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .cloned()
        .unwrap_or_default();

    if let Some(failed) = conditions
        .iter()
        .find(|c| c.type_ == "Failed" && c.status == "True")
    {
        return Convergence::Failed(
            failed
                .message
                .clone()
                .or_else(|| failed.reason.clone())
                .unwrap_or_else(|| "job failed".to_string()),
        );
    }
    if conditions
        .iter()
        .any(|c| c.type_ == "Complete" && c.status == "True")
    {
        return Convergence::Converged;
    }
    Convergence::Waiting("waiting to complete".to_string())
}

fn crd(c: &CustomResourceDefinition) -> Convergence {
    let conditions = c
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .cloned()
        .unwrap_or_default();

    if let Some(rejected) = conditions
        .iter()
        .find(|c| c.type_ == "NamesAccepted" && c.status == "False")
    {
        return Convergence::Failed(
            rejected
                .message
                .clone()
                .unwrap_or_else(|| "names not accepted".to_string()),
        );
    }
    if conditions
        .iter()
        .any(|c| c.type_ == "Established" && c.status == "True")
    {
        return Convergence::Converged;
    }
    Convergence::Waiting("waiting to be established".to_string())
}

/// Aggregated APIs are usable once `Available`; local ones always are
fn api_service(a: &APIService) -> Convergence {
    if a.spec.as_ref().is_none_or(|s| s.service.is_none()) {
        return Convergence::Converged;
    }
    let available = a
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conditions| conditions.iter().find(|c| c.type_ == "Available"));
    match available {
        Some(c) if c.status == "True" => Convergence::Converged,
        Some(c) => Convergence::Waiting(format!(
            "waiting to become available: {}",
            c.message.as_deref().unwrap_or("no message")
        )),
        None => Convergence::Waiting("waiting to become available".to_string()),
    }
}

fn namespace(n: &Namespace) -> Convergence {
    match n.status.as_ref().and_then(|s| s.phase.as_deref()) {
        Some("Terminating") => Convergence::Waiting("namespace is terminating".to_string()),
        _ => Convergence::Converged,
    }
}

async fn claim(store: &dyn ResourceStore, pvc: &PersistentVolumeClaim) -> Convergence {
    match pvc.status.as_ref().and_then(|s| s.phase.as_deref()) {
        Some("Bound") => return Convergence::Converged,
        Some("Lost") => return Convergence::Failed("claim lost its volume".to_string()),
        _ => {}
    }

    // the default storage class is unknown here; do not block on it
    let Some(class_name) = pvc.spec.as_ref().and_then(|s| s.storage_class_name.clone()) else {
        return Convergence::Converged;
    };

    let key = ResourceKey::new("storage.k8s.io", "StorageClass", "", class_name.as_str());
    let class = match store.get(&key).await {
        Ok(Some(class)) => typed::<StorageClass>(class.as_value()),
        Ok(None) => None,
        Err(e) => {
            debug!("Reading storage class {}: {}", class_name, e);
            None
        }
    };
    if class.and_then(|c| c.volume_binding_mode).as_deref() == Some("WaitForFirstConsumer") {
        return Convergence::Converged;
    }
    Convergence::Waiting("waiting to be bound".to_string())
}
