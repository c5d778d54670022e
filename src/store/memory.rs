//! In-memory resource store
//!
//! Behaves like a small API server: assigns resourceVersion/uid/generation,
//! rejects stale updates, cascades namespace deletion, and settles object
//! status immediately so convergence checks pass without controllers.
//! Failures and unavailable API services can be injected for tests.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{ResourceStore, StoreError};
use crate::models::WellKnownKind;
use crate::resources::resource::ensure_object;
use crate::resources::{GroupVersion, LabelSelector, Resource, ResourceKey};

/// Store operations, used for failure injection and the write log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    List,
    Get,
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone)]
struct InjectedFailure {
    op: StoreOp,
    name: Option<String>,
    error: StoreError,
    remaining: usize,
}

#[derive(Debug, Default)]
struct MemoryState {
    objects: BTreeMap<ResourceKey, Value>,
    last_version: u64,
    writes: Vec<(StoreOp, ResourceKey)>,
    failing: Vec<GroupVersion>,
    failures: Vec<InjectedFailure>,
    stalled_kinds: HashSet<String>,
    unreachable: bool,
}

/// Thread-safe in-memory store
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an object as if someone else created it; not counted as a write
    pub fn seed(&self, resource: Resource) {
        let mut state = self.write();
        let mut obj = resource.into_value();
        state.last_version += 1;
        stamp_new(&mut obj, state.last_version);
        let stalled = state.stalled_kinds.contains(kind_of(&obj));
        if !stalled {
            settle_status(&mut obj);
        }
        if let Ok(res) = Resource::from_value(obj.clone()) {
            state.objects.insert(res.key(), obj);
        }
    }

    /// Number of create/update/delete calls that reached the store
    pub fn write_count(&self) -> usize {
        self.read().writes.len()
    }

    /// Successful writes in the order they happened
    pub fn writes(&self) -> Vec<(StoreOp, ResourceKey)> {
        self.read().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.write().writes.clear();
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.read().objects.contains_key(key)
    }

    pub fn object(&self, key: &ResourceKey) -> Option<Value> {
        self.read().objects.get(key).cloned()
    }

    /// All stored objects in key order
    pub fn objects(&self) -> Vec<Resource> {
        self.read()
            .objects
            .values()
            .filter_map(|obj| Resource::from_value(obj.clone()).ok())
            .collect()
    }

    pub fn set_failing_group_versions(&self, gvs: Vec<GroupVersion>) {
        self.write().failing = gvs;
    }

    /// Fail the next `times` calls of `op` (optionally only for objects named `name`)
    pub fn fail(&self, op: StoreOp, name: Option<&str>, error: StoreError, times: usize) {
        self.write().failures.push(InjectedFailure {
            op,
            name: name.map(str::to_string),
            error,
            remaining: times,
        });
    }

    /// Every call fails with `Unavailable` while set
    pub fn set_unreachable(&self, unreachable: bool) {
        self.write().unreachable = unreachable;
    }

    /// Objects of this kind never get a settled status (convergence stalls)
    pub fn stall_kind(&self, kind: &str) {
        self.write().stalled_kinds.insert(kind.to_string());
    }

    fn read(&self) -> RwLockReadGuard<'_, MemoryState> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, MemoryState> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_failure(&self, op: StoreOp, name: Option<&str>) -> Result<(), StoreError> {
        let mut state = self.write();
        if state.unreachable {
            return Err(StoreError::Unavailable("store is unreachable".to_string()));
        }
        let hit = state.failures.iter_mut().find(|f| {
            f.op == op && f.remaining > 0 && (f.name.is_none() || f.name.as_deref() == name)
        });
        match hit {
            Some(failure) => {
                failure.remaining -= 1;
                Err(failure.error.clone())
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn list(&self, selector: &LabelSelector) -> Result<Vec<Resource>, StoreError> {
        self.check_failure(StoreOp::List, None)?;
        let state = self.read();
        Ok(state
            .objects
            .values()
            .filter_map(|obj| Resource::from_value(obj.clone()).ok())
            .filter(|res| selector.matches(&res.labels()))
            .collect())
    }

    async fn get(&self, key: &ResourceKey) -> Result<Option<Resource>, StoreError> {
        self.check_failure(StoreOp::Get, Some(key.name.as_str()))?;
        let state = self.read();
        state
            .objects
            .get(key)
            .map(|obj| Resource::from_value(obj.clone()).map_err(|e| StoreError::Invalid(e.to_string())))
            .transpose()
    }

    async fn create(&self, resource: &Resource) -> Result<Resource, StoreError> {
        self.check_failure(StoreOp::Create, Some(resource.name()))?;
        let key = resource.key();
        let mut state = self.write();
        if state.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists(key.to_string()));
        }
        let mut obj = resource.as_value().clone();
        state.last_version += 1;
        stamp_new(&mut obj, state.last_version);
        if !state.stalled_kinds.contains(&key.kind) {
            settle_status(&mut obj);
        }
        state.objects.insert(key.clone(), obj.clone());
        state.writes.push((StoreOp::Create, key));
        Resource::from_value(obj).map_err(|e| StoreError::Invalid(e.to_string()))
    }

    async fn update(&self, resource: &Resource) -> Result<Resource, StoreError> {
        self.check_failure(StoreOp::Update, Some(resource.name()))?;
        let key = resource.key();
        let mut state = self.write();
        let current = state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;

        let current_version = current["metadata"]["resourceVersion"].as_str().unwrap_or_default();
        if let Some(rv) = resource.resource_version() {
            if rv != current_version {
                return Err(StoreError::Conflict(format!(
                    "{}: resourceVersion {} is stale (current {})",
                    key, rv, current_version
                )));
            }
        }

        let mut obj = resource.as_value().clone();
        let spec_changed = without_meta(&obj) != without_meta(&current);
        let generation = current["metadata"]["generation"].as_i64().unwrap_or(1)
            + i64::from(spec_changed);

        state.last_version += 1;
        let version = state.last_version;
        {
            let root = ensure_object(&mut obj);
            if let Some(status) = current.get("status") {
                root.insert("status".to_string(), status.clone());
            }
            let metadata = ensure_object(root.entry("metadata").or_insert(Value::Null));
            for field in ["uid", "creationTimestamp"] {
                if let Some(v) = current["metadata"].get(field) {
                    metadata.insert(field.to_string(), v.clone());
                }
            }
            metadata.insert("generation".to_string(), json!(generation));
            metadata.insert("resourceVersion".to_string(), json!(version.to_string()));
        }
        if !state.stalled_kinds.contains(&key.kind) {
            settle_status(&mut obj);
        }
        state.objects.insert(key.clone(), obj.clone());
        state.writes.push((StoreOp::Update, key));
        Resource::from_value(obj).map_err(|e| StoreError::Invalid(e.to_string()))
    }

    async fn delete(&self, key: &ResourceKey) -> Result<(), StoreError> {
        self.check_failure(StoreOp::Delete, Some(key.name.as_str()))?;
        let mut state = self.write();
        if state.objects.remove(key).is_none() {
            return Err(StoreError::NotFound(key.to_string()));
        }
        if key.group.is_empty() && key.kind == "Namespace" {
            state.objects.retain(|k, _| k.namespace != key.name);
        }
        state.writes.push((StoreOp::Delete, key.clone()));
        Ok(())
    }

    async fn failing_group_versions(&self) -> Result<Vec<GroupVersion>, StoreError> {
        self.check_failure(StoreOp::List, None)?;
        Ok(self.read().failing.clone())
    }
}

fn kind_of(obj: &Value) -> &str {
    obj["kind"].as_str().unwrap_or_default()
}

fn without_meta(obj: &Value) -> Value {
    let mut copy = obj.clone();
    if let Some(map) = copy.as_object_mut() {
        map.remove("metadata");
        map.remove("status");
    }
    copy
}

fn stamp_new(obj: &mut Value, version: u64) {
    let root = ensure_object(obj);
    root.remove("status");
    let metadata = ensure_object(root.entry("metadata").or_insert(Value::Null));
    metadata.insert("resourceVersion".to_string(), json!(version.to_string()));
    metadata.insert("uid".to_string(), json!(uuid::Uuid::new_v4().to_string()));
    metadata.insert("generation".to_string(), json!(1));
    metadata.insert(
        "creationTimestamp".to_string(),
        json!(chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
    );
}

/// Fill in the status a controller would eventually report
fn settle_status(obj: &mut Value) {
    let generation = obj["metadata"]["generation"].as_i64().unwrap_or(1);
    let replicas = obj["spec"]["replicas"].as_i64().unwrap_or(1);

    let status = match WellKnownKind::parse_optional(kind_of(obj)) {
        Some(WellKnownKind::Namespace) => json!({"phase": "Active"}),
        Some(WellKnownKind::CustomResourceDefinition) => json!({
            "conditions": [
                {"type": "NamesAccepted", "status": "True"},
                {"type": "Established", "status": "True"}
            ]
        }),
        Some(WellKnownKind::Deployment)
        | Some(WellKnownKind::StatefulSet)
        | Some(WellKnownKind::ReplicaSet) => json!({
            "observedGeneration": generation,
            "replicas": replicas,
            "updatedReplicas": replicas,
            "currentReplicas": replicas,
            "readyReplicas": replicas,
            "availableReplicas": replicas
        }),
        Some(WellKnownKind::DaemonSet) => json!({
            "observedGeneration": generation,
            "currentNumberScheduled": 1,
            "desiredNumberScheduled": 1,
            "numberMisscheduled": 0,
            "numberReady": 1,
            "numberAvailable": 1,
            "updatedNumberScheduled": 1
        }),
        Some(WellKnownKind::Job) => json!({
            "succeeded": 1,
            "conditions": [{"type": "Complete", "status": "True"}]
        }),
        Some(WellKnownKind::PersistentVolumeClaim) => json!({"phase": "Bound"}),
        Some(WellKnownKind::ApiService) => json!({
            "conditions": [{"type": "Available", "status": "True"}]
        }),
        _ => return,
    };

    ensure_object(obj).insert("status".to_string(), status);
}
