//! App records and their change history, persisted as ConfigMaps
//!
//! An app is stored as `ConfigMap/<name>.app` in the app namespace, labeled
//! with [`annotations::IS_APP_LABEL`]. Every deploy or delete attempt adds a
//! `ConfigMap/<name>.change-<id>` labeled with
//! [`annotations::IS_APP_CHANGE_LABEL`]. Metadata lives as JSON under the
//! `spec` data key.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::models::annotations;
use crate::resources::{GroupVersion, LabelSelector, Requirement, Resource, ResourceKey};
use crate::store::ResourceStore;

const DATA_KEY: &str = "spec";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppMeta {
    /// Ownership label stamped on the app's resources
    pub label_key: String,
    pub label_value: String,
    #[serde(default)]
    pub used_group_versions: Vec<GroupVersion>,
    #[serde(default)]
    pub last_change: Option<ChangeMeta>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeMeta {
    pub description: String,
    #[serde(default)]
    pub namespaces: Vec<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// `None` while the attempt is in progress
    #[serde(default)]
    pub successful: Option<bool>,
}

impl AppMeta {
    /// Meta of an app that does not exist yet: owns nothing, new ownership label
    pub fn fresh() -> Self {
        Self {
            label_key: annotations::APP_LABEL.to_string(),
            label_value: uuid::Uuid::new_v4().simple().to_string(),
            used_group_versions: Vec::new(),
            last_change: None,
        }
    }
}

/// Handle to one app record in the store
#[derive(Clone)]
pub struct App {
    name: String,
    namespace: String,
    store: Arc<dyn ResourceStore>,
}

impl App {
    pub fn new(name: &str, namespace: &str, store: Arc<dyn ResourceStore>) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            store,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn description(&self) -> String {
        format!("app '{}' (namespace {})", self.name, self.namespace)
    }

    fn record_key(&self) -> ResourceKey {
        ResourceKey::new("", "ConfigMap", self.namespace.as_str(), format!("{}.app", self.name))
    }

    fn error(&self, reason: impl Into<String>) -> Error {
        Error::AppRecord {
            app: self.description(),
            reason: reason.into(),
        }
    }

    async fn record(&self) -> Result<Option<Resource>> {
        let key = self.record_key();
        self.store
            .get(&key)
            .await
            .map_err(|e| Error::remote("get", key.to_string(), e))
    }

    pub async fn exists(&self) -> Result<bool> {
        Ok(self.record().await?.is_some())
    }

    pub async fn meta(&self) -> Result<Option<AppMeta>> {
        match self.record().await? {
            Some(record) => Ok(Some(self.decode(&record)?)),
            None => Ok(None),
        }
    }

    /// Load the record, creating it with a fresh ownership label when missing
    pub async fn create_or_load(&self) -> Result<AppMeta> {
        if let Some(meta) = self.meta().await? {
            return Ok(meta);
        }
        let meta = AppMeta::fresh();
        self.create(&meta).await?;
        Ok(meta)
    }

    /// Persist a new record carrying `meta`
    pub async fn create(&self, meta: &AppMeta) -> Result<()> {
        let record = self.config_map(
            &self.record_key().name,
            BTreeMap::from([(annotations::IS_APP_LABEL.to_string(), String::new())]),
            meta,
        )?;
        let key = record.key();
        self.store
            .create(&record)
            .await
            .map_err(|e| Error::remote("create", key.to_string(), e))?;
        info!("Created {}", self.description());
        Ok(())
    }

    /// Read-modify-write of the record
    pub async fn update_meta(&self, update: impl FnOnce(&mut AppMeta)) -> Result<AppMeta> {
        let record = self
            .record()
            .await?
            .ok_or_else(|| self.error("record does not exist"))?;
        let mut meta = self.decode(&record)?;
        update(&mut meta);

        let updated = self.with_data(&record, &meta)?;
        let key = updated.key();
        self.store
            .update(&updated)
            .await
            .map_err(|e| Error::remote("update", key.to_string(), e))?;
        Ok(meta)
    }

    /// Remember the outcome of the latest attempt; no-op while the record is absent
    pub async fn record_last_change(&self, change: &ChangeMeta) -> Result<()> {
        if !self.exists().await? {
            return Ok(());
        }
        self.update_meta(|meta| meta.last_change = Some(change.clone()))
            .await
            .map(|_| ())
    }

    pub async fn update_used_group_versions(&self, gvs: Vec<GroupVersion>) -> Result<AppMeta> {
        self.update_meta(|meta| meta.used_group_versions = gvs).await
    }

    /// Start a history entry for an attempt
    pub async fn begin_change(&self, description: &str, namespaces: Vec<String>) -> Result<AppChange> {
        let meta = ChangeMeta {
            description: description.to_string(),
            namespaces,
            started_at: Utc::now(),
            finished_at: None,
            successful: None,
        };
        let id = uuid::Uuid::new_v4().simple().to_string();
        let name = format!("{}.change-{}", self.name, &id[..8]);
        let labels = BTreeMap::from([
            (annotations::IS_APP_CHANGE_LABEL.to_string(), String::new()),
            (annotations::APP_CHANGE_APP_LABEL.to_string(), self.name.clone()),
        ]);
        let record = self.config_map(&name, labels, &meta)?;

        let created = self
            .store
            .create(&record)
            .await
            .map_err(|e| Error::remote("create", record.key().to_string(), e))?;
        debug!("Started history entry {} for {}", name, self.description());

        Ok(AppChange {
            app: self.clone(),
            record: created,
            meta,
        })
    }

    /// History entries, oldest first
    pub async fn changes(&self) -> Result<Vec<AppChange>> {
        let selector = LabelSelector::exists(annotations::IS_APP_CHANGE_LABEL).and(
            Requirement::Equals(annotations::APP_CHANGE_APP_LABEL.to_string(), self.name.clone()),
        );
        let listed = self
            .store
            .list(&selector)
            .await
            .map_err(Error::RemoteList)?;

        let mut changes = Vec::new();
        for record in listed.into_iter().filter(|r| r.namespace() == self.namespace) {
            let meta: ChangeMeta = self.decode(&record)?;
            changes.push(AppChange {
                app: self.clone(),
                record,
                meta,
            });
        }
        changes.sort_by(|a, b| {
            a.meta
                .started_at
                .cmp(&b.meta.started_at)
                .then_with(|| a.record.name().cmp(b.record.name()))
        });
        Ok(changes)
    }

    /// Delete the oldest history entries beyond `max`; returns how many went
    pub async fn gc_changes(&self, max: usize) -> Result<usize> {
        let changes = self.changes().await?;
        if changes.len() <= max {
            return Ok(0);
        }

        let excess = changes.len() - max;
        for change in &changes[..excess] {
            let key = change.record.key();
            match self.store.delete(&key).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(Error::remote("delete", key.to_string(), e)),
            }
        }
        info!("Pruned {} history entries of {}", excess, self.description());
        Ok(excess)
    }

    /// Remove the record together with its history
    pub async fn delete(&self) -> Result<()> {
        for change in self.changes().await? {
            let key = change.record.key();
            match self.store.delete(&key).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(Error::remote("delete", key.to_string(), e)),
            }
        }

        let key = self.record_key();
        match self.store.delete(&key).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(Error::remote("delete", key.to_string(), e)),
        }
        info!("Deleted {}", self.description());
        Ok(())
    }

    fn config_map<T: Serialize>(
        &self,
        name: &str,
        labels: BTreeMap<String, String>,
        data: &T,
    ) -> Result<Resource> {
        let encoded = serde_json::to_string(data).map_err(|e| self.error(e.to_string()))?;
        Resource::from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": name,
                "namespace": self.namespace,
                "labels": labels
            },
            "data": { DATA_KEY: encoded }
        }))
    }

    fn with_data<T: Serialize>(&self, record: &Resource, data: &T) -> Result<Resource> {
        let encoded = serde_json::to_string(data).map_err(|e| self.error(e.to_string()))?;
        let mut value = record.as_value().clone();
        value["data"] = json!({ DATA_KEY: encoded });
        record.with_value(value)
    }

    fn decode<T: DeserializeOwned>(&self, record: &Resource) -> Result<T> {
        let raw = record
            .field(&["data", DATA_KEY])
            .and_then(|v| v.as_str())
            .ok_or_else(|| self.error(format!("{} has no '{}' data", record.name(), DATA_KEY)))?;
        serde_json::from_str(raw)
            .map_err(|e| self.error(format!("{} is malformed: {}", record.name(), e)))
    }
}

/// Owner descriptions of every app in the store, keyed by ownership label value
pub async fn known_owners(store: &dyn ResourceStore) -> Result<BTreeMap<String, String>> {
    let records = store
        .list(&LabelSelector::exists(annotations::IS_APP_LABEL))
        .await
        .map_err(Error::RemoteList)?;

    let mut owners = BTreeMap::new();
    for record in records {
        let Some(name) = record.name().strip_suffix(".app") else {
            continue;
        };
        let Some(meta) = record
            .field(&["data", DATA_KEY])
            .and_then(|v| v.as_str())
            .and_then(|raw| serde_json::from_str::<AppMeta>(raw).ok())
        else {
            continue;
        };
        owners.insert(
            meta.label_value,
            format!("app '{}' (namespace {})", name, record.namespace()),
        );
    }
    Ok(owners)
}

/// One history entry
#[derive(Clone)]
pub struct AppChange {
    app: App,
    record: Resource,
    meta: ChangeMeta,
}

impl AppChange {
    pub fn name(&self) -> &str {
        self.record.name()
    }

    pub fn meta(&self) -> &ChangeMeta {
        &self.meta
    }

    pub async fn succeed(&mut self) -> Result<()> {
        self.finish(true).await
    }

    pub async fn fail(&mut self) -> Result<()> {
        self.finish(false).await
    }

    async fn finish(&mut self, successful: bool) -> Result<()> {
        let mut meta = self.meta.clone();
        meta.finished_at = Some(Utc::now());
        meta.successful = Some(successful);

        let updated = self.app.with_data(&self.record, &meta)?;
        let key = updated.key();
        self.record = self
            .app
            .store
            .update(&updated)
            .await
            .map_err(|e| Error::remote("update", key.to_string(), e))?;
        self.meta = meta;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreOp};

    fn app(store: &MemoryStore) -> App {
        App::new("web", "apps", Arc::new(store.clone()))
    }

    #[tokio::test]
    async fn test_create_or_load_is_stable() {
        let store = MemoryStore::new();
        let app = app(&store);
        assert!(!app.exists().await.unwrap());

        let first = app.create_or_load().await.unwrap();
        let second = app.create_or_load().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.label_key, annotations::APP_LABEL);
        assert_eq!(store.write_count(), 1);

        let record = store
            .object(&ResourceKey::new("", "ConfigMap", "apps", "web.app"))
            .unwrap();
        assert!(record["metadata"]["labels"].get(annotations::IS_APP_LABEL).is_some());
        assert!(record["metadata"]["labels"].get(annotations::APP_LABEL).is_none());
    }

    #[tokio::test]
    async fn test_history_lifecycle_and_gc() {
        let store = MemoryStore::new();
        let app = app(&store);
        app.create_or_load().await.unwrap();

        for i in 0..4 {
            let mut change = app
                .begin_change(&format!("deploy {}", i), vec!["apps".into()])
                .await
                .unwrap();
            change.succeed().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        let changes = app.changes().await.unwrap();
        assert_eq!(changes.len(), 4);
        assert!(changes.iter().all(|c| c.meta().successful == Some(true)));

        assert_eq!(app.gc_changes(2).await.unwrap(), 2);
        let remaining: Vec<String> = app
            .changes()
            .await
            .unwrap()
            .iter()
            .map(|c| c.meta().description.clone())
            .collect();
        assert_eq!(remaining, vec!["deploy 2", "deploy 3"]);
        assert_eq!(app.gc_changes(2).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_removes_history_and_record() {
        let store = MemoryStore::new();
        let app = app(&store);
        app.create_or_load().await.unwrap();
        app.begin_change("deploy", vec![]).await.unwrap();

        app.delete().await.unwrap();
        assert!(!app.exists().await.unwrap());
        assert!(store.objects().is_empty());
        let deletes = store.writes().iter().filter(|(op, _)| *op == StoreOp::Delete).count();
        assert_eq!(deletes, 2);
    }

    #[tokio::test]
    async fn test_known_owners_describe_apps() {
        let store = MemoryStore::new();
        let meta = app(&store).create_or_load().await.unwrap();
        let owners = known_owners(&store).await.unwrap();
        assert_eq!(owners.get(&meta.label_value).unwrap(), "app 'web' (namespace apps)");
    }
}
