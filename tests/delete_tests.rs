//! Deleting apps against the in-memory store

use std::sync::Arc;
use std::time::Duration;

use kapply::apply::{ApplyOpts, WaitPolicy};
use kapply::config::Config;
use kapply::resources::ResourceFilter;
use kapply::{AppService, MemoryStore, ResourceKey};

const MANIFEST: &[u8] = br#"
apiVersion: v1
kind: Namespace
metadata:
  name: ns1
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: cm1
  namespace: ns1
data:
  key: one
"#;

const WITH_TRANSIENT_PVC: &[u8] = br#"
apiVersion: v1
kind: ConfigMap
metadata:
  name: cm1
  namespace: ns1
---
apiVersion: v1
kind: PersistentVolumeClaim
metadata:
  name: data
  namespace: ns1
  annotations:
    kapply.dev/owned-for-deletion: ""
spec:
  accessModes: ["ReadWriteOnce"]
  resources:
    requests:
      storage: 1Gi
"#;

fn service(store: &Arc<MemoryStore>) -> AppService {
    AppService::new(store.clone(), Config::default()).with_apply_opts(ApplyOpts {
        wait_policy: WaitPolicy {
            check_interval: Duration::from_millis(10),
            timeout: Duration::from_millis(300),
        },
        retry_backoff: Duration::from_millis(1),
        ..ApplyOpts::default()
    })
}

#[tokio::test]
async fn test_full_delete_removes_resources_and_record() {
    let store = Arc::new(MemoryStore::new());
    let service = service(&store);
    service.deploy("web", "apps", MANIFEST).await.unwrap();

    let outcome = service.delete("web", "apps").await.unwrap();
    assert!(outcome.fully_deleted);
    assert!(!service.exists("web", "apps").await.unwrap());
    // no app resources, record or history left behind
    assert!(store.objects().is_empty());
}

#[tokio::test]
async fn test_transient_resource_survives_and_app_is_kept() {
    let store = Arc::new(MemoryStore::new());
    let service = service(&store);
    service
        .deploy("web", "apps", WITH_TRANSIENT_PVC)
        .await
        .unwrap();

    let outcome = service.delete("web", "apps").await.unwrap();
    assert!(!outcome.fully_deleted);
    assert!(service.exists("web", "apps").await.unwrap());
    assert!(store.contains(&ResourceKey::new("", "PersistentVolumeClaim", "ns1", "data")));
    assert!(!store.contains(&ResourceKey::new("", "ConfigMap", "ns1", "cm1")));
}

#[tokio::test]
async fn test_delete_of_absent_app_is_a_noop() {
    let store = Arc::new(MemoryStore::new());
    let outcome = service(&store).delete("missing", "apps").await.unwrap();
    assert!(outcome.fully_deleted);
    assert_eq!(store.write_count(), 0);
}

#[tokio::test]
async fn test_filtered_delete_is_partial() {
    let store = Arc::new(MemoryStore::new());
    service(&store).deploy("web", "apps", MANIFEST).await.unwrap();

    let only_configmaps = ResourceFilter {
        kinds: vec!["ConfigMap".to_string()],
        ..ResourceFilter::default()
    };
    let outcome = service(&store)
        .with_filter(only_configmaps)
        .delete("web", "apps")
        .await
        .unwrap();

    assert!(!outcome.fully_deleted);
    assert!(!store.contains(&ResourceKey::new("", "ConfigMap", "ns1", "cm1")));
    assert!(store.contains(&ResourceKey::new("", "Namespace", "", "ns1")));
    assert!(service(&store).exists("web", "apps").await.unwrap());
}
