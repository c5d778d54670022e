//! Change history recorded for every deploy and its retention

use std::sync::Arc;
use std::time::Duration;

use kapply::app::App;
use kapply::apply::{ApplyOpts, WaitPolicy};
use kapply::config::Config;
use kapply::store::StoreOp;
use kapply::{ApplyEvent, AppService, EventSink, MemoryStore, StoreError};

fn manifest(value: usize) -> String {
    format!(
        "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cm1\n  namespace: ns1\ndata:\n  key: \"{}\"\n",
        value
    )
}

fn service(store: &Arc<MemoryStore>, retention: usize) -> AppService {
    let mut config = Config::default();
    config.history.retention = retention;
    AppService::new(store.clone(), config).with_apply_opts(ApplyOpts {
        wait_policy: WaitPolicy {
            check_interval: Duration::from_millis(10),
            timeout: Duration::from_millis(300),
        },
        ..ApplyOpts::default()
    })
}

#[tokio::test]
async fn test_history_beyond_retention_is_pruned() {
    let store = Arc::new(MemoryStore::new());
    let (events, mut rx) = EventSink::channel();
    let service = service(&store, 2).with_events(events);

    let mut pruned = 0;
    for value in 0..4 {
        let outcome = service
            .deploy("web", "apps", manifest(value).as_bytes())
            .await
            .unwrap();
        pruned += outcome.pruned_history;
        // distinct start timestamps keep the history order stable
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(pruned, 2);

    let mut pruned_events = 0;
    while let Ok(event) = rx.try_recv() {
        if let ApplyEvent::HistoryPruned { removed } = event {
            pruned_events += removed;
        }
    }
    assert_eq!(pruned_events, 2);

    let changes = App::new("web", "apps", store.clone()).changes().await.unwrap();
    assert_eq!(changes.len(), 2);
    assert!(changes.iter().all(|c| c.meta().successful == Some(true)));
    assert!(changes[0].meta().started_at <= changes[1].meta().started_at);
}

#[tokio::test]
async fn test_failed_deploy_is_recorded() {
    let store = Arc::new(MemoryStore::new());
    store.fail(
        StoreOp::Create,
        Some("cm1"),
        StoreError::Invalid("spec is not valid".to_string()),
        1,
    );

    let err = service(&store, 200)
        .deploy("web", "apps", manifest(1).as_bytes())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("spec is not valid"));

    let changes = App::new("web", "apps", store.clone()).changes().await.unwrap();
    assert_eq!(changes.len(), 1);
    let meta = changes[0].meta();
    assert_eq!(meta.successful, Some(false));
    assert!(meta.finished_at.is_some());
    assert_eq!(meta.namespaces, vec!["ns1".to_string()]);
    assert!(meta.description.starts_with("deploy: 1 create"));

    let app_meta = App::new("web", "apps", store.clone()).meta().await.unwrap().unwrap();
    assert_eq!(app_meta.last_change.as_ref(), Some(meta));
}

#[tokio::test]
async fn test_unchanged_deploy_adds_no_history() {
    let store = Arc::new(MemoryStore::new());
    let service = service(&store, 200);
    service
        .deploy("web", "apps", manifest(1).as_bytes())
        .await
        .unwrap();
    service
        .deploy("web", "apps", manifest(1).as_bytes())
        .await
        .unwrap();

    let changes = App::new("web", "apps", store.clone()).changes().await.unwrap();
    assert_eq!(changes.len(), 1);
}
