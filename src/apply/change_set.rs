//! Batch execution of a change graph

use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::{debug, info};

use super::cluster_change::{ApplyContext, ClusterChange, UpdateStrategy, WaitPolicy};
use super::events::{ApplyEvent, EventSink};
use super::failing_api_services::FailingApiServicesPolicy;
use crate::diff::Change;
use crate::diffgraph::ChangeGraph;
use crate::error::Result;
use crate::resources::GroupVersion;
use crate::store::ResourceStore;

#[derive(Debug, Clone)]
pub struct ApplyOpts {
    /// Changes in flight at once within a batch
    pub concurrency: usize,
    /// Wait for convergence after submitting
    pub wait: bool,
    pub wait_policy: WaitPolicy,
    pub max_retries: usize,
    /// Grows linearly with each retry attempt
    pub retry_backoff: Duration,
    pub apply_ignored: bool,
    pub wait_ignored: bool,
    pub ignore_failing_api_services: bool,
    pub default_update_strategy: UpdateStrategy,
}

impl Default for ApplyOpts {
    fn default() -> Self {
        Self {
            concurrency: 5,
            wait: true,
            wait_policy: WaitPolicy::default(),
            max_retries: 3,
            retry_backoff: Duration::from_secs(1),
            apply_ignored: false,
            wait_ignored: false,
            ignore_failing_api_services: false,
            default_update_strategy: UpdateStrategy::Update,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub batches: usize,
    pub applied: usize,
    pub skipped: usize,
}

pub struct ClusterChangeSet<'a> {
    store: &'a dyn ResourceStore,
    opts: &'a ApplyOpts,
    events: &'a EventSink,
}

impl<'a> ClusterChangeSet<'a> {
    pub fn new(store: &'a dyn ResourceStore, opts: &'a ApplyOpts, events: &'a EventSink) -> Self {
        Self {
            store,
            opts,
            events,
        }
    }

    /// Apply the graph batch by batch. A batch runs to completion even when
    /// one of its changes fails; later batches are not started.
    pub async fn apply(
        &self,
        graph: ChangeGraph,
        required: impl IntoIterator<Item = GroupVersion>,
    ) -> Result<ApplySummary> {
        let mut policy = FailingApiServicesPolicy::new(self.opts.ignore_failing_api_services);
        policy.mark_required(required);

        let ctx = ApplyContext {
            store: self.store,
            events: self.events,
            wait: self.opts.wait_policy,
            max_retries: self.opts.max_retries,
            retry_backoff: self.opts.retry_backoff,
        };

        let batches = graph.into_batches();
        let total = batches.len();
        let mut summary = ApplySummary::default();

        for (index, batch) in batches.into_iter().enumerate() {
            let (to_apply, skipped): (Vec<Change>, Vec<Change>) = batch
                .into_iter()
                .partition(|c| self.opts.apply_ignored || !c.is_ignored());

            for change in &skipped {
                debug!("Skipping ignored change: {}", change.description());
                self.events.emit(ApplyEvent::Skipped {
                    op: change.op(),
                    resource: change.resource().description(),
                });
            }
            summary.skipped += skipped.len();
            if to_apply.is_empty() {
                continue;
            }

            policy.refresh(self.store).await;
            for change in &to_apply {
                policy.check(change)?;
            }

            self.events.emit(ApplyEvent::BatchStarted {
                index,
                total,
                changes: to_apply.len(),
            });
            info!("Applying batch {}/{} ({} changes)", index + 1, total, to_apply.len());
            summary.batches += 1;

            let ctx = &ctx;
            let results: Vec<Result<()>> = stream::iter(to_apply)
                .map(|change| {
                    let wait = self.opts.wait && (!change.is_ignored() || self.opts.wait_ignored);
                    let mut cc = ClusterChange::new(change, self.opts.default_update_strategy);
                    async move { cc.execute(ctx, wait).await }
                })
                .buffer_unordered(self.opts.concurrency.max(1))
                .collect()
                .await;

            let mut first_error = None;
            for result in results {
                match result {
                    Ok(()) => summary.applied += 1,
                    Err(e) => {
                        first_error.get_or_insert(e);
                    }
                }
            }
            if let Some(e) = first_error {
                return Err(e);
            }
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::ChangeFactory;
    use crate::error::Error;
    use crate::resources::Resource;
    use crate::store::{MemoryStore, StoreError, StoreOp};
    use serde_json::{Value, json};

    fn fast_opts() -> ApplyOpts {
        ApplyOpts {
            wait_policy: WaitPolicy {
                check_interval: Duration::from_millis(5),
                timeout: Duration::from_millis(200),
            },
            retry_backoff: Duration::from_millis(1),
            ..Default::default()
        }
    }

    fn add(value: Value) -> Change {
        ChangeFactory::default()
            .new_change(None, Some(Resource::from_value(value).unwrap()))
            .unwrap()
    }

    fn namespace_and_configmaps() -> ChangeGraph {
        ChangeGraph::build(vec![
            add(json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "cm1", "namespace": "ns1"}})),
            add(json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "cm2", "namespace": "ns1"}})),
            add(json!({"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": "ns1"}})),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn test_batches_apply_in_order() {
        let store = MemoryStore::new();
        let (events, mut rx) = EventSink::channel();
        let opts = fast_opts();

        let summary = ClusterChangeSet::new(&store, &opts, &events)
            .apply(namespace_and_configmaps(), [])
            .await
            .unwrap();

        assert_eq!(summary, ApplySummary { batches: 2, applied: 3, skipped: 0 });
        let writes = store.writes();
        assert_eq!(writes[0].1.kind, "Namespace");
        assert!(writes[1..].iter().all(|(op, key)| *op == StoreOp::Create && key.kind == "ConfigMap"));
        assert_eq!(
            rx.try_recv().unwrap(),
            ApplyEvent::BatchStarted { index: 0, total: 2, changes: 1 }
        );
    }

    #[tokio::test]
    async fn test_failed_batch_stops_later_batches() {
        let store = MemoryStore::new();
        store.fail(StoreOp::Create, Some("ns1"), StoreError::Invalid("bad".into()), 1);
        let events = EventSink::disabled();
        let opts = fast_opts();

        let err = ClusterChangeSet::new(&store, &opts, &events)
            .apply(namespace_and_configmaps(), [])
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Remote { source: StoreError::Invalid(_), .. }));
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_ignored_changes_are_skipped() {
        let store = MemoryStore::new();
        let events = EventSink::disabled();
        let opts = fast_opts();
        let mut res = Resource::from_value(json!({
            "apiVersion": "v1", "kind": "ConfigMap",
            "metadata": {"name": "cm1", "namespace": "ns1", "annotations": {"kapply.dev/ignore-changes": "true"}}
        }))
        .unwrap();
        res.mark_from_annotations();
        let change = ChangeFactory::default().new_change(None, Some(res)).unwrap();
        let graph = ChangeGraph::build(vec![change]).unwrap();

        let summary = ClusterChangeSet::new(&store, &opts, &events)
            .apply(graph, [])
            .await
            .unwrap();
        assert_eq!(summary, ApplySummary { batches: 0, applied: 0, skipped: 1 });
        assert_eq!(store.write_count(), 0);
    }
}
