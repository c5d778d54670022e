//! Deploying a manifest as an app

use std::collections::BTreeSet;
use std::fmt::Write as _;

use tracing::info;

use super::app_service::AppService;
use crate::app::{self, AppMeta, Touch};
use crate::apply::{ApplyEvent, ClusterChangeSet};
use crate::diff::{ChangeOp, ChangeSet, ChangeSetOpts};
use crate::diffgraph::ChangeGraph;
use crate::error::Result;
use crate::models::annotations;
use crate::resources::{
    AllAndMatchingOpts, GroupVersion, LabelMod, LabeledResources, Preparation, Resource,
    parse_manifest,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployOutcome {
    /// Nothing needed to be applied
    pub no_changes: bool,
    pub applied: usize,
    /// Ignored changes left alone
    pub skipped: usize,
    /// History entries removed by retention
    pub pruned_history: usize,
}

/// Calculated changes plus what the app record needs to know about them
///
/// Produced by [`AppService::plan_deploy`] without writing anything and
/// consumed by [`AppService::apply_plan`].
pub struct DeployPlan {
    meta: AppMeta,
    /// The record has to be created before applying
    new_app: bool,
    graph: ChangeGraph,
    used_group_versions: Vec<GroupVersion>,
    namespaces: Vec<String>,
}

impl DeployPlan {
    pub fn graph(&self) -> &ChangeGraph {
        &self.graph
    }

    /// Nothing left to apply once ignored changes are set aside
    pub fn is_noop(&self, apply_ignored: bool) -> bool {
        self.graph.is_empty() || (self.graph.all_ignored() && !apply_ignored)
    }
}

impl AppService {
    /// Deploy manifest bytes (YAML or JSON documents) as app `name`
    pub async fn deploy(&self, name: &str, namespace: &str, manifest: &[u8]) -> Result<DeployOutcome> {
        let resources = parse_manifest(manifest)?;
        self.deploy_resources(name, namespace, resources).await
    }

    pub async fn deploy_resources(
        &self,
        name: &str,
        namespace: &str,
        resources: Vec<Resource>,
    ) -> Result<DeployOutcome> {
        let plan = self.plan_deploy(name, namespace, resources).await?;
        self.apply_plan(name, namespace, plan).await
    }

    /// Calculate the changes a deploy makes; writes nothing
    ///
    /// An app that does not exist yet is planned with a fresh ownership label
    /// which [`AppService::apply_plan`] persists.
    pub async fn plan_deploy(&self, name: &str, namespace: &str, resources: Vec<Resource>) -> Result<DeployPlan> {
        let app = self.app(name, namespace);
        let (meta, new_app) = match app.meta().await? {
            Some(meta) => (meta, false),
            None => (AppMeta::fresh(), true),
        };
        self.plan(meta, new_app, namespace, resources).await
    }

    /// Apply a plan from [`AppService::plan_deploy`], creating the app record if needed
    pub async fn apply_plan(&self, name: &str, namespace: &str, plan: DeployPlan) -> Result<DeployOutcome> {
        let app = self.app(name, namespace);
        if plan.new_app {
            let meta = AppMeta {
                used_group_versions: plan.used_group_versions.clone(),
                ..plan.meta.clone()
            };
            app.create(&meta).await?;
        }

        if plan.is_noop(self.apply_opts.apply_ignored) {
            info!("No changes for {}", app.description());
            return Ok(DeployOutcome {
                no_changes: true,
                skipped: plan.graph.len(),
                ..Default::default()
            });
        }

        if !plan.new_app && plan.meta.used_group_versions != plan.used_group_versions {
            app.update_used_group_versions(plan.used_group_versions.clone())
                .await?;
        }

        let description = format!("deploy: {}", op_counts(&plan.graph));
        info!("Applying {} for {}", description, app.description());

        let required = plan.used_group_versions.clone();
        let change_set = ClusterChangeSet::new(self.store.as_ref(), &self.apply_opts, &self.events);
        let summary = Touch::new(&app, description, plan.namespaces)
            .ignore_success_err(true)
            .run(change_set.apply(plan.graph, required))
            .await?;

        let pruned = app.gc_changes(self.config.history.retention).await?;
        if pruned > 0 {
            self.events.emit(ApplyEvent::HistoryPruned { removed: pruned });
        }

        Ok(DeployOutcome {
            no_changes: false,
            applied: summary.applied,
            skipped: summary.skipped,
            pruned_history: pruned,
        })
    }

    /// Changes a deploy would apply, without writing anything
    pub async fn diff(&self, name: &str, namespace: &str, resources: Vec<Resource>) -> Result<ChangeGraph> {
        Ok(self.plan_deploy(name, namespace, resources).await?.graph)
    }

    async fn plan(
        &self,
        meta: AppMeta,
        new_app: bool,
        namespace: &str,
        resources: Vec<Resource>,
    ) -> Result<DeployPlan> {
        let prepared = Preparation::new(namespace).prepare(resources)?;
        let mut desired = self.filter.apply(prepared);

        let ownership = &self.config.ownership;
        let labeled = LabeledResources::new(&meta.label_key, &meta.label_value, self.store.clone());
        let override_conflicts = ownership.skip_ownership_check;
        labeled.prepare(
            &mut desired,
            &LabelMod::ownership_defaults(),
            &LabelMod::scoping_defaults(),
            &ownership.additional_labels,
            &|_, _| override_conflicts,
        )?;

        let opts = AllAndMatchingOpts {
            skip_ownership_check: ownership.skip_ownership_check,
            blacklisted_label_keys: vec![
                annotations::IS_APP_LABEL.to_string(),
                annotations::IS_APP_CHANGE_LABEL.to_string(),
            ],
            known_owners: app::known_owners(self.store.as_ref()).await?,
        };
        let existing = self.filter.apply(labeled.all_and_matching(&desired, &opts).await?);

        let used_group_versions: Vec<GroupVersion> = existing
            .iter()
            .chain(desired.iter())
            .map(Resource::group_version)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let changes = ChangeSet::new(
            existing,
            desired,
            ChangeSetOpts {
                against_last_applied: self.config.apply.against_last_applied,
                allow_empty: self.config.allow_empty,
            },
        )
        .calculate()?;

        let namespaces: Vec<String> = changes
            .iter()
            .map(|c| c.resource().namespace().to_string())
            .filter(|ns| !ns.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        Ok(DeployPlan {
            graph: ChangeGraph::build(changes)?,
            meta,
            new_app,
            used_group_versions,
            namespaces,
        })
    }
}

/// `2 create, 1 update, 0 delete`
pub fn op_counts(graph: &ChangeGraph) -> String {
    let count = |op: ChangeOp| graph.changes().filter(|c| c.op() == op).count();
    format!(
        "{} create, {} update, {} delete",
        count(ChangeOp::Add),
        count(ChangeOp::Update),
        count(ChangeOp::Delete)
    )
}

/// Human-readable plan: batches in order, with patch operations of updates
pub fn render_plan(graph: &ChangeGraph) -> String {
    let batches = graph.batches();
    let mut out = String::new();
    for (i, batch) in batches.iter().enumerate() {
        let _ = writeln!(out, "batch {}/{}", i + 1, batches.len());
        for change in batch {
            let marker = if change.is_ignored() { " (ignored)" } else { "" };
            let _ = writeln!(out, "  {}{}", change.description(), marker);
            for line in change.patch_summary() {
                let _ = writeln!(out, "    {}", line);
            }
        }
    }
    let _ = writeln!(out, "Op: {}", op_counts(graph));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_render_plan() {
        let store = MemoryStore::new();
        store.seed(
            Resource::from_value(serde_json::json!({
                "apiVersion": "v1", "kind": "ConfigMap",
                "metadata": {"name": "cm2", "namespace": "ns1", "labels": {"kapply.dev/app": "fixed"}},
                "data": {"a": "1"}
            }))
            .unwrap(),
        );
        let service = AppService::new(Arc::new(store), Config::default());
        let meta = AppMeta {
            label_value: "fixed".to_string(),
            ..AppMeta::fresh()
        };
        let resources = parse_manifest(
            br#"
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
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: cm2
  namespace: ns1
data:
  a: "2"
"#,
        )
        .unwrap();

        let plan = service.plan(meta, false, "default", resources).await.unwrap();
        insta::assert_snapshot!(render_plan(&plan.graph), @r"
        batch 1/2
          create namespace/ns1 (v1) cluster
        batch 2/2
          create configmap/cm1 (v1) namespace: ns1
          update configmap/cm2 (v1) namespace: ns1
            replace /data/a
        Op: 2 create, 1 update, 0 delete
        ");
    }
}
