//! Deleting an app and the resources it owns

use tracing::info;

use super::app_service::AppService;
use crate::app::Touch;
use crate::apply::ClusterChangeSet;
use crate::diff::{ChangeSet, ChangeSetOpts};
use crate::diffgraph::ChangeGraph;
use crate::error::Result;
use crate::resources::LabeledResources;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteOutcome {
    /// The app record was removed; `false` when some owned resources had to
    /// stay behind (transient, filtered out or ignored)
    pub fully_deleted: bool,
}

impl AppService {
    pub async fn delete(&self, name: &str, namespace: &str) -> Result<DeleteOutcome> {
        let app = self.app(name, namespace);
        let Some(meta) = app.meta().await? else {
            info!("{} does not exist, nothing to delete", app.description());
            return Ok(DeleteOutcome {
                fully_deleted: true,
            });
        };

        let labeled =
            LabeledResources::new(&meta.label_key, &meta.label_value, self.store.clone());
        let owned = labeled.list().await?;
        let owned_count = owned.len();
        let selected = self.filter.apply(owned);

        let mut partial = selected.len() != owned_count;
        if selected.iter().any(|r| r.is_transient()) {
            partial = true;
        }
        if !self.apply_opts.apply_ignored && selected.iter().any(|r| r.is_ignored()) {
            partial = true;
        }

        let changes = ChangeSet::new(
            selected,
            Vec::new(),
            ChangeSetOpts {
                against_last_applied: self.config.apply.against_last_applied,
                allow_empty: true,
            },
        )
        .calculate()?;
        let graph = ChangeGraph::build(changes)?;

        if !graph.is_empty() {
            let description = format!("delete: {} resource(s)", graph.len());
            let namespaces = namespaces_of(&graph);
            let change_set = ClusterChangeSet::new(self.store.as_ref(), &self.apply_opts, &self.events);
            Touch::new(&app, description, namespaces)
                .ignore_success_err(true)
                .run(change_set.apply(graph, meta.used_group_versions.clone()))
                .await?;
        }

        if partial {
            info!(
                "Keeping {} since some of its resources were not deleted",
                app.description()
            );
            return Ok(DeleteOutcome {
                fully_deleted: false,
            });
        }

        app.delete().await?;
        Ok(DeleteOutcome {
            fully_deleted: true,
        })
    }
}

fn namespaces_of(graph: &ChangeGraph) -> Vec<String> {
    let mut namespaces: Vec<String> = graph
        .changes()
        .map(|c| c.resource().namespace().to_string())
        .filter(|ns| !ns.is_empty())
        .collect();
    namespaces.sort();
    namespaces.dedup();
    namespaces
}
