//! Change graph
//!
//! A DAG over changes where an edge `a → b` means `a` must be applied (and
//! converged) before `b` starts. Edges from annotations, namespaces and CRDs
//! are mandatory; a cycle among them is a configuration error. Owner edges
//! are best effort and dropped when they would close a cycle.

use std::collections::BTreeSet;

use petgraph::Direction;
use petgraph::algo::{has_path_connecting, tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use tracing::debug;

use super::rules::{self, ChangeRule, RuleOrder};
use crate::diff::Change;
use crate::error::{Error, Result};
use crate::models::WellKnownKind;
use crate::resources::GroupVersion;

/// Why one change waits for another
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Rule,
    Namespace,
    CustomResource,
    Owner,
}

impl EdgeKind {
    pub fn is_mandatory(&self) -> bool {
        !matches!(self, EdgeKind::Owner)
    }
}

#[derive(Debug)]
pub struct ChangeGraph {
    graph: DiGraph<Change, EdgeKind>,
}

impl ChangeGraph {
    pub fn build(mut changes: Vec<Change>) -> Result<Self> {
        // node indices follow identity order, which keeps batches lexical
        changes.sort_by(|a, b| a.key().cmp(&b.key()));

        let groups = changes
            .iter()
            .map(rules::groups_of)
            .collect::<Result<Vec<_>>>()?;
        let declared = changes
            .iter()
            .map(rules::rules_of)
            .collect::<Result<Vec<_>>>()?;

        let mut graph = DiGraph::new();
        let nodes: Vec<NodeIndex> = changes.into_iter().map(|c| graph.add_node(c)).collect();

        for (i, rules) in declared.iter().enumerate() {
            for rule in rules {
                add_rule_edges(&mut graph, &nodes, &groups, i, rule);
            }
        }
        add_structural_edges(&mut graph, &nodes);

        if toposort(&graph, None).is_err() {
            return Err(cycle_error(&graph));
        }

        add_owner_edges(&mut graph, &nodes);

        debug!(
            "Built change graph with {} changes and {} edges",
            graph.node_count(),
            graph.edge_count()
        );
        Ok(Self { graph })
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn changes(&self) -> impl Iterator<Item = &Change> {
        self.graph.node_weights()
    }

    /// Whether every change is ignored (nothing would be applied by default)
    pub fn all_ignored(&self) -> bool {
        self.changes().all(Change::is_ignored)
    }

    /// `(before, after, kind)` for every edge, as change descriptions
    pub fn edges(&self) -> Vec<(String, String, EdgeKind)> {
        self.graph
            .edge_references()
            .map(|edge| {
                (
                    self.graph[edge.source()].description(),
                    self.graph[edge.target()].description(),
                    *edge.weight(),
                )
            })
            .collect()
    }

    pub fn batches(&self) -> Vec<Vec<&Change>> {
        self.batch_indices()
            .into_iter()
            .map(|batch| batch.into_iter().map(|n| &self.graph[n]).collect())
            .collect()
    }

    pub fn into_batches(self) -> Vec<Vec<Change>> {
        let batches = self.batch_indices();
        let (nodes, _) = self.graph.into_nodes_edges();
        let mut slots: Vec<Option<Change>> = nodes.into_iter().map(|n| Some(n.weight)).collect();

        batches
            .into_iter()
            .map(|batch| {
                batch
                    .into_iter()
                    .filter_map(|n| slots[n.index()].take())
                    .collect()
            })
            .collect()
    }

    /// Kahn layering. Among ready changes, upserts go first; deletes only run
    /// in a layer of their own once no upsert is ready.
    fn batch_indices(&self) -> Vec<Vec<NodeIndex>> {
        let mut indegree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|n| self.graph.neighbors_directed(n, Direction::Incoming).count())
            .collect();
        let mut remaining: BTreeSet<NodeIndex> = self.graph.node_indices().collect();
        let mut batches = Vec::new();

        while !remaining.is_empty() {
            let ready: Vec<NodeIndex> = remaining
                .iter()
                .copied()
                .filter(|n| indegree[n.index()] == 0)
                .collect();
            if ready.is_empty() {
                break;
            }

            let upserts: Vec<NodeIndex> = ready
                .iter()
                .copied()
                .filter(|n| self.graph[*n].op().is_upsert())
                .collect();
            let batch = if upserts.is_empty() { ready } else { upserts };

            for n in &batch {
                remaining.remove(n);
                for next in self.graph.neighbors_directed(*n, Direction::Outgoing) {
                    indegree[next.index()] -= 1;
                }
            }
            batches.push(batch);
        }

        batches
    }
}

fn add_rule_edges(
    graph: &mut DiGraph<Change, EdgeKind>,
    nodes: &[NodeIndex],
    groups: &[BTreeSet<String>],
    from: usize,
    rule: &ChangeRule,
) {
    if !rule.action.matches(graph[nodes[from]].op()) {
        return;
    }
    for (other, other_groups) in groups.iter().enumerate() {
        if other == from
            || !other_groups.contains(&rule.target_group)
            || !rule.target_action.matches(graph[nodes[other]].op())
        {
            continue;
        }
        match rule.order {
            RuleOrder::Before => graph.update_edge(nodes[from], nodes[other], EdgeKind::Rule),
            RuleOrder::After => graph.update_edge(nodes[other], nodes[from], EdgeKind::Rule),
        };
    }
}

/// Namespace and CRD changes wrap the changes of what they contain: upserts
/// of the container come first, deletes of the container come last.
fn add_structural_edges(graph: &mut DiGraph<Change, EdgeKind>, nodes: &[NodeIndex]) {
    let mut edges = Vec::new();

    for &container in nodes {
        let change = &graph[container];
        let res = change.resource();
        let contains: Box<dyn Fn(&Change) -> bool> = match res.well_known_kind() {
            Some(WellKnownKind::Namespace) if res.group().is_empty() => {
                let ns = res.name().to_string();
                Box::new(move |other: &Change| other.key().namespace == ns)
            }
            Some(WellKnownKind::CustomResourceDefinition) => {
                let group = res.field(&["spec", "group"]).and_then(|v| v.as_str());
                let kind = res.field(&["spec", "names", "kind"]).and_then(|v| v.as_str());
                let (Some(group), Some(kind)) = (group, kind) else {
                    continue;
                };
                let (group, kind) = (group.to_string(), kind.to_string());
                Box::new(move |other: &Change| {
                    let key = other.key();
                    key.group == group && key.kind == kind
                })
            }
            _ => continue,
        };
        let edge_kind = if res.well_known_kind() == Some(WellKnownKind::Namespace) {
            EdgeKind::Namespace
        } else {
            EdgeKind::CustomResource
        };

        for &member in nodes {
            if member == container || !contains(&graph[member]) {
                continue;
            }
            let (container_op, member_op) = (change.op(), graph[member].op());
            if container_op.is_upsert() && member_op.is_upsert() {
                edges.push((container, member, edge_kind));
            } else if !container_op.is_upsert() && !member_op.is_upsert() {
                edges.push((member, container, edge_kind));
            }
        }
    }

    for (from, to, kind) in edges {
        graph.update_edge(from, to, kind);
    }
}

/// Owners before dependents, unless the edge would close a cycle
fn add_owner_edges(graph: &mut DiGraph<Change, EdgeKind>, nodes: &[NodeIndex]) {
    let mut candidates = Vec::new();
    for &dependent in nodes {
        let change = &graph[dependent];
        if !change.op().is_upsert() {
            continue;
        }
        let key = change.key();
        for owner_ref in change.resource().owner_references() {
            let owner_group = GroupVersion::from_api_version(&owner_ref.api_version).group;
            let owner = nodes.iter().copied().find(|&n| {
                let other = &graph[n];
                let other_key = other.key();
                n != dependent
                    && other.op().is_upsert()
                    && other_key.kind == owner_ref.kind
                    && other_key.name == owner_ref.name
                    && other_key.group == owner_group
                    && (other_key.namespace == key.namespace || other_key.namespace.is_empty())
            });
            if let Some(owner) = owner {
                candidates.push((owner, dependent));
            }
        }
    }

    for (owner, dependent) in candidates {
        if has_path_connecting(&*graph, dependent, owner, None) {
            debug!(
                "Skipping owner edge {} -> {}: would create a cycle",
                graph[owner].description(),
                graph[dependent].description()
            );
            continue;
        }
        graph.update_edge(owner, dependent, EdgeKind::Owner);
    }
}

fn cycle_error(graph: &DiGraph<Change, EdgeKind>) -> Error {
    let mut changes: Vec<String> = tarjan_scc(graph)
        .into_iter()
        .filter(|component| component.len() > 1)
        .flatten()
        .map(|n| graph[n].description())
        .collect();
    changes.sort();
    Error::CyclicGraph { changes }
}
