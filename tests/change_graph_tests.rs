//! Ordering of changes into batches

use kapply::diff::{Change, ChangeFactory};
use kapply::diffgraph::{ChangeGraph, EdgeKind};
use kapply::{Error, Resource};
use serde_json::{Value, json};

fn add(value: Value) -> Change {
    ChangeFactory::default()
        .new_change(None, Some(Resource::from_value(value).unwrap()))
        .unwrap()
}

fn delete(value: Value) -> Change {
    ChangeFactory::default()
        .new_change(Some(Resource::from_value(value).unwrap()), None)
        .unwrap()
}

fn namespace(name: &str) -> Value {
    json!({"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": name}})
}

fn configmap(name: &str, annotations: Value) -> Value {
    json!({
        "apiVersion": "v1", "kind": "ConfigMap",
        "metadata": {"name": name, "namespace": "ns1", "annotations": annotations}
    })
}

fn crd() -> Value {
    json!({
        "apiVersion": "apiextensions.k8s.io/v1", "kind": "CustomResourceDefinition",
        "metadata": {"name": "widgets.example.com"},
        "spec": {"group": "example.com", "names": {"kind": "Widget", "plural": "widgets"}, "scope": "Namespaced"}
    })
}

fn widget(name: &str) -> Value {
    json!({
        "apiVersion": "example.com/v1", "kind": "Widget",
        "metadata": {"name": name, "namespace": "ns1"}
    })
}

fn batch_names(graph: &ChangeGraph) -> Vec<Vec<String>> {
    graph
        .batches()
        .iter()
        .map(|batch| batch.iter().map(|c| c.key().name).collect())
        .collect()
}

#[test]
fn test_containers_upserted_first_and_deleted_last() {
    let graph = ChangeGraph::build(vec![
        add(widget("w1")),
        add(configmap("cm1", json!({}))),
        add(crd()),
        add(namespace("ns1")),
    ])
    .unwrap();
    assert_eq!(
        batch_names(&graph),
        vec![vec!["ns1", "widgets.example.com"], vec!["cm1", "w1"]]
    );

    let graph = ChangeGraph::build(vec![
        delete(namespace("ns1")),
        delete(configmap("cm1", json!({}))),
    ])
    .unwrap();
    assert_eq!(batch_names(&graph), vec![vec!["cm1"], vec!["ns1"]]);
}

#[test]
fn test_deletes_wait_for_ready_upserts() {
    let graph = ChangeGraph::build(vec![
        delete(configmap("old", json!({}))),
        add(configmap("new", json!({}))),
    ])
    .unwrap();
    assert_eq!(batch_names(&graph), vec![vec!["new"], vec!["old"]]);
}

#[test]
fn test_change_rules_order_groups() {
    let graph = ChangeGraph::build(vec![
        add(configmap(
            "app",
            json!({"kapply.dev/change-rule": "upsert after upserting migrations"}),
        )),
        add(configmap(
            "migrate",
            json!({"kapply.dev/change-group": "migrations"}),
        )),
    ])
    .unwrap();

    assert_eq!(batch_names(&graph), vec![vec!["migrate"], vec!["app"]]);
    let edges = graph.edges();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].2, EdgeKind::Rule);
    assert!(edges[0].0.starts_with("create configmap/migrate"));
}

#[test]
fn test_rule_cycle_is_rejected() {
    let err = ChangeGraph::build(vec![
        add(configmap(
            "a",
            json!({"kapply.dev/change-group": "ga", "kapply.dev/change-rule": "upsert after upserting gb"}),
        )),
        add(configmap(
            "b",
            json!({"kapply.dev/change-group": "gb", "kapply.dev/change-rule": "upsert after upserting ga"}),
        )),
    ])
    .unwrap_err();

    match err {
        Error::CyclicGraph { changes } => assert_eq!(changes.len(), 2),
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_invalid_rule_is_a_configuration_error() {
    let err = ChangeGraph::build(vec![add(configmap(
        "a",
        json!({"kapply.dev/change-rule": "upsert whenever db"}),
    ))])
    .unwrap_err();
    assert!(matches!(err, Error::InvalidChangeRule { .. }));
    assert!(err.is_configuration());
}

#[test]
fn test_batches_cover_every_change_once_in_edge_order() {
    let changes = || {
        vec![
            add(widget("w2")),
            add(configmap("cm2", json!({"kapply.dev/change-group": "late"}))),
            add(crd()),
            add(configmap("cm1", json!({"kapply.dev/change-rule": "upsert before upserting late"}))),
            add(widget("w1")),
            add(namespace("ns1")),
            delete(configmap("gone", json!({}))),
        ]
    };
    let graph = ChangeGraph::build(changes()).unwrap();

    let batches = batch_names(&graph);
    let flat: Vec<&String> = batches.iter().flatten().collect();
    assert_eq!(flat.len(), graph.len());

    let position = |description: &str| {
        graph
            .batches()
            .iter()
            .position(|batch| batch.iter().any(|c| c.description() == description))
            .unwrap()
    };
    for (before, after, _) in graph.edges() {
        assert!(position(&before) < position(&after), "{} -> {}", before, after);
    }

    // input order does not matter
    let mut reversed = changes();
    reversed.reverse();
    assert_eq!(batch_names(&ChangeGraph::build(reversed).unwrap()), batches);
}

/// Deterministic pseudo-random source for generated change sets
struct Lcg(u64);

impl Lcg {
    fn below(&mut self, bound: u64) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.0 >> 33) % bound
    }

    fn chance(&mut self) -> bool {
        self.below(2) == 0
    }
}

/// Namespaces, a CRD, widgets and configmaps with acyclic change rules
fn generated_changes(seed: u64) -> Vec<Change> {
    let mut rng = Lcg(seed);
    let mut changes = Vec::new();
    if rng.chance() {
        changes.push(add(namespace("ns1")));
    }
    if rng.chance() {
        changes.push(add(crd()));
    }

    let mut groups: Vec<String> = Vec::new();
    for i in 0..(2 + rng.below(10)) {
        match rng.below(4) {
            0 => changes.push(add(widget(&format!("w{}", i)))),
            1 => changes.push(delete(configmap(&format!("old{}", i), json!({})))),
            _ => {
                let mut annotations = serde_json::Map::new();
                if !groups.is_empty() && rng.chance() {
                    let target = &groups[rng.below(groups.len() as u64) as usize];
                    let direction = if rng.chance() { "after" } else { "before" };
                    annotations.insert(
                        "kapply.dev/change-rule".to_string(),
                        json!(format!("upsert {} upserting {}", direction, target)),
                    );
                }
                if rng.chance() {
                    let group = format!("g{}", i);
                    annotations.insert("kapply.dev/change-group".to_string(), json!(group));
                    groups.push(group);
                }
                changes.push(add(configmap(&format!("cm{}", i), annotations.into())));
            }
        }
    }

    // shuffle
    for i in (1..changes.len()).rev() {
        let j = rng.below(i as u64 + 1) as usize;
        changes.swap(i, j);
    }
    changes
}

#[test]
fn test_generated_change_sets_order_consistently() {
    for seed in 0..64 {
        let changes = generated_changes(seed);
        let graph = ChangeGraph::build(changes.clone()).unwrap();
        let batches = batch_names(&graph);

        let flat: Vec<String> = graph
            .batches()
            .iter()
            .flat_map(|batch| batch.iter().map(|c| c.description()))
            .collect();
        assert_eq!(flat.len(), changes.len(), "seed {}", seed);
        let mut unique = flat.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), flat.len(), "seed {}", seed);

        let position = |description: &str| {
            graph
                .batches()
                .iter()
                .position(|batch| batch.iter().any(|c| c.description() == description))
                .unwrap()
        };
        for (before, after, _) in graph.edges() {
            assert!(
                position(&before) < position(&after),
                "seed {}: {} -> {}",
                seed,
                before,
                after
            );
        }

        // rebuilding from the applied order, or its reverse, yields the same batches
        let mut in_batch_order: Vec<Change> = flat
            .iter()
            .map(|description| {
                changes
                    .iter()
                    .find(|c| &c.description() == description)
                    .unwrap()
                    .clone()
            })
            .collect();
        assert_eq!(
            batch_names(&ChangeGraph::build(in_batch_order.clone()).unwrap()),
            batches,
            "seed {}",
            seed
        );
        in_batch_order.reverse();
        assert_eq!(
            batch_names(&ChangeGraph::build(in_batch_order).unwrap()),
            batches,
            "seed {}",
            seed
        );
    }
}
