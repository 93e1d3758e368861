//! Graph construction through the public API (no database required).

use std::sync::Arc;

use serde_json::json;

use gategraph::gating::{Gate, Predicate, unblocked_when, when};
use gategraph::graphs::{GraphCatalog, GraphError, new_graph, node};

fn ok_fn() -> Arc<dyn gategraph::graphs::ComputeFn> {
    node::from_fn(|_| Ok(json!(1)))
}

#[test]
fn a_graph_with_every_node_type_validates() {
    let graph = new_graph(
        "kitchen_sink",
        "v1",
        vec![
            node::input("raw"),
            node::compute("cooked", vec!["raw"], ok_fn()).with_max_retries(2),
            node::mutate("reset", vec!["cooked"], ok_fn(), "raw"),
            node::schedule_once("once", vec!["raw"], ok_fn()),
            node::schedule_recurring("pulse", vec!["raw"], ok_fn()),
            node::historian("log", vec!["cooked"]).with_max_entries(100),
            node::archive("finish", when("cooked", Predicate::is_true())),
        ],
    )
    .expect("kitchen sink validates");

    assert_eq!(graph.name(), "kitchen_sink");
    // 7 declared + 2 synthetic slots.
    assert_eq!(graph.nodes().len(), 9);
    assert_eq!(graph.derived_nodes().count(), 6);
}

#[test]
fn tagged_trees_and_sugar_agree() {
    let sugared: Gate = vec!["a", "b"].into();
    let explicit = unblocked_when(Gate::all_of(vec![Gate::from("a"), Gate::from("b")]));

    let leaf_names = |gate: &Gate| -> Vec<String> {
        gate.leaves().iter().map(|c| c.node.to_string()).collect()
    };
    assert_eq!(leaf_names(&sugared), leaf_names(&explicit));
}

#[test]
fn construction_errors_surface_by_kind() {
    let duplicate = new_graph(
        "bad",
        "v1",
        vec![node::input("a"), node::input("a")],
    );
    assert!(matches!(duplicate, Err(GraphError::DuplicateNodeName { .. })));

    let unknown = new_graph(
        "bad",
        "v1",
        vec![node::compute("b", vec!["ghost"], ok_fn())],
    );
    assert!(matches!(unknown, Err(GraphError::UnknownDependency { .. })));

    let bad_heartbeat = new_graph(
        "bad",
        "v1",
        vec![
            node::input("a"),
            node::compute("b", vec!["a"], ok_fn()).with_heartbeat(5, 300),
        ],
    );
    assert!(matches!(
        bad_heartbeat,
        Err(GraphError::InvalidHeartbeatConfig { .. })
    ));
}

#[test]
fn catalog_entries_freeze_on_first_registration() {
    let catalog = GraphCatalog::new();
    let make = |prefix: &str| {
        new_graph("frozen", "v1", vec![node::input("a")])
            .expect("graph")
            .with_execution_id_prefix(prefix)
    };

    let first = catalog.register(make("one"));
    let second = catalog.register(make("two"));
    assert_eq!(first.execution_id_prefix(), "one");
    assert_eq!(second.execution_id_prefix(), "one", "first registration wins");
}
