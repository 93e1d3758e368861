//! Additive schema evolution and singleton creation over PostgreSQL.

#![cfg(feature = "postgres")]

use std::time::Duration;

use serde_json::json;

use gategraph::graphs::{new_graph, node};
use gategraph::values::GetOptions;

mod common;
use common::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn loading_under_a_grown_graph_adds_the_missing_nodes() {
    let name = unique_graph_name("evolve");

    // First deployment: one input.
    let graph_name = name.clone();
    let Some(old_engine) = engine_with(move || {
        new_graph(&graph_name, "v1", vec![node::input("a")])
    })
    .await
    else {
        return;
    };
    let execution = old_engine.start_execution(&name, "v1").await.expect("start");
    let id = execution.id().to_string();
    old_engine.set(&id, "a", json!("kept")).await.expect("set");
    let before = old_engine.load(&id).await.expect("load");
    let revision_before = before.revision();

    // Second deployment: same (name, version), two more nodes.
    let graph_name = name.clone();
    let Some(new_engine) = engine_with(move || {
        new_graph(
            &graph_name,
            "v1",
            vec![
                node::input("a"),
                node::input("b"),
                node::compute(
                    "c",
                    vec!["b"],
                    node::from_fn(|input| {
                        Ok(input.param("b").cloned().unwrap_or(json!(null)))
                    }),
                ),
            ],
        )
    })
    .await
    else {
        return;
    };

    let evolved = new_engine.load(&id).await.expect("evolving load");
    assert!(evolved.value(&"b".into()).is_some(), "missing input added");
    assert!(evolved.value(&"c".into()).is_some(), "missing compute added");
    let b = evolved.value(&"b".into()).expect("b row");
    assert!(!b.is_set());
    assert_eq!(b.ex_revision, 0);

    // Existing state is untouched.
    assert_eq!(
        evolved.value(&"a".into()).and_then(|r| r.node_value.clone()),
        Some(json!("kept"))
    );
    assert_eq!(evolved.revision(), revision_before);

    // Idempotent: loading again changes nothing.
    let again = new_engine.load(&id).await.expect("second load");
    assert_eq!(again.values.len(), evolved.values.len());
    assert_eq!(
        again.execution.graph_hash, evolved.execution.graph_hash,
        "hash settles on the catalog's"
    );

    // The evolved execution is fully functional.
    new_engine.set(&id, "b", json!(7)).await.expect("set new input");
    let c = new_engine
        .get_value(
            &id,
            "c",
            GetOptions::wait_any().with_timeout(Duration::from_secs(10)),
        )
        .await
        .expect("new compute runs");
    assert_eq!(c.node_value, Some(json!(7)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn singleton_executions_are_created_once_per_graph() {
    let name = unique_graph_name("singleton");
    let graph_name = name.clone();
    let Some(engine) = engine_with(move || {
        new_graph(&graph_name, "v1", vec![node::input("x")])
    })
    .await
    else {
        return;
    };

    let first = engine
        .start_singleton_execution(&name, "v1")
        .await
        .expect("first singleton");
    let second = engine
        .start_singleton_execution(&name, "v1")
        .await
        .expect("second singleton");
    assert_eq!(first.id(), second.id(), "one live execution per graph");

    // Archiving releases the slot; the next call creates a fresh one.
    engine.archive(first.id()).await.expect("archive");
    let third = engine
        .start_singleton_execution(&name, "v1")
        .await
        .expect("post-archive singleton");
    assert_ne!(first.id(), third.id());
}
