//! Scheduler behavior over PostgreSQL: retry scoping, the
//! concurrent-advance single-success property, and heartbeat/abandonment
//! bookkeeping.
//!
//! Requires `GATEGRAPH_POSTGRES_TEST_URL` (tests skip gracefully when the
//! database is unreachable).

#![cfg(feature = "postgres")]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde_json::json;

use gategraph::engine::EngineError;
use gategraph::graphs::{new_graph, node};
use gategraph::store::{HeartbeatOutcome, Store, WriteOptions};
use gategraph::types::ComputationState;
use gategraph::values::{GetError, GetOptions};

mod common;
use common::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn retry_budget_is_scoped_to_the_current_upstream_cycle() {
    let name = unique_graph_name("retries");
    let graph_name = name.clone();
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = attempts.clone();
    let Some(engine) = engine_with(move || {
        new_graph(
            &graph_name,
            "v1",
            vec![
                node::input("enabled"),
                node::input("trigger"),
                node::compute(
                    "do_work",
                    vec!["enabled", "trigger"],
                    Arc::new(AlwaysFails {
                        attempts: counter.clone(),
                    }),
                )
                .with_max_retries(3),
            ],
        )
    })
    .await
    else {
        return;
    };

    let execution = engine.start_execution(&name, "v1").await.expect("start");
    let id = execution.id().to_string();

    engine
        .set_many(&id, [("enabled".into(), json!(true)), ("trigger".into(), json!(1))])
        .await
        .expect("set inputs");

    let err = engine
        .get_value(
            &id,
            "do_work",
            GetOptions::wait_any().with_timeout(Duration::from_secs(20)),
        )
        .await
        .expect_err("do_work must exhaust its retries");
    assert!(matches!(
        err,
        EngineError::Get(GetError::ComputationFailed { .. })
    ));
    assert_eq!(
        attempts.load(Ordering::SeqCst),
        3,
        "exactly max_retries attempts in one cycle"
    );

    // A new upstream cycle resets the budget: old failures stop counting.
    engine.set(&id, "trigger", json!(2)).await.expect("advance the cycle");
    let err = engine
        .get_value(
            &id,
            "do_work",
            GetOptions::wait_any().with_timeout(Duration::from_secs(20)),
        )
        .await
        .expect_err("second cycle also fails");
    assert!(matches!(
        err,
        EngineError::Get(GetError::ComputationFailed { .. })
    ));
    assert_eq!(
        attempts.load(Ordering::SeqCst),
        6,
        "the new cycle gets a fresh budget"
    );

    let history = engine.history(&id).await.expect("history");
    let failed = history
        .iter()
        .filter(|c| c.state == ComputationState::Failed)
        .count();
    assert_eq!(failed, 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_advances_produce_exactly_one_success() {
    let name = unique_graph_name("concurrent");
    let graph_name = name.clone();
    let runs = Arc::new(AtomicU32::new(0));
    let counter = runs.clone();
    let Some(engine) = engine_with(move || {
        new_graph(
            &graph_name,
            "v1",
            vec![
                node::input("a"),
                node::compute(
                    "slow",
                    vec!["a"],
                    Arc::new(SlowCounter {
                        runs: counter.clone(),
                        sleep: Duration::from_millis(300),
                    }),
                ),
            ],
        )
    })
    .await
    else {
        return;
    };

    let engine = Arc::new(engine);
    let execution = engine.start_execution(&name, "v1").await.expect("start");
    let id = execution.id().to_string();

    // Write the input without advancing, then race N advances through the
    // detector and the grab.
    engine
        .store()
        .write_values(
            &id,
            &[gategraph::store::ValueWrite::set("a", json!("go"))],
            WriteOptions::default(),
        )
        .await
        .expect("raw write");

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        let id = id.clone();
        handles.push(tokio::spawn(async move { engine.advance(&id).await }));
    }
    for handle in handles {
        handle.await.expect("join").expect("advance");
    }

    let slow = engine
        .get_value(
            &id,
            "slow",
            GetOptions::wait_any().with_timeout(Duration::from_secs(10)),
        )
        .await
        .expect("slow computed");
    assert_eq!(slow.node_value, Some(json!(1)));

    assert_eq!(runs.load(Ordering::SeqCst), 1, "user function ran once");
    let history = engine.history(&id).await.expect("history");
    let successes = history
        .iter()
        .filter(|c| c.node_name.as_str() == "slow" && c.state == ComputationState::Success)
        .count();
    assert_eq!(successes, 1, "exactly one success for one upstream change");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn heartbeat_extends_until_the_deadline_is_missed() {
    let name = unique_graph_name("heartbeat");
    let graph_name = name.clone();
    let Some(engine) = engine_with(move || {
        new_graph(
            &graph_name,
            "v1",
            vec![
                node::input("go"),
                node::compute(
                    "slow",
                    vec!["go"],
                    Arc::new(SleepyNode {
                        sleep: Duration::from_secs(15),
                        value: json!("done"),
                    }),
                )
                .with_heartbeat(30, 70),
            ],
        )
    })
    .await
    else {
        return;
    };

    let execution = engine.start_execution(&name, "v1").await.expect("start");
    let id = execution.id().to_string();
    engine.set(&id, "go", json!(true)).await.expect("set");

    let engine = Arc::new(engine);
    let e = engine.clone();
    let probe_id = id.clone();
    let computing = wait_until(Duration::from_secs(10), async move || {
        let history = e.history(&probe_id).await.ok()?;
        history
            .iter()
            .find(|c| c.node_name.as_str() == "slow" && c.state == ComputationState::Computing)
            .cloned()
    })
    .await
    .expect("computation grabbed");

    assert!(computing.start_time.is_some());
    assert!(computing.heartbeat_deadline.is_some());

    let store = engine.store();
    match store.heartbeat(computing.id, 70).await.expect("heartbeat") {
        HeartbeatOutcome::Extended { deadline } => {
            assert_eq!(
                deadline,
                store
                    .computations(&id)
                    .await
                    .expect("rows")
                    .iter()
                    .find(|c| c.id == computing.id)
                    .expect("row")
                    .last_heartbeat_at
                    .expect("stamped")
                    + 70
            );
        }
        other => panic!("expected extension, got {other:?}"),
    }

    // Force the deadline into the past, then the next tick must miss.
    match store.heartbeat(computing.id, -10).await.expect("heartbeat") {
        HeartbeatOutcome::Extended { .. } => {}
        other => panic!("expected extension, got {other:?}"),
    }
    assert_eq!(
        store.heartbeat(computing.id, 70).await.expect("heartbeat"),
        HeartbeatOutcome::MissedDeadline
    );

    let abandoned = store
        .abandon_computation(computing.id)
        .await
        .expect("abandon")
        .expect("row was still computing");
    assert_eq!(abandoned.state, ComputationState::Abandoned);

    // Further heartbeats see a finished row.
    assert_eq!(
        store.heartbeat(computing.id, 70).await.expect("heartbeat"),
        HeartbeatOutcome::Finished
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn mutate_with_update_revision_propagates_downstream() {
    let name = unique_graph_name("mutate_prop");
    let graph_name = name.clone();
    let Some(engine) = engine_with(move || {
        new_graph(
            &graph_name,
            "v1",
            vec![
                node::input("a"),
                node::input("b_target"),
                node::mutate(
                    "push",
                    vec!["a"],
                    node::from_fn(|input| {
                        Ok(input.param("a").cloned().unwrap_or(json!(null)))
                    }),
                    "b_target",
                )
                .with_update_revision(true),
                node::compute(
                    "c",
                    vec!["b_target"],
                    node::from_fn(|input| {
                        Ok(input.param("b_target").cloned().unwrap_or(json!(null)))
                    }),
                ),
            ],
        )
    })
    .await
    else {
        return;
    };

    let execution = engine.start_execution(&name, "v1").await.expect("start");
    let id = execution.id().to_string();

    engine.set(&id, "a", json!("X")).await.expect("set");
    let c = engine
        .get_value(
            &id,
            "c",
            GetOptions::wait_any().with_timeout(Duration::from_secs(10)),
        )
        .await
        .expect("c computed through the mutation");
    assert_eq!(c.node_value, Some(json!("X")));

    // The mutator's own slot records what it did.
    let marker = engine.get(&id, "push").await.expect("marker");
    assert_eq!(marker, json!("updated b_target"));
}
