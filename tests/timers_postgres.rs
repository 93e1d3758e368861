//! Timer semantics over PostgreSQL: schedule firing, zero-tick skips, and
//! recurring rescheduling, driven through the sweep entry points.

#![cfg(feature = "postgres")]

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use gategraph::engine::EngineError;
use gategraph::graphs::{new_graph, node};
use gategraph::store::now_epoch;
use gategraph::sweeps::{SweepConfig, run_sweep};
use gategraph::types::{ComputationState, SweepType};
use gategraph::values::{GetError, GetOptions};

mod common;
use common::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn schedule_once_gates_downstream_until_the_moment_arrives() {
    let name = unique_graph_name("schedule_once");
    let graph_name = name.clone();
    let Some(engine) = engine_with(move || {
        new_graph(
            &graph_name,
            "v1",
            vec![
                node::input("start"),
                node::schedule_once(
                    "tick",
                    vec!["start"],
                    node::from_fn(|_| Ok(json!(now_epoch() + 2))),
                ),
                node::compute(
                    "after",
                    vec!["tick"],
                    node::from_fn(|_| Ok(json!("fired"))),
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
    engine.set(&id, "start", json!(true)).await.expect("set");

    // The timer computes its moment promptly, but downstream must wait.
    let engine = Arc::new(engine);
    let e = engine.clone();
    let probe_id = id.clone();
    let moment = wait_until(Duration::from_secs(10), async move || {
        let row = e.get_value(&probe_id, "tick", GetOptions::default()).await.ok()?;
        row.node_value?.as_i64()
    })
    .await
    .expect("tick moment produced");
    assert!(moment > now_epoch());

    let early = engine
        .get_value(
            &id,
            "after",
            GetOptions::wait_any().with_timeout(Duration::from_secs(1)),
        )
        .await
        .expect_err("downstream must not fire before the moment");
    assert!(matches!(early, EngineError::Get(GetError::NotSet { .. })));

    tokio::time::sleep(Duration::from_secs(3)).await;
    let config = SweepConfig::default();
    run_sweep(engine.scheduler(), SweepType::ScheduleFire, &config)
        .await
        .expect("schedule-fire sweep");

    let after = engine
        .get_value(
            &id,
            "after",
            GetOptions::wait_any().with_timeout(Duration::from_secs(10)),
        )
        .await
        .expect("downstream fired once the moment arrived");
    assert_eq!(after.node_value, Some(json!("fired")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn zero_moment_is_a_skipped_tick_not_a_firing() {
    let name = unique_graph_name("zero_tick");
    let graph_name = name.clone();
    let Some(engine) = engine_with(move || {
        new_graph(
            &graph_name,
            "v1",
            vec![
                node::input("start"),
                node::schedule_once("tick", vec!["start"], node::from_fn(|_| Ok(json!(0)))),
                node::compute(
                    "after",
                    vec!["tick"],
                    node::from_fn(|_| Ok(json!("fired"))),
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
    engine.set(&id, "start", json!(true)).await.expect("set");

    // Downstream may observe the 0 on the timer slot itself.
    let engine = Arc::new(engine);
    let e = engine.clone();
    let probe_id = id.clone();
    let tick = wait_until(Duration::from_secs(10), async move || {
        let row = e.get_value(&probe_id, "tick", GetOptions::default()).await.ok()?;
        row.node_value?.as_i64()
    })
    .await
    .expect("tick produced");
    assert_eq!(tick, 0);

    let config = SweepConfig::default();
    run_sweep(engine.scheduler(), SweepType::ScheduleFire, &config)
        .await
        .expect("schedule-fire sweep");

    let after = engine
        .get_value(
            &id,
            "after",
            GetOptions::wait_any().with_timeout(Duration::from_secs(2)),
        )
        .await
        .expect_err("a 0 tick never fires downstream");
    assert!(matches!(after, EngineError::Get(GetError::NotSet { .. })));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn recurring_schedule_produces_the_next_moment_after_consumption() {
    let name = unique_graph_name("recurring");
    let graph_name = name.clone();
    let Some(engine) = engine_with(move || {
        new_graph(
            &graph_name,
            "v1",
            vec![
                node::input("start"),
                node::schedule_recurring(
                    "pulse",
                    vec!["start"],
                    node::from_fn(|_| Ok(json!(now_epoch() + 1))),
                ),
                node::compute(
                    "consumer",
                    vec!["pulse"],
                    node::from_fn(|input| {
                        Ok(input.param("pulse").cloned().unwrap_or(json!(null)))
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
    engine.set(&id, "start", json!(true)).await.expect("set");

    let engine = Arc::new(engine);
    let e = engine.clone();
    let probe_id = id.clone();
    let first_moment = wait_until(Duration::from_secs(10), async move || {
        let row = e.get_value(&probe_id, "pulse", GetOptions::default()).await.ok()?;
        row.node_value?.as_i64()
    })
    .await
    .expect("first moment produced");

    tokio::time::sleep(Duration::from_secs(2)).await;
    let config = SweepConfig::default();
    run_sweep(engine.scheduler(), SweepType::ScheduleFire, &config)
        .await
        .expect("schedule-fire sweep");

    // Consumer observes the fired tick.
    let consumed = engine
        .get_value(
            &id,
            "consumer",
            GetOptions::wait_any().with_timeout(Duration::from_secs(10)),
        )
        .await
        .expect("consumer fired");
    assert_eq!(consumed.node_value, Some(json!(first_moment)));

    // Once consumed, the reschedule sweep queues the next moment.
    run_sweep(engine.scheduler(), SweepType::RecurringReschedule, &config)
        .await
        .expect("reschedule sweep");

    let e = engine.clone();
    let probe_id = id.clone();
    let second_moment = wait_until(Duration::from_secs(10), async move || {
        let row = e.get_value(&probe_id, "pulse", GetOptions::default()).await.ok()?;
        let moment = row.node_value?.as_i64()?;
        (moment > first_moment).then_some(moment)
    })
    .await;
    assert!(second_moment.is_some(), "a fresh moment must be produced");

    let history = engine.history(&id).await.expect("history");
    let pulse_successes = history
        .iter()
        .filter(|c| c.node_name.as_str() == "pulse" && c.state == ComputationState::Success)
        .count();
    assert!(pulse_successes >= 2, "the timer ran once per cycle");
}
