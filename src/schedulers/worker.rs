//! The worker: runs one grabbed computation to an outcome.
//!
//! Workers are detached tasks, independent of the caller that grabbed the
//! row. Each worker:
//!
//! 1. builds the user-function input (parameter map of all set slots plus
//!    the `value_nodes` witness rows),
//! 2. starts its watchdog partner against the computation row,
//! 3. invokes the node behavior (user function, historian append, or
//!    archive),
//! 4. applies the per-type success effects and records the outcome with
//!    the captured upstream revisions,
//! 5. fires the node- and graph-level save hooks in detached tasks, and
//! 6. calls `advance` again to propagate the cascade.
//!
//! Value effects are applied before the success row is recorded: if the
//! process dies in between, the row is revived as abandoned, the retry
//! rewrites the same value as a no-op, and the success is recorded then.
//! The cascade converges instead of wedging.

use rustc_hash::FxHashMap;
use std::sync::Arc;

use rand::RngExt;
use tokio::task::JoinHandle;

use crate::graphs::{
    ComputationOutcome, ComputeFn, ComputeInput, Graph, GraphSaveHook, NodeDef, NodeSaveHook,
    NodeSpec, ValueView,
};
use crate::schedulers::{Scheduler, SchedulerError, invalidate, recompute, watchdog};
use crate::store::{
    ExecutionSnapshot, GrabbedComputation, HistorianEntry, Store, StoreError, ValueWrite,
    WriteOptions, now_epoch,
};
use crate::types::{ComputationState, NodeName};

enum RunOutcome {
    Success(serde_json::Value),
    Failure(String),
    /// The watchdog killed us; bookkeeping already happened.
    Abandoned,
}

/// Launch a detached worker for one grabbed computation.
pub fn launch(
    scheduler: Arc<Scheduler>,
    graph: Arc<Graph>,
    grab: GrabbedComputation,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let computation_id = grab.computation.id;
        if let Err(e) = run(scheduler, graph, grab).await {
            tracing::warn!(computation_id, error = %e, "worker finished with error");
        }
    })
}

async fn run(
    scheduler: Arc<Scheduler>,
    graph: Arc<Graph>,
    grab: GrabbedComputation,
) -> Result<(), SchedulerError> {
    let store = Arc::clone(scheduler.store());
    let computation = grab.computation;
    let execution_id = computation.execution_id.clone();
    let Some(node) = graph.node(&computation.node_name).cloned() else {
        return Ok(());
    };

    let snapshot = store
        .load_execution(&execution_id)
        .await?
        .ok_or_else(|| StoreError::NotFound {
            execution_id: execution_id.clone(),
        })?;
    let computed_with = recompute::upstream_revisions(&node, &snapshot);
    let policy = node.policy().cloned().unwrap_or_default();

    let outcome = match node.user_fn() {
        Some(f) => {
            let input = ComputeInput {
                execution_id: execution_id.clone(),
                params: snapshot.set_params(),
                value_nodes: witness_views(&grab.witnesses),
            };
            let user_task = tokio::spawn(async move { f.run(input).await });
            let dog = watchdog::spawn(
                Arc::clone(&store),
                computation.id,
                computation.start_time.unwrap_or_else(now_epoch),
                policy.clone(),
                user_task.abort_handle(),
            );
            let result = user_task.await;
            dog.abort();
            match result {
                Ok(Ok(value)) => validate_return(&node, value),
                Ok(Err(e)) => RunOutcome::Failure(e.to_string()),
                Err(join) if join.is_cancelled() => RunOutcome::Abandoned,
                Err(join) => RunOutcome::Failure(panic_message(join)),
            }
        }
        None => match &node.spec {
            NodeSpec::Historian { .. } => {
                RunOutcome::Success(historian_value(&node, &snapshot, now_epoch()))
            }
            NodeSpec::Archive { .. } => RunOutcome::Success(serde_json::json!(now_epoch())),
            _ => RunOutcome::Failure("node type has no runnable behavior".to_string()),
        },
    };

    match outcome {
        RunOutcome::Abandoned => Ok(()),
        RunOutcome::Success(value) => {
            let changed = apply_success_effects(&store, &graph, &node, &execution_id, &value)
                .await?;
            let recorded = store.record_success(computation.id, &computed_with).await?;
            if recorded.state == ComputationState::Success {
                if !changed.is_empty() {
                    invalidate::run(&store, &graph, &execution_id, &changed).await?;
                }
                dispatch_hooks(
                    &graph,
                    &node,
                    &execution_id,
                    ComputationOutcome::Success(value),
                );
            }
            scheduler.advance_owned(execution_id).await?;
            Ok(())
        }
        RunOutcome::Failure(details) => {
            let recorded = store.record_failure(computation.id, &details).await?;
            if recorded.state == ComputationState::Failed {
                tracing::warn!(
                    execution = execution_id.as_str(),
                    node = %node.name,
                    details = details.as_str(),
                    "computation failed"
                );
                dispatch_hooks(
                    &graph,
                    &node,
                    &execution_id,
                    ComputationOutcome::Failure(details),
                );
                backoff_sleep().await;

                let snapshot = store
                    .load_execution(&execution_id)
                    .await?
                    .ok_or_else(|| StoreError::NotFound {
                        execution_id: execution_id.clone(),
                    })?;
                let max_rev = recompute::max_upstream_revision(&node, &snapshot);
                let failures = store
                    .count_failures_since(&execution_id, &node.name, max_rev)
                    .await?;
                if failures < policy.max_retries {
                    // Retry within the same upstream cycle.
                    store
                        .insert_pending_computation(
                            &execution_id,
                            &node.name,
                            computation.computation_type,
                            computation.ex_revision_at_start,
                        )
                        .await?;
                }
            }
            scheduler.advance_owned(execution_id).await?;
            Ok(())
        }
    }
}

/// Type-directed validation of a user function's success value.
fn validate_return(node: &NodeDef, value: serde_json::Value) -> RunOutcome {
    if node.node_type().is_timer() && value.as_i64().is_none() {
        return RunOutcome::Failure(format!(
            "schedule function must return an epoch-second integer, got: {value}"
        ));
    }
    RunOutcome::Success(value)
}

/// Apply the per-type value effects of a success; returns the slot names
/// that changed (the invalidator's frontier).
async fn apply_success_effects(
    store: &Arc<dyn Store>,
    _graph: &Graph,
    node: &NodeDef,
    execution_id: &str,
    value: &serde_json::Value,
) -> Result<Vec<NodeName>, SchedulerError> {
    match &node.spec {
        NodeSpec::Compute { .. } | NodeSpec::Historian { .. } => {
            let outcome = store
                .write_values(
                    execution_id,
                    &[ValueWrite::set(&node.name, value.clone())],
                    WriteOptions::default(),
                )
                .await?;
            Ok(outcome.changed)
        }
        NodeSpec::ScheduleOnce { .. } | NodeSpec::ScheduleRecurring { .. } => {
            let outcome = store
                .write_values(
                    execution_id,
                    &[ValueWrite::set(&node.name, value.clone())],
                    WriteOptions::default(),
                )
                .await?;
            Ok(outcome.changed)
        }
        NodeSpec::Mutate {
            mutates,
            update_revision,
            ..
        } => {
            let mut changed = Vec::new();
            let target = store
                .write_values(
                    execution_id,
                    &[ValueWrite::set(mutates, value.clone())],
                    WriteOptions {
                        bump_revision: *update_revision,
                    },
                )
                .await?;
            if *update_revision {
                changed.extend(target.changed);
            }
            // The mutator's own slot records a fixed marker of what it did.
            let marker = store
                .write_values(
                    execution_id,
                    &[ValueWrite::set(
                        &node.name,
                        serde_json::json!(format!("updated {mutates}")),
                    )],
                    WriteOptions::default(),
                )
                .await?;
            changed.extend(marker.changed);
            Ok(changed)
        }
        NodeSpec::Archive { .. } => {
            let outcome = store
                .write_values(
                    execution_id,
                    &[ValueWrite::set(&node.name, value.clone())],
                    WriteOptions::default(),
                )
                .await?;
            store.set_archived(execution_id, true).await?;
            Ok(outcome.changed)
        }
        NodeSpec::Input => Ok(vec![]),
    }
}

/// Build the historian's next log value: one entry per tracked upstream
/// whose revision advanced past the last recorded one, sorted by revision
/// ascending and capped at `max_entries` (oldest dropped).
fn historian_value(
    node: &NodeDef,
    snapshot: &ExecutionSnapshot,
    now: i64,
) -> serde_json::Value {
    let mut entries: Vec<HistorianEntry> = snapshot
        .value(&node.name)
        .and_then(|row| row.node_value.clone())
        .and_then(|v| match serde_json::from_value(v) {
            Ok(entries) => Some(entries),
            Err(e) => {
                tracing::warn!(node = %node.name, error = %e, "historian log reset: malformed");
                None
            }
        })
        .unwrap_or_default();

    let mut last_seen: FxHashMap<NodeName, i64> = FxHashMap::default();
    for entry in &entries {
        let seen = last_seen.entry(entry.node.clone()).or_insert(entry.revision);
        *seen = (*seen).max(entry.revision);
    }

    if let Some(gate) = node.gate() {
        for leaf in gate.leaves() {
            let Some(row) = snapshot.value(&leaf.node) else {
                continue;
            };
            if !row.is_set() {
                continue;
            }
            let newer = match last_seen.get(&leaf.node) {
                Some(seen) => row.ex_revision > *seen,
                None => true,
            };
            if newer {
                entries.push(HistorianEntry {
                    value: row.node_value.clone().unwrap_or(serde_json::Value::Null),
                    node: leaf.node.clone(),
                    timestamp: now,
                    revision: row.ex_revision,
                    metadata: row.metadata.clone(),
                });
                last_seen.insert(leaf.node.clone(), row.ex_revision);
            }
        }
    }

    entries.sort_by_key(|e| e.revision);
    if let Some(cap) = node.max_entries() {
        while entries.len() > cap {
            entries.remove(0);
        }
    }
    serde_json::to_value(entries).unwrap_or(serde_json::Value::Null)
}

fn witness_views(witnesses: &[crate::gating::Witness]) -> FxHashMap<NodeName, ValueView> {
    witnesses
        .iter()
        .map(|w| {
            (
                w.node.clone(),
                ValueView {
                    value: w.row.node_value.clone(),
                    metadata: w.row.metadata.clone(),
                    revision: w.row.ex_revision,
                    set_time: w.row.set_time,
                },
            )
        })
        .collect()
}

/// Fire the node- and graph-level save hooks, each in its own detached
/// task so a panicking hook cannot take the worker down.
fn dispatch_hooks(
    graph: &Graph,
    node: &NodeDef,
    execution_id: &str,
    outcome: ComputationOutcome,
) {
    let outcome = Arc::new(outcome);
    if let Some(hook) = node.on_save() {
        let execution_id = execution_id.to_string();
        let outcome = Arc::clone(&outcome);
        let _ = tokio::spawn(async move {
            hook.on_save(&execution_id, &outcome).await;
        });
    }
    if let Some(hook) = graph.graph_on_save() {
        let execution_id = execution_id.to_string();
        let node_name = node.name.clone();
        let outcome = Arc::clone(&outcome);
        let _ = tokio::spawn(async move {
            hook.on_save(&execution_id, &node_name, &outcome).await;
        });
    }
}

/// Jittered pause before releasing a failed computation.
async fn backoff_sleep() {
    let millis: u64 = rand::rng().random_range(100..=750);
    tokio::time::sleep(std::time::Duration::from_millis(millis)).await;
}

fn panic_message(join: tokio::task::JoinError) -> String {
    match join.try_into_panic() {
        Ok(payload) => {
            if let Some(s) = payload.downcast_ref::<&str>() {
                format!("user function panicked: {s}")
            } else if let Some(s) = payload.downcast_ref::<String>() {
                format!("user function panicked: {s}")
            } else {
                "user function panicked with a non-string payload".to_string()
            }
        }
        Err(e) => format!("user function task failed: {e}"),
    }
}
