//! The invalidator: clears derived value slots whose gate stopped
//! holding after an upstream change.
//!
//! Runs after every value change, iterating to a fixed point so that a
//! clear cascades through the whole downstream cone (each clear is itself
//! a value change at a fresh revision). Two exemptions keep timers from
//! tearing work down:
//!
//! * timer slots themselves are never cleared by upstream pauses;
//! * a downstream node is not cleared when the only unmet gate leaves are
//!   timer upstreams; a paused schedule (`0`) is a non-firing tick, not
//!   an invalidation signal.

use std::sync::Arc;

use crate::gating::{Readiness, evaluate};
use crate::graphs::Graph;
use crate::store::{
    ExecutionSnapshot, Store, StoreError, StoreResult, ValueWrite, WriteOptions, now_epoch,
};
use crate::types::NodeName;

/// Whether a set derived slot must be cleared for this readiness report.
///
/// A node is cleared only when its gate stopped holding for a non-timer
/// reason: pending leaves that are all timer upstreams mean a schedule
/// paused or has not arrived yet, which never tears existing values down.
fn should_clear(graph: &Graph, readiness: &Readiness) -> bool {
    if readiness.ready {
        return false;
    }
    readiness.conditions_not_met.iter().any(|pending| {
        !graph
            .node_type(&pending.node)
            .is_some_and(|t| t.is_timer())
    })
}

/// Clear downstream slots no longer supported by their gates; returns the
/// snapshot after the cascade settles.
pub async fn run(
    store: &Arc<dyn Store>,
    graph: &Graph,
    execution_id: &str,
    changed: &[NodeName],
) -> StoreResult<ExecutionSnapshot> {
    let mut snapshot = store
        .load_execution(execution_id)
        .await?
        .ok_or_else(|| StoreError::NotFound {
            execution_id: execution_id.to_string(),
        })?;

    let mut frontier: Vec<NodeName> = changed.to_vec();
    while !frontier.is_empty() {
        let now = now_epoch();
        let mut cleared = Vec::new();

        for node in graph.derived_nodes() {
            if node.node_type().is_timer() {
                continue;
            }
            let Some(gate) = node.gate() else {
                continue;
            };
            if !frontier.iter().any(|name| gate.references(name)) {
                continue;
            }
            let currently_set = snapshot.value(&node.name).is_some_and(|row| row.is_set());
            if !currently_set {
                continue;
            }

            let readiness = evaluate(graph, gate, &snapshot.values, now);
            if !should_clear(graph, &readiness) {
                continue;
            }

            let outcome = store
                .write_values(
                    execution_id,
                    &[ValueWrite::unset(&node.name)],
                    WriteOptions::default(),
                )
                .await?;
            snapshot = outcome.snapshot;
            if !outcome.changed.is_empty() {
                tracing::debug!(
                    execution = execution_id,
                    node = %node.name,
                    "cleared unsupported downstream value"
                );
                cleared.push(node.name.clone());
            }
        }

        frontier = cleared;
    }

    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gating::Gate;
    use crate::graphs::{Graph, node};
    use crate::store::models::ValueRow;
    use crate::types::NodeType;
    use rustc_hash::FxHashMap;
    use serde_json::json;

    fn fixture() -> Graph {
        Graph::new(
            "invalidate_fixture",
            "v1",
            vec![
                node::input("a"),
                node::schedule_once("tick", vec!["a"], node::from_fn(|_| Ok(json!(0)))),
                node::compute(
                    "timed",
                    vec!["a", "tick"],
                    node::from_fn(|_| Ok(json!(1))),
                ),
            ],
        )
        .expect("fixture graph")
    }

    fn set_row(name: &str, t: NodeType, value: serde_json::Value, rev: i64) -> ValueRow {
        ValueRow {
            node_name: name.into(),
            node_type: t,
            node_value: Some(value),
            metadata: json!({}),
            set_time: Some(10),
            ex_revision: rev,
        }
    }

    fn readiness_for(graph: &Graph, gate: &Gate, rows: Vec<ValueRow>) -> crate::gating::Readiness {
        let values: FxHashMap<_, _> = rows
            .into_iter()
            .map(|r| (r.node_name.clone(), r))
            .collect();
        evaluate(graph, gate, &values, 1_000)
    }

    #[test]
    fn ready_nodes_are_never_cleared() {
        let graph = fixture();
        let gate: Gate = vec!["a"].into();
        let readiness = readiness_for(&graph, &gate, vec![set_row("a", NodeType::Input, json!(1), 2)]);
        assert!(!should_clear(&graph, &readiness));
    }

    #[test]
    fn missing_input_clears() {
        let graph = fixture();
        let gate: Gate = vec!["a"].into();
        let readiness = readiness_for(&graph, &gate, vec![]);
        assert!(should_clear(&graph, &readiness));
    }

    #[test]
    fn paused_timer_alone_does_not_clear() {
        let graph = fixture();
        let gate: Gate = vec!["a", "tick"].into();
        // Input holds; the timer produced a 0 (skipped tick).
        let readiness = readiness_for(
            &graph,
            &gate,
            vec![
                set_row("a", NodeType::Input, json!(1), 2),
                set_row("tick", NodeType::ScheduleOnce, json!(0), 3),
            ],
        );
        assert!(!should_clear(&graph, &readiness));
    }

    #[test]
    fn missing_input_clears_even_with_a_paused_timer() {
        let graph = fixture();
        let gate: Gate = vec!["a", "tick"].into();
        let readiness = readiness_for(
            &graph,
            &gate,
            vec![set_row("tick", NodeType::ScheduleOnce, json!(0), 3)],
        );
        assert!(should_clear(&graph, &readiness));
    }
}
