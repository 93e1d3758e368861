//! Readiness evaluation of gating expressions against a value snapshot.
//!
//! The evaluator walks a [`Gate`] tree and reports whether the gated node
//! may run, together with the full proof: every satisfied leaf with the
//! value row that satisfied it (`conditions_met`) and every leaf still
//! pending (`conditions_not_met`). `Or` branches keep *all* satisfied
//! leaves, not a minimal witness; that is what makes a second `Or` branch
//! trigger recomputation when it becomes satisfied later.
//!
//! Timer upstreams get special leaf semantics: a bare `provided` condition
//! on a `schedule_once` / `schedule_recurring` node is satisfied only when
//! the stored moment has arrived and is non-zero. A `0` stored by the timer
//! is a skipped tick, never a firing.
//!
//! `Not` inverts only the readiness of its clause; the met/unmet leaf lists
//! pass through unchanged so that the recompute detector and the worker's
//! parameter witness always see leaf truth in positive polarity.

use rustc_hash::FxHashMap;

use crate::gating::{Condition, Gate, Predicate};
use crate::graphs::Graph;
use crate::store::models::ValueRow;
use crate::types::NodeName;

/// A satisfied leaf together with the row that satisfied it.
#[derive(Clone, Debug)]
pub struct Witness {
    pub node: NodeName,
    pub predicate: String,
    pub row: ValueRow,
}

/// A leaf whose condition does not currently hold.
#[derive(Clone, Debug)]
pub struct Pending {
    pub node: NodeName,
    pub predicate: String,
}

/// Result of evaluating one gate against one snapshot.
#[derive(Clone, Debug, Default)]
pub struct Readiness {
    pub ready: bool,
    pub conditions_met: Vec<Witness>,
    pub conditions_not_met: Vec<Pending>,
}

/// True when a timer slot holds an arrived, non-zero moment.
///
/// Non-integer payloads never count as arrived; schedule user functions
/// are validated to return epoch-second integers before the slot is
/// written, so this only guards against hand-edited rows.
#[must_use]
pub fn timer_arrived(row: &ValueRow, now: i64) -> bool {
    if row.set_time.is_none() {
        return false;
    }
    match row.node_value.as_ref().and_then(serde_json::Value::as_i64) {
        Some(moment) => moment != 0 && moment <= now,
        None => false,
    }
}

/// Evaluate `gate` against `values` as of `now` (epoch seconds).
///
/// Rows absent from the snapshot (possible immediately after additive
/// schema evolution) evaluate as never-set.
#[must_use]
pub fn evaluate(
    graph: &Graph,
    gate: &Gate,
    values: &FxHashMap<NodeName, ValueRow>,
    now: i64,
) -> Readiness {
    match gate {
        Gate::Leaf(condition) => evaluate_leaf(graph, condition, values, now),
        Gate::And(clauses) => {
            let mut ready = true;
            let mut out = Readiness::default();
            for clause in clauses {
                let child = evaluate(graph, clause, values, now);
                ready &= child.ready;
                out.conditions_met.extend(child.conditions_met);
                out.conditions_not_met.extend(child.conditions_not_met);
            }
            out.ready = ready;
            out
        }
        Gate::Or(clauses) => {
            let mut ready = false;
            let mut out = Readiness::default();
            for clause in clauses {
                let child = evaluate(graph, clause, values, now);
                ready |= child.ready;
                out.conditions_met.extend(child.conditions_met);
                out.conditions_not_met.extend(child.conditions_not_met);
            }
            out.ready = ready;
            out
        }
        Gate::Not(clause) => {
            let child = evaluate(graph, clause, values, now);
            Readiness {
                ready: !child.ready,
                conditions_met: child.conditions_met,
                conditions_not_met: child.conditions_not_met,
            }
        }
    }
}

fn evaluate_leaf(
    graph: &Graph,
    condition: &Condition,
    values: &FxHashMap<NodeName, ValueRow>,
    now: i64,
) -> Readiness {
    let node_type = graph.node_type(&condition.node);
    let fallback;
    let row = match values.get(&condition.node) {
        Some(row) => row,
        None => {
            fallback = ValueRow::unset(
                condition.node.clone(),
                node_type.unwrap_or(crate::types::NodeType::Input),
            );
            &fallback
        }
    };

    let satisfied = match (&condition.predicate, node_type) {
        // A bare "provided" dependency on a timer means "the moment has
        // arrived", not merely "the timer produced something".
        (Predicate::Provided, Some(t)) if t.is_timer() => timer_arrived(row, now),
        (predicate, _) => predicate.test(row),
    };

    if satisfied {
        Readiness {
            ready: true,
            conditions_met: vec![Witness {
                node: condition.node.clone(),
                predicate: condition.predicate.label().to_string(),
                row: row.clone(),
            }],
            conditions_not_met: vec![],
        }
    } else {
        Readiness {
            ready: false,
            conditions_met: vec![],
            conditions_not_met: vec![Pending {
                node: condition.node.clone(),
                predicate: condition.predicate.label().to_string(),
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gating::when;
    use crate::graphs::{Graph, node};
    use crate::types::NodeType;
    use serde_json::json;

    fn graph_with_timer() -> Graph {
        Graph::new(
            "eval_fixture",
            "v1",
            vec![
                node::input("a"),
                node::input("b"),
                node::schedule_once("tick", vec!["a"], node::from_fn(|_| Ok(json!(0)))),
                node::compute(
                    "out",
                    vec!["a"],
                    node::from_fn(|_| Ok(json!("done"))),
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
            set_time: Some(100),
            ex_revision: rev,
        }
    }

    fn snapshot(rows: Vec<ValueRow>) -> FxHashMap<NodeName, ValueRow> {
        rows.into_iter()
            .map(|r| (r.node_name.clone(), r))
            .collect()
    }

    #[test]
    fn and_requires_all_leaves() {
        let graph = graph_with_timer();
        let gate: Gate = vec!["a", "b"].into();
        let values = snapshot(vec![set_row("a", NodeType::Input, json!(1), 1)]);

        let readiness = evaluate(&graph, &gate, &values, 1_000);
        assert!(!readiness.ready);
        assert_eq!(readiness.conditions_met.len(), 1);
        assert_eq!(readiness.conditions_not_met.len(), 1);
        assert_eq!(readiness.conditions_not_met[0].node.as_str(), "b");
    }

    #[test]
    fn or_keeps_every_satisfied_leaf() {
        let graph = graph_with_timer();
        let gate = Gate::any_of(vec![Gate::from("a"), Gate::from("b")]);
        let values = snapshot(vec![
            set_row("a", NodeType::Input, json!(1), 1),
            set_row("b", NodeType::Input, json!(2), 2),
        ]);

        let readiness = evaluate(&graph, &gate, &values, 1_000);
        assert!(readiness.ready);
        assert_eq!(readiness.conditions_met.len(), 2);
    }

    #[test]
    fn not_inverts_ready_only() {
        let graph = graph_with_timer();
        let gate = Gate::negate(Gate::from("a"));
        let empty = FxHashMap::default();

        let readiness = evaluate(&graph, &gate, &empty, 1_000);
        assert!(readiness.ready);
        // The leaf itself is still reported as pending in positive polarity.
        assert_eq!(readiness.conditions_not_met.len(), 1);
    }

    #[test]
    fn timer_leaf_waits_for_the_moment() {
        let graph = graph_with_timer();
        let gate = Gate::from("tick");

        let future = snapshot(vec![set_row("tick", NodeType::ScheduleOnce, json!(2_000), 4)]);
        assert!(!evaluate(&graph, &gate, &future, 1_000).ready);
        assert!(evaluate(&graph, &gate, &future, 2_000).ready);

        // 0 is a skipped tick, not a firing.
        let paused = snapshot(vec![set_row("tick", NodeType::ScheduleOnce, json!(0), 5)]);
        assert!(!evaluate(&graph, &gate, &paused, 9_000).ready);
    }

    #[test]
    fn custom_predicate_on_timer_overrides_arrival() {
        let graph = graph_with_timer();
        let gate = when(
            "tick",
            Predicate::custom("set_at_all", |row| row.set_time.is_some()),
        );
        let values = snapshot(vec![set_row("tick", NodeType::ScheduleOnce, json!(0), 5)]);
        // Custom predicates see the raw row and decide for themselves.
        assert!(evaluate(&graph, &gate, &values, 1).ready);
    }

    #[test]
    fn missing_rows_evaluate_as_unset() {
        let graph = graph_with_timer();
        let gate = Gate::from("a");
        let readiness = evaluate(&graph, &gate, &FxHashMap::default(), 1_000);
        assert!(!readiness.ready);
    }
}
