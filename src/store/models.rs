//! Row types and persisted models for the durable state.
//!
//! These mirror the four tables: `executions`, `execution_values`,
//! `execution_computations`, and `sweep_runs`. JSON payloads use
//! `serde_json::Value` with string-keyed objects throughout, which keeps
//! equality comparison (the no-op write filter) stable.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::gating::Witness;
use crate::types::{ComputationState, ComputationType, NodeName, NodeType, SweepType};

/// One workflow instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionRow {
    /// Prefixed opaque id (prefix configurable per graph).
    pub id: String,
    pub graph_name: String,
    pub graph_version: String,
    /// SHA-256 of the graph used to create (or last evolve) this execution.
    pub graph_hash: String,
    /// Monotonic counter; the sole source of ordering truth.
    pub revision: i64,
    pub archived_at: Option<i64>,
    pub inserted_at: i64,
    pub updated_at: i64,
}

/// One value slot: `(execution_id, node_name)` unique.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValueRow {
    pub node_name: NodeName,
    pub node_type: NodeType,
    /// `None` exactly when the slot is unset (`set_time` is `None`).
    pub node_value: Option<serde_json::Value>,
    /// String-keyed JSON object; `{}` when never supplied.
    pub metadata: serde_json::Value,
    pub set_time: Option<i64>,
    /// Execution revision observed when this slot was last written.
    pub ex_revision: i64,
}

impl ValueRow {
    /// A never-set slot for the given node.
    #[must_use]
    pub fn unset(node_name: NodeName, node_type: NodeType) -> Self {
        ValueRow {
            node_name,
            node_type,
            node_value: None,
            metadata: serde_json::json!({}),
            set_time: None,
            ex_revision: 0,
        }
    }

    /// Whether the slot currently holds a value (which may be JSON null).
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.set_time.is_some()
    }
}

/// One attempt to evaluate a derived node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComputationRow {
    pub id: i64,
    pub execution_id: String,
    pub node_name: NodeName,
    pub computation_type: ComputationType,
    pub state: ComputationState,
    pub start_time: Option<i64>,
    /// Max upstream revision the attempt was created for.
    pub ex_revision_at_start: i64,
    pub ex_revision_at_completion: Option<i64>,
    /// `{upstream node → upstream revision}` captured at success.
    pub computed_with: FxHashMap<NodeName, i64>,
    pub error_details: Option<String>,
    pub last_heartbeat_at: Option<i64>,
    pub heartbeat_deadline: Option<i64>,
    pub inserted_at: i64,
    pub updated_at: i64,
}

/// Watermark row for one background sweep family.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SweepRunRow {
    pub id: i64,
    pub sweep_type: SweepType,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub executions_processed: i64,
}

/// An execution row together with all of its value slots.
#[derive(Clone, Debug)]
pub struct ExecutionSnapshot {
    pub execution: ExecutionRow,
    pub values: FxHashMap<NodeName, ValueRow>,
}

impl ExecutionSnapshot {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.execution.id
    }

    #[must_use]
    pub fn revision(&self) -> i64 {
        self.execution.revision
    }

    /// Look up one value slot.
    #[must_use]
    pub fn value(&self, name: &NodeName) -> Option<&ValueRow> {
        self.values.get(name)
    }

    /// `{name → value}` over every currently-set slot; the parameter map
    /// handed to user functions.
    #[must_use]
    pub fn set_params(&self) -> FxHashMap<NodeName, serde_json::Value> {
        self.values
            .iter()
            .filter(|(_, row)| row.is_set())
            .map(|(name, row)| {
                (
                    name.clone(),
                    row.node_value.clone().unwrap_or(serde_json::Value::Null),
                )
            })
            .collect()
    }
}

/// One slot write inside a `set`/`unset` transaction.
#[derive(Clone, Debug)]
pub struct ValueWrite {
    pub node: NodeName,
    /// `None` clears the slot.
    pub node_value: Option<serde_json::Value>,
    pub metadata: serde_json::Value,
}

impl ValueWrite {
    /// Write `value` with empty metadata.
    #[must_use]
    pub fn set(node: impl Into<NodeName>, value: serde_json::Value) -> Self {
        ValueWrite {
            node: node.into(),
            node_value: Some(value),
            metadata: serde_json::json!({}),
        }
    }

    /// Write `value` with the given metadata object.
    #[must_use]
    pub fn set_with_metadata(
        node: impl Into<NodeName>,
        value: serde_json::Value,
        metadata: serde_json::Value,
    ) -> Self {
        ValueWrite {
            node: node.into(),
            node_value: Some(value),
            metadata,
        }
    }

    /// Clear the slot.
    #[must_use]
    pub fn unset(node: impl Into<NodeName>) -> Self {
        ValueWrite {
            node: node.into(),
            node_value: None,
            metadata: serde_json::json!({}),
        }
    }

    /// Whether this write clears the slot.
    #[must_use]
    pub fn is_unset(&self) -> bool {
        self.node_value.is_none()
    }
}

/// Options for one transactional write batch.
#[derive(Clone, Copy, Debug)]
pub struct WriteOptions {
    /// When `false` (mutators by default), the slot content changes but
    /// neither the execution revision nor the slot's `ex_revision` moves,
    /// so downstream consumers do not recompute.
    pub bump_revision: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        WriteOptions {
            bump_revision: true,
        }
    }
}

/// Result of one transactional write batch.
#[derive(Clone, Debug)]
pub struct WriteOutcome {
    /// The revision stamped on the batch; `None` when every write was a
    /// no-op (or revision bumping was disabled).
    pub revision: Option<i64>,
    /// Slots actually changed, in write order.
    pub changed: Vec<NodeName>,
    /// Snapshot reloaded after commit.
    pub snapshot: ExecutionSnapshot,
}

/// A computation promoted to `computing`, with the readiness proof that
/// justified the grab.
#[derive(Clone, Debug)]
pub struct GrabbedComputation {
    pub computation: ComputationRow,
    pub witnesses: Vec<Witness>,
}

/// Outcome of one watchdog heartbeat attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// Deadline pushed out; keep going.
    Extended { deadline: i64 },
    /// A previous heartbeat was missed; the row must be abandoned.
    MissedDeadline,
    /// The computation already left `computing`; the watchdog can exit.
    Finished,
}

/// One historian log record, stored as a JSON array element in the
/// historian's own slot.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct HistorianEntry {
    pub value: serde_json::Value,
    pub node: NodeName,
    pub timestamp: i64,
    pub revision: i64,
    pub metadata: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unset_rows_hold_nothing() {
        let row = ValueRow::unset("x".into(), NodeType::Input);
        assert!(!row.is_set());
        assert_eq!(row.node_value, None);
        assert_eq!(row.ex_revision, 0);
    }

    #[test]
    fn set_to_null_is_still_set() {
        let mut row = ValueRow::unset("x".into(), NodeType::Input);
        row.node_value = Some(serde_json::Value::Null);
        row.set_time = Some(42);
        assert!(row.is_set());
    }

    #[test]
    fn historian_entry_round_trips() {
        let entry = HistorianEntry {
            value: json!({"reading": 7}),
            node: "sensor".into(),
            timestamp: 1_700_000_000,
            revision: 12,
            metadata: json!({}),
        };
        let encoded = serde_json::to_value(&entry).expect("encode");
        let decoded: HistorianEntry = serde_json::from_value(encoded).expect("decode");
        assert_eq!(decoded, entry);
    }

    #[test]
    fn set_params_skips_unset_slots() {
        let mut values = FxHashMap::default();
        values.insert(
            NodeName::from("a"),
            ValueRow {
                node_name: "a".into(),
                node_type: NodeType::Input,
                node_value: Some(json!("hello")),
                metadata: json!({}),
                set_time: Some(1),
                ex_revision: 1,
            },
        );
        values.insert(
            NodeName::from("b"),
            ValueRow::unset("b".into(), NodeType::Compute),
        );
        let snapshot = ExecutionSnapshot {
            execution: ExecutionRow {
                id: "exec_1".into(),
                graph_name: "g".into(),
                graph_version: "v1".into(),
                graph_hash: "h".into(),
                revision: 1,
                archived_at: None,
                inserted_at: 0,
                updated_at: 0,
            },
            values,
        };
        let params = snapshot.set_params();
        assert_eq!(params.len(), 1);
        assert_eq!(params.get(&"a".into()), Some(&json!("hello")));
    }
}
