//! Row decoding and key derivation for the PostgreSQL store.
//!
//! Database I/O stays in `postgres.rs`; the pure row → model conversions
//! live here.

use rustc_hash::FxHashMap;
use sha2::{Digest, Sha256};
use sqlx::Row;
use sqlx::postgres::PgRow;

use crate::store::models::{ComputationRow, ExecutionRow, SweepRunRow, ValueRow};
use crate::store::{StoreError, StoreResult};
use crate::types::{ComputationState, ComputationType, NodeName, NodeType, SweepType};

pub(super) fn decode_execution(row: &PgRow) -> StoreResult<ExecutionRow> {
    Ok(ExecutionRow {
        id: row.try_get("id")?,
        graph_name: row.try_get("graph_name")?,
        graph_version: row.try_get("graph_version")?,
        graph_hash: row.try_get("graph_hash")?,
        revision: row.try_get("revision")?,
        archived_at: row.try_get("archived_at")?,
        inserted_at: row.try_get("inserted_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub(super) fn decode_value(row: &PgRow) -> StoreResult<ValueRow> {
    let node_type: String = row.try_get("node_type")?;
    let node_type = NodeType::decode(&node_type).ok_or_else(|| StoreError::Serde {
        message: format!("unknown node type tag: {node_type}"),
    })?;
    let metadata: Option<serde_json::Value> = row.try_get("metadata")?;
    Ok(ValueRow {
        node_name: NodeName::from(row.try_get::<String, _>("node_name")?),
        node_type,
        node_value: row.try_get("node_value")?,
        metadata: metadata.unwrap_or_else(|| serde_json::json!({})),
        set_time: row.try_get("set_time")?,
        ex_revision: row.try_get("ex_revision")?,
    })
}

pub(super) fn decode_computation(row: &PgRow) -> StoreResult<ComputationRow> {
    let computation_type: String = row.try_get("computation_type")?;
    let computation_type =
        ComputationType::decode(&computation_type).ok_or_else(|| StoreError::Serde {
            message: format!("unknown computation type tag: {computation_type}"),
        })?;
    let state: String = row.try_get("state")?;
    let state = ComputationState::decode(&state).ok_or_else(|| StoreError::Serde {
        message: format!("unknown computation state tag: {state}"),
    })?;
    Ok(ComputationRow {
        id: row.try_get("id")?,
        execution_id: row.try_get("execution_id")?,
        node_name: NodeName::from(row.try_get::<String, _>("node_name")?),
        computation_type,
        state,
        start_time: row.try_get("start_time")?,
        ex_revision_at_start: row.try_get("ex_revision_at_start")?,
        ex_revision_at_completion: row.try_get("ex_revision_at_completion")?,
        computed_with: decode_computed_with(row.try_get("computed_with")?)?,
        error_details: row.try_get("error_details")?,
        last_heartbeat_at: row.try_get("last_heartbeat_at")?,
        heartbeat_deadline: row.try_get("heartbeat_deadline")?,
        inserted_at: row.try_get("inserted_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub(super) fn decode_sweep_run(row: &PgRow) -> StoreResult<SweepRunRow> {
    let sweep_type: String = row.try_get("sweep_type")?;
    let sweep_type = SweepType::decode(&sweep_type).ok_or_else(|| StoreError::Serde {
        message: format!("unknown sweep type tag: {sweep_type}"),
    })?;
    Ok(SweepRunRow {
        id: row.try_get("id")?,
        sweep_type,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        executions_processed: row.try_get("executions_processed")?,
    })
}

pub(super) fn encode_computed_with(map: &FxHashMap<NodeName, i64>) -> serde_json::Value {
    serde_json::Value::Object(
        map.iter()
            .map(|(name, rev)| (name.to_string(), serde_json::json!(rev)))
            .collect(),
    )
}

pub(super) fn decode_computed_with(
    value: Option<serde_json::Value>,
) -> StoreResult<FxHashMap<NodeName, i64>> {
    let Some(value) = value else {
        return Ok(FxHashMap::default());
    };
    let object = value.as_object().ok_or_else(|| StoreError::Serde {
        message: "computed_with is not a JSON object".to_string(),
    })?;
    let mut out = FxHashMap::default();
    for (name, rev) in object {
        let rev = rev.as_i64().ok_or_else(|| StoreError::Serde {
            message: format!("computed_with[{name}] is not an integer"),
        })?;
        out.insert(NodeName::from(name.as_str()), rev);
    }
    Ok(out)
}

/// Stable 32-bit advisory-lock key for a string, from the leading bytes
/// of its SHA-256.
pub(super) fn advisory_key(s: &str) -> i32 {
    let digest = Sha256::digest(s.as_bytes());
    i32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}
