//! The recompute detector: decides which derived nodes need a fresh
//! pending computation.
//!
//! For each derived node, the detector takes `max_upstream_rev`, the
//! maximum `ex_revision` over every gate leaf (leaves under `Or` and
//! `Not` included), and inserts a `not_set` row at that revision iff:
//!
//! 1. no active row exists at `>= max_upstream_rev`,
//! 2. the latest success's `computed_with` differs from the current
//!    upstream revision snapshot, and
//! 3. the current cycle's failure count is still below `max_retries`
//!    (otherwise the node is permanently failed for this cycle).
//!
//! Failure counting is scoped to `ex_revision_at_start >=
//! max_upstream_rev`: once an upstream (a recurring timer, say) advances
//! past old failures, the retry budget resets.

use rustc_hash::FxHashMap;
use std::sync::Arc;

use crate::graphs::{Graph, NodeDef};
use crate::store::{ExecutionSnapshot, Store, StoreResult};
use crate::types::NodeName;

/// Current `{leaf → ex_revision}` snapshot for a node's gate.
pub(crate) fn upstream_revisions(
    node: &NodeDef,
    snapshot: &ExecutionSnapshot,
) -> FxHashMap<NodeName, i64> {
    let Some(gate) = node.gate() else {
        return FxHashMap::default();
    };
    gate.leaves()
        .iter()
        .map(|leaf| {
            let rev = snapshot
                .value(&leaf.node)
                .map(|row| row.ex_revision)
                .unwrap_or(0);
            (leaf.node.clone(), rev)
        })
        .collect()
}

/// Maximum upstream revision a node's gate currently observes.
pub(crate) fn max_upstream_revision(node: &NodeDef, snapshot: &ExecutionSnapshot) -> i64 {
    upstream_revisions(node, snapshot)
        .values()
        .max()
        .copied()
        .unwrap_or(0)
}

/// Create pending computations for every derived node whose upstream
/// revisions advanced past its last success.
pub async fn detect(
    store: &Arc<dyn Store>,
    graph: &Graph,
    snapshot: &ExecutionSnapshot,
) -> StoreResult<()> {
    let execution_id = snapshot.id();

    for node in graph.derived_nodes() {
        let Some(computation_type) = node.node_type().computation_type() else {
            continue;
        };

        let current = upstream_revisions(node, snapshot);
        let max_rev = current.values().max().copied().unwrap_or(0);

        if store
            .active_computation_exists(execution_id, &node.name, max_rev)
            .await?
        {
            continue;
        }

        if let Some(success) = store.latest_success(execution_id, &node.name).await? {
            if success.computed_with == current {
                continue;
            }
        }

        let max_retries = node.policy().map(|p| p.max_retries).unwrap_or(1);
        if store
            .count_failures_since(execution_id, &node.name, max_rev)
            .await?
            >= max_retries
        {
            // Permanently failed for this upstream cycle; a later cycle
            // resets the budget.
            continue;
        }

        let inserted = store
            .insert_pending_computation(execution_id, &node.name, computation_type, max_rev)
            .await?;
        if inserted {
            tracing::debug!(
                execution = execution_id,
                node = %node.name,
                revision = max_rev,
                "pending computation created"
            );
        }
    }
    Ok(())
}
