//! Additive schema evolution for executions created against an older
//! graph revision.
//!
//! Every execution load compares the stored `graph_hash` with the
//! catalog's current hash for the same `(name, version)`. A mismatch
//! means the graph gained nodes since the execution was created; the
//! store then, under a per-execution advisory transaction lock:
//!
//! 1. re-reads the execution (a concurrent evolution may have won),
//! 2. inserts a never-set value row (`ex_revision = 0`) for each missing
//!    node plus a pending computation for each missing derived node,
//! 3. updates the stored hash.
//!
//! Evolution is idempotent and strictly additive; node deletions and type
//! changes are not supported and leave existing rows untouched.

use std::sync::Arc;

use crate::graphs::Graph;
use crate::store::{ExecutionSnapshot, Store, StoreResult};

/// Return `snapshot` unchanged when it matches the graph, otherwise run
/// additive evolution and return the reconciled snapshot.
pub async fn ensure_current(
    store: &Arc<dyn Store>,
    graph: &Graph,
    snapshot: ExecutionSnapshot,
) -> StoreResult<ExecutionSnapshot> {
    if snapshot.execution.graph_hash == graph.hash() {
        return Ok(snapshot);
    }
    tracing::info!(
        execution = snapshot.id(),
        graph = graph.name(),
        "graph hash drift detected; evolving execution"
    );
    store.evolve_execution(graph, snapshot.id()).await
}
