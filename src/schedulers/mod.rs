//! The stateless scheduler: readiness-driven advancement of executions.
//!
//! [`Scheduler`] owns no state beyond its handles to the store and the
//! graph catalog; any number of processes may advance the same execution
//! concurrently. The per-execution pipeline is:
//!
//! 1. Load the execution; if its graph is not in the catalog, return it
//!    unchanged.
//! 2. Run additive schema evolution when the stored graph hash differs
//!    from the catalog's.
//! 3. Run the recompute detector ([`recompute`]).
//! 4. Grab ready computations under `FOR UPDATE SKIP LOCKED` and launch a
//!    detached [`worker`] for each.
//!
//! Duplicate work is impossible by construction: the detector's
//! uniqueness rule refuses a second pending row per `(node, ≥ revision)`,
//! and the grab promotes each row at most once.

pub mod invalidate;
pub mod recompute;
pub mod watchdog;
pub mod worker;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use miette::Diagnostic;
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

use crate::graphs::{Graph, GraphCatalog};
use crate::store::{ExecutionSnapshot, Store, StoreError};

/// Errors from scheduling operations.
#[derive(Debug, Error, Diagnostic)]
pub enum SchedulerError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    /// The execution references a graph the catalog does not know.
    #[error("graph not registered: {name} {version}")]
    #[diagnostic(
        code(gategraph::schedulers::unknown_graph),
        help("Register the graph via a config factory before loading its executions.")
    )]
    UnknownGraph { name: String, version: String },
}

/// Stateless scheduling front-end over one store and one catalog.
pub struct Scheduler {
    store: Arc<dyn Store>,
    catalog: Arc<GraphCatalog>,
}

impl Scheduler {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, catalog: Arc<GraphCatalog>) -> Self {
        Scheduler { store, catalog }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    #[must_use]
    pub fn catalog(&self) -> &Arc<GraphCatalog> {
        &self.catalog
    }

    /// The catalog entry for an execution's `(graph_name, graph_version)`.
    pub fn graph_for(&self, snapshot: &ExecutionSnapshot) -> Option<Arc<Graph>> {
        self.catalog.get(
            &snapshot.execution.graph_name,
            &snapshot.execution.graph_version,
        )
    }

    /// Advance one execution: evolve, detect, grab, launch.
    ///
    /// Returns the refreshed snapshot. Executions whose graph is missing
    /// from the catalog are returned unchanged; advancing is always safe
    /// to repeat and safe to run concurrently. Takes an owned handle so
    /// the launched workers can hold the scheduler past this call.
    #[instrument(skip(self), err)]
    pub async fn advance(
        self: Arc<Self>,
        execution_id: &str,
    ) -> Result<ExecutionSnapshot, SchedulerError> {
        let snapshot = self
            .store
            .load_execution(execution_id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                execution_id: execution_id.to_string(),
            })?;

        let Some(graph) = self.graph_for(&snapshot) else {
            tracing::warn!(
                execution = execution_id,
                graph = %snapshot.execution.graph_name,
                version = %snapshot.execution.graph_version,
                "advance skipped: graph not in catalog"
            );
            return Ok(snapshot);
        };

        let snapshot = crate::evolution::ensure_current(&self.store, &graph, snapshot).await?;

        recompute::detect(&self.store, &graph, &snapshot).await?;

        let grabbed = self.store.grab_available(&graph, execution_id).await?;
        for grab in grabbed {
            let _ = worker::launch(Arc::clone(&self), Arc::clone(&graph), grab);
        }

        let refreshed = self
            .store
            .load_execution(execution_id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                execution_id: execution_id.to_string(),
            })?;
        Ok(refreshed)
    }

    /// Boxed, owning form of [`advance`](Self::advance) for detached
    /// tasks (workers and sweeps) that re-enter the scheduler.
    pub fn advance_owned(
        self: Arc<Self>,
        execution_id: String,
    ) -> BoxFuture<'static, Result<ExecutionSnapshot, SchedulerError>> {
        async move { self.advance(&execution_id).await }.boxed()
    }
}
