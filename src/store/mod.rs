//! Durable state: the `Store` trait and its PostgreSQL backend.
//!
//! The store owns all persistent state: executions, value slots,
//! computation rows, and sweep watermarks. Every method is one complete
//! transactional unit: the revision increment commits atomically with the
//! writes it stamps, the availability grab promotes each pending row at
//! most once under `FOR UPDATE SKIP LOCKED`, and schema evolution runs
//! under an advisory transaction lock.
//!
//! The scheduler is stateless on top of this interface and may run in
//! many processes against one database.
//!
//! # Backends
//!
//! * [`PostgresStore`]: the shipped backend; requires row-level locks,
//!   `SKIP LOCKED`, and `pg_advisory_xact_lock`.
//!
//! Other backends (an in-memory store for tests, for instance) implement
//! the same trait externally.

pub mod models;
#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "postgres")]
mod postgres_helpers;

pub use models::{
    ComputationRow, ExecutionRow, ExecutionSnapshot, GrabbedComputation, HeartbeatOutcome,
    HistorianEntry, SweepRunRow, ValueRow, ValueWrite, WriteOptions, WriteOutcome,
};
#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::graphs::Graph;
use crate::types::{ComputationType, NodeName, SweepType};

/// Current wall-clock time as epoch seconds.
#[must_use]
pub fn now_epoch() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Errors from store operations.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    /// The execution does not exist.
    #[error("execution not found: {execution_id}")]
    #[diagnostic(
        code(gategraph::store::not_found),
        help("Check the execution id `{execution_id}`; archived executions still load.")
    )]
    NotFound { execution_id: String },

    /// Backend storage error (connection, constraint, transaction).
    #[error("backend error: {message}")]
    #[diagnostic(
        code(gategraph::store::backend),
        help("Check database connectivity and migrations; backend message: {message}.")
    )]
    Backend { message: String },

    /// A persisted payload could not be decoded.
    #[error("serialization error: {message}")]
    #[diagnostic(code(gategraph::store::serde))]
    Serde { message: String },

    /// Other store errors.
    #[error("store error: {message}")]
    #[diagnostic(code(gategraph::store::other))]
    Other { message: String },
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Backend {
            message: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serde {
            message: e.to_string(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Transactional interface to the durable state.
///
/// Implementations must guarantee:
///
/// * **Atomic revision bumps**: a write batch with `bump_revision`
///   commits the increment and every stamped row together; readers never
///   observe a write at revision `r` without the execution at `r`.
/// * **Single promotion**: [`grab_available`](Store::grab_available)
///   promotes each pending computation at most once across any number of
///   concurrent callers.
/// * **Serialized evolution**: [`evolve_execution`](Store::evolve_execution)
///   for one execution never runs concurrently with itself.
#[async_trait]
pub trait Store: Send + Sync {
    /// Create a fresh execution: the execution row at revision 0, one
    /// value row per graph node (the synthetic slots pre-set), and a
    /// pending computation per derived node.
    async fn create_execution(&self, graph: &Graph) -> StoreResult<ExecutionSnapshot>;

    /// Create-or-return the single live execution for the graph's name,
    /// serialized under an advisory lock.
    async fn create_singleton_execution(&self, graph: &Graph) -> StoreResult<ExecutionSnapshot>;

    /// Load one execution with all of its value slots.
    async fn load_execution(&self, execution_id: &str) -> StoreResult<Option<ExecutionSnapshot>>;

    /// Apply a write batch: filter no-ops, bump the revision (unless
    /// disabled), stamp changed slots, and re-stamp `last_updated_at`.
    async fn write_values(
        &self,
        execution_id: &str,
        writes: &[ValueWrite],
        options: WriteOptions,
    ) -> StoreResult<WriteOutcome>;

    /// Stamp or clear `archived_at`.
    async fn set_archived(&self, execution_id: &str, archived: bool) -> StoreResult<ExecutionRow>;

    /// Insert a pending computation at `at_revision` unless an active one
    /// already exists at `>= at_revision`. Superseded pending rows at
    /// lower revisions are cancelled. Returns whether a row was inserted.
    async fn insert_pending_computation(
        &self,
        execution_id: &str,
        node: &NodeName,
        computation_type: ComputationType,
        at_revision: i64,
    ) -> StoreResult<bool>;

    /// Whether an active (`not_set`/`computing`) row exists for the node
    /// at `>= min_revision`.
    async fn active_computation_exists(
        &self,
        execution_id: &str,
        node: &NodeName,
        min_revision: i64,
    ) -> StoreResult<bool>;

    /// Most recent successful computation for the node, by completion
    /// revision.
    async fn latest_success(
        &self,
        execution_id: &str,
        node: &NodeName,
    ) -> StoreResult<Option<ComputationRow>>;

    /// Failed attempts for the node at `ex_revision_at_start >=
    /// min_revision`, i.e. the current-cycle retry count.
    async fn count_failures_since(
        &self,
        execution_id: &str,
        node: &NodeName,
        min_revision: i64,
    ) -> StoreResult<u32>;

    /// Promote every ready pending computation to `computing` under
    /// `FOR UPDATE SKIP LOCKED`, stamping start time and heartbeat
    /// deadline, and return each with its readiness witness.
    async fn grab_available(
        &self,
        graph: &Graph,
        execution_id: &str,
    ) -> StoreResult<Vec<GrabbedComputation>>;

    /// Record success with the captured upstream revisions. If the row
    /// already left `computing` (abandoned meanwhile), the row is
    /// returned unchanged.
    async fn record_success(
        &self,
        computation_id: i64,
        computed_with: &FxHashMap<NodeName, i64>,
    ) -> StoreResult<ComputationRow>;

    /// Record failure with the error text. Same already-left-`computing`
    /// behavior as [`record_success`](Store::record_success).
    async fn record_failure(
        &self,
        computation_id: i64,
        error_details: &str,
    ) -> StoreResult<ComputationRow>;

    /// Extend the heartbeat deadline, or report why it cannot be
    /// extended.
    async fn heartbeat(
        &self,
        computation_id: i64,
        timeout_seconds: i64,
    ) -> StoreResult<HeartbeatOutcome>;

    /// Transition `computing → abandoned`; `None` when the row already
    /// finished.
    async fn abandon_computation(&self, computation_id: i64)
    -> StoreResult<Option<ComputationRow>>;

    /// Every computation row of the execution, oldest first.
    async fn computations(&self, execution_id: &str) -> StoreResult<Vec<ComputationRow>>;

    /// `computing` rows whose heartbeat deadline has passed `now`.
    async fn abandonable_computations(
        &self,
        execution_id: &str,
        now: i64,
    ) -> StoreResult<Vec<ComputationRow>>;

    /// Last completed watermark row for the sweep family.
    async fn last_completed_sweep(&self, sweep_type: SweepType)
    -> StoreResult<Option<SweepRunRow>>;

    /// Open a new watermark row stamped `started_at = now`.
    async fn start_sweep(&self, sweep_type: SweepType) -> StoreResult<SweepRunRow>;

    /// Close a watermark row with its processed count.
    async fn complete_sweep(
        &self,
        sweep_id: i64,
        executions_processed: i64,
    ) -> StoreResult<SweepRunRow>;

    /// Non-archived executions touched at or after the cutoff.
    async fn executions_updated_since(&self, cutoff: i64) -> StoreResult<Vec<String>>;

    /// Additively reconcile the execution's node set with the graph under
    /// an advisory transaction lock; returns the (possibly unchanged)
    /// snapshot.
    async fn evolve_execution(
        &self,
        graph: &Graph,
        execution_id: &str,
    ) -> StoreResult<ExecutionSnapshot>;
}
