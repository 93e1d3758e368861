//! Waiting reads: `get_value` with revision-aware polling.
//!
//! Waiters poll the store with exponential backoff plus jitter (capped at
//! 30 s between probes). While waiting they watch the target node's
//! computations: when nothing is active and the current cycle's failures
//! have exhausted `max_retries`, the waiter returns `ComputationFailed`
//! early instead of burning its whole timeout.

use miette::Diagnostic;
use rand::RngExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::graphs::Graph;
use crate::schedulers::recompute;
use crate::store::{Store, StoreError, ValueRow};
use crate::types::NodeName;

/// Initial pause between probes.
const BACKOFF_INITIAL: Duration = Duration::from_millis(50);
/// Probes never sleep longer than this.
const BACKOFF_CAP: Duration = Duration::from_secs(30);
/// Default deadline when a wait mode is requested without a timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// What the caller is waiting for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Wait {
    /// No waiting: return the current state immediately.
    #[default]
    None,
    /// Any set value.
    Any,
    /// A value newer than the row's revision observed at call time.
    Newer,
    /// A value with `ex_revision` strictly above the given revision.
    NewerThan(i64),
}

/// Options for [`get_value`].
#[derive(Clone, Copy, Debug, Default)]
pub struct GetOptions {
    pub wait: Wait,
    /// Deadline for waiting modes; defaults to 30 s when a wait mode is
    /// set.
    pub timeout: Option<Duration>,
}

impl GetOptions {
    /// Wait for any set value.
    #[must_use]
    pub fn wait_any() -> Self {
        GetOptions {
            wait: Wait::Any,
            timeout: None,
        }
    }

    /// Wait for a value newer than the one visible now.
    #[must_use]
    pub fn wait_newer() -> Self {
        GetOptions {
            wait: Wait::Newer,
            timeout: None,
        }
    }

    /// Wait for a value newer than `revision`.
    #[must_use]
    pub fn wait_newer_than(revision: i64) -> Self {
        GetOptions {
            wait: Wait::NewerThan(revision),
            timeout: None,
        }
    }

    /// Override the waiting deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Errors from the reading surface.
#[derive(Debug, Error, Diagnostic)]
pub enum GetError {
    /// The slot has no value (possibly after the waiting deadline).
    #[error("value not set: {node}")]
    #[diagnostic(code(gategraph::values::not_set))]
    NotSet { node: NodeName },

    /// Retries for the current upstream cycle are exhausted.
    #[error("computation failed for node: {node}")]
    #[diagnostic(
        code(gategraph::values::computation_failed),
        help("Inspect the execution's computation history for the recorded error details.")
    )]
    ComputationFailed { node: NodeName },

    /// The graph does not declare this node.
    #[error("unknown node: {node}")]
    #[diagnostic(code(gategraph::values::unknown_node))]
    UnknownNode { node: NodeName },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),
}

/// Read one value slot, optionally waiting for it per `options`.
pub async fn get_value(
    store: &Arc<dyn Store>,
    graph: &Graph,
    execution_id: &str,
    node: &NodeName,
    options: GetOptions,
) -> Result<ValueRow, GetError> {
    let node_def = graph
        .node(node)
        .ok_or_else(|| GetError::UnknownNode { node: node.clone() })?;

    let load = |store: Arc<dyn Store>| async move {
        store
            .load_execution(execution_id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                execution_id: execution_id.to_string(),
            })
    };

    let snapshot = load(Arc::clone(store)).await?;
    let current_rev = snapshot.value(node).map(|r| r.ex_revision).unwrap_or(0);

    // `Newer` pins its threshold to the revision visible at call time.
    let threshold = match options.wait {
        Wait::NewerThan(rev) => Some(rev),
        Wait::Newer => Some(current_rev),
        Wait::None | Wait::Any => None,
    };

    let satisfied = |row: Option<&ValueRow>| -> Option<ValueRow> {
        let row = row?;
        if !row.is_set() {
            return None;
        }
        match threshold {
            Some(rev) if row.ex_revision <= rev => None,
            _ => Some(row.clone()),
        }
    };

    if let Some(row) = satisfied(snapshot.value(node)) {
        return Ok(row);
    }
    if options.wait == Wait::None {
        return Err(GetError::NotSet { node: node.clone() });
    }

    let deadline = Instant::now() + options.timeout.unwrap_or(DEFAULT_TIMEOUT);
    let max_retries = node_def.policy().map(|p| p.max_retries).unwrap_or(1);
    let mut pause = BACKOFF_INITIAL;

    loop {
        let snapshot = load(Arc::clone(store)).await?;
        if let Some(row) = satisfied(snapshot.value(node)) {
            return Ok(row);
        }

        // Give up early when the node cannot produce anything this cycle.
        if node_def.node_type().is_derived() {
            let active = store
                .active_computation_exists(execution_id, node, 0)
                .await?;
            if !active {
                let max_rev = recompute::max_upstream_revision(node_def, &snapshot);
                let failures = store
                    .count_failures_since(execution_id, node, max_rev)
                    .await?;
                if failures >= max_retries {
                    return Err(GetError::ComputationFailed { node: node.clone() });
                }
            }
        }

        if Instant::now() >= deadline {
            return Err(GetError::NotSet { node: node.clone() });
        }

        let jitter: f64 = rand::rng().random_range(0.8..=1.2);
        let sleep = pause
            .mul_f64(jitter)
            .min(deadline.saturating_duration_since(Instant::now()));
        tokio::time::sleep(sleep).await;
        pause = (pause * 2).min(BACKOFF_CAP);
    }
}
