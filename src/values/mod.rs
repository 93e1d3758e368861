//! The value-setting surface: `set`, `set_many`, `unset`, `unset_many`,
//! and the waiting `get` family.
//!
//! Setting is a pipeline, not a bare write: validate → transactional
//! write batch (no-op filter, revision bump, `last_updated_at` re-stamp)
//! → invalidate unsupported downstream slots → `advance`. Only `input`
//! nodes may be set or unset directly; derived slots are owned by their
//! computations.

pub mod waiters;

pub use waiters::{GetError, GetOptions, Wait, get_value};

use miette::Diagnostic;
use std::sync::Arc;
use thiserror::Error;

use crate::graphs::Graph;
use crate::schedulers::{Scheduler, SchedulerError, invalidate};
use crate::store::{ExecutionSnapshot, StoreError, ValueWrite, WriteOptions};
use crate::types::{NodeName, NodeType};

/// Errors from the setting surface.
#[derive(Debug, Error, Diagnostic)]
pub enum SetError {
    /// The named node is not a settable input.
    #[error("`{node}` is not an input node; settable inputs: {valid_inputs:?}")]
    #[diagnostic(
        code(gategraph::values::invalid_input_node),
        help("Only input nodes accept set/unset; derived slots are written by their computations.")
    )]
    InvalidInputNode {
        node: NodeName,
        valid_inputs: Vec<NodeName>,
    },

    /// The value or metadata payload has an unsupported shape.
    #[error("invalid value shape for `{node}`: {reason}")]
    #[diagnostic(
        code(gategraph::values::invalid_value_shape),
        help("Values must be JSON-representable; metadata must be a string-keyed JSON object.")
    )]
    InvalidValueShape { node: NodeName, reason: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Scheduler(#[from] SchedulerError),
}

/// The declared input names of a graph, for error messages.
fn valid_inputs(graph: &Graph) -> Vec<NodeName> {
    graph
        .nodes()
        .iter()
        .filter(|n| n.node_type() == NodeType::Input && !n.name.is_synthetic())
        .map(|n| n.name.clone())
        .collect()
}

fn validate_writes(graph: &Graph, writes: &[ValueWrite]) -> Result<(), SetError> {
    for write in writes {
        let settable = graph
            .node_type(&write.node)
            .is_some_and(|t| t == NodeType::Input)
            && !write.node.is_synthetic();
        if !settable {
            return Err(SetError::InvalidInputNode {
                node: write.node.clone(),
                valid_inputs: valid_inputs(graph),
            });
        }
        if !write.metadata.is_object() {
            return Err(SetError::InvalidValueShape {
                node: write.node.clone(),
                reason: format!("metadata must be a JSON object, got: {}", write.metadata),
            });
        }
    }
    Ok(())
}

/// Apply a validated write batch and drive the cascade: write →
/// invalidate → advance. Returns the snapshot after `advance`.
pub(crate) async fn apply_writes(
    scheduler: &Arc<Scheduler>,
    graph: &Graph,
    execution_id: &str,
    writes: Vec<ValueWrite>,
) -> Result<ExecutionSnapshot, SetError> {
    validate_writes(graph, &writes)?;

    let store = scheduler.store();
    let outcome = store
        .write_values(execution_id, &writes, WriteOptions::default())
        .await?;

    if !outcome.changed.is_empty() {
        invalidate::run(store, graph, execution_id, &outcome.changed).await?;
    }
    let snapshot = Arc::clone(scheduler).advance(execution_id).await?;
    Ok(snapshot)
}
