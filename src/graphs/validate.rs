//! Construction-time validation of graph definitions.
//!
//! Every check here fails graph construction, never execution: a graph
//! that registers is coherent. Checked: reserved/duplicate names, gating
//! references to undeclared nodes, empty boolean clauses, mutate targets,
//! and heartbeat bounds.

use miette::Diagnostic;
use rustc_hash::FxHashSet;
use thiserror::Error;

use crate::gating::Gate;
use crate::graphs::node::NodeDef;
use crate::types::NodeName;

/// Errors raised while constructing a graph.
#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    /// Two nodes share a name.
    #[error("duplicate node name: {name}")]
    #[diagnostic(
        code(gategraph::graphs::duplicate_node_name),
        help("Every node in a graph needs a unique name; rename one of the `{name}` nodes.")
    )]
    DuplicateNodeName { name: NodeName },

    /// A declared name collides with a synthetic slot.
    #[error("reserved node name: {name}")]
    #[diagnostic(
        code(gategraph::graphs::reserved_node_name),
        help("`execution_id` and `last_updated_at` are injected into every graph automatically.")
    )]
    ReservedNodeName { name: NodeName },

    /// A gate references a node the graph does not declare.
    #[error("node `{node}` gates on undeclared dependency `{dependency}`")]
    #[diagnostic(
        code(gategraph::graphs::unknown_dependency),
        help("Declare `{dependency}` in the same graph or fix the gating expression.")
    )]
    UnknownDependency {
        node: NodeName,
        dependency: NodeName,
    },

    /// The gating tree cannot be interpreted.
    #[error("invalid gating expression for `{node}`: {reason}")]
    #[diagnostic(code(gategraph::graphs::invalid_gating_expression))]
    InvalidGatingExpression { node: NodeName, reason: String },

    /// A mutator targets a slot the graph does not declare.
    #[error("node `{node}` mutates undeclared target `{target}`")]
    #[diagnostic(
        code(gategraph::graphs::unknown_mutate_target),
        help("Declare `{target}` in the same graph or point `mutates` at an existing node.")
    )]
    UnknownMutateTarget { node: NodeName, target: NodeName },

    /// Heartbeat settings violate the engine bounds.
    #[error("invalid heartbeat configuration for `{node}`: {reason}")]
    #[diagnostic(
        code(gategraph::graphs::invalid_heartbeat_config),
        help(
            "Bounds: interval >= 30s, interval <= timeout / 2, and timeout <= abandon_after when both are set."
        )
    )]
    InvalidHeartbeatConfig { node: NodeName, reason: String },
}

pub(crate) fn validate(nodes: &[NodeDef]) -> Result<(), GraphError> {
    let mut seen: FxHashSet<&NodeName> = FxHashSet::default();
    for node in nodes {
        if node.name.is_synthetic() {
            return Err(GraphError::ReservedNodeName {
                name: node.name.clone(),
            });
        }
        if !seen.insert(&node.name) {
            return Err(GraphError::DuplicateNodeName {
                name: node.name.clone(),
            });
        }
    }

    let declared: FxHashSet<&NodeName> = nodes.iter().map(|n| &n.name).collect();

    for node in nodes {
        if let Some(gate) = node.gate() {
            validate_gate(&node.name, gate)?;
            for leaf in gate.leaves() {
                let known = declared.contains(&leaf.node) || leaf.node.is_synthetic();
                if !known {
                    return Err(GraphError::UnknownDependency {
                        node: node.name.clone(),
                        dependency: leaf.node.clone(),
                    });
                }
            }
        }
        if let Some(target) = node.mutates() {
            if !declared.contains(target) {
                return Err(GraphError::UnknownMutateTarget {
                    node: node.name.clone(),
                    target: target.clone(),
                });
            }
        }
        if let Some(policy) = node.policy() {
            validate_policy(&node.name, policy)?;
        }
    }

    Ok(())
}

fn validate_gate(node: &NodeName, gate: &Gate) -> Result<(), GraphError> {
    match gate {
        Gate::Leaf(_) => Ok(()),
        Gate::And(clauses) | Gate::Or(clauses) => {
            if clauses.is_empty() {
                return Err(GraphError::InvalidGatingExpression {
                    node: node.clone(),
                    reason: "empty clause list".to_string(),
                });
            }
            for clause in clauses {
                validate_gate(node, clause)?;
            }
            Ok(())
        }
        Gate::Not(clause) => validate_gate(node, clause),
    }
}

fn validate_policy(
    node: &NodeName,
    policy: &crate::graphs::node::RunPolicy,
) -> Result<(), GraphError> {
    if policy.heartbeat_interval_seconds < 30 {
        return Err(GraphError::InvalidHeartbeatConfig {
            node: node.clone(),
            reason: format!(
                "heartbeat interval {}s is below the 30s floor",
                policy.heartbeat_interval_seconds
            ),
        });
    }
    if policy.heartbeat_interval_seconds > policy.heartbeat_timeout_seconds / 2 {
        return Err(GraphError::InvalidHeartbeatConfig {
            node: node.clone(),
            reason: format!(
                "heartbeat interval {}s must be at most half the {}s timeout",
                policy.heartbeat_interval_seconds, policy.heartbeat_timeout_seconds
            ),
        });
    }
    if let Some(abandon_after) = policy.abandon_after_seconds {
        if policy.heartbeat_timeout_seconds > abandon_after {
            return Err(GraphError::InvalidHeartbeatConfig {
                node: node.clone(),
                reason: format!(
                    "heartbeat timeout {}s exceeds abandon_after {}s",
                    policy.heartbeat_timeout_seconds, abandon_after
                ),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphs::node::{self, from_fn};
    use serde_json::json;

    fn ok_fn() -> std::sync::Arc<dyn node::ComputeFn> {
        from_fn(|_| Ok(json!(1)))
    }

    #[test]
    fn accepts_a_coherent_graph() {
        let nodes = vec![
            node::input("a"),
            node::compute("b", vec!["a"], ok_fn()),
            node::mutate("m", vec!["b"], ok_fn(), "a"),
        ];
        assert!(validate(&nodes).is_ok());
    }

    #[test]
    fn rejects_duplicate_names() {
        let nodes = vec![node::input("a"), node::input("a")];
        assert!(matches!(
            validate(&nodes),
            Err(GraphError::DuplicateNodeName { .. })
        ));
    }

    #[test]
    fn rejects_reserved_names() {
        let nodes = vec![node::input("execution_id")];
        assert!(matches!(
            validate(&nodes),
            Err(GraphError::ReservedNodeName { .. })
        ));
    }

    #[test]
    fn rejects_unknown_dependencies() {
        let nodes = vec![node::compute("b", vec!["ghost"], ok_fn())];
        assert!(matches!(
            validate(&nodes),
            Err(GraphError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn allows_gating_on_synthetic_slots() {
        let nodes = vec![node::historian("log", vec!["last_updated_at"])];
        assert!(validate(&nodes).is_ok());
    }

    #[test]
    fn rejects_empty_boolean_clauses() {
        let nodes = vec![node::compute(
            "b",
            crate::gating::Gate::And(vec![]),
            ok_fn(),
        )];
        assert!(matches!(
            validate(&nodes),
            Err(GraphError::InvalidGatingExpression { .. })
        ));
    }

    #[test]
    fn rejects_unknown_mutate_target() {
        let nodes = vec![node::input("a"), node::mutate("m", vec!["a"], ok_fn(), "ghost")];
        assert!(matches!(
            validate(&nodes),
            Err(GraphError::UnknownMutateTarget { .. })
        ));
    }

    #[test]
    fn heartbeat_bounds() {
        let too_fast = vec![node::compute("b", vec!["a"], ok_fn())
            .with_heartbeat(10, 300)];
        assert!(matches!(
            validate(&[node::input("a")]
                .into_iter()
                .chain(too_fast)
                .collect::<Vec<_>>()),
            Err(GraphError::InvalidHeartbeatConfig { .. })
        ));

        let interval_over_half = vec![
            node::input("a"),
            node::compute("b", vec!["a"], ok_fn()).with_heartbeat(60, 100),
        ];
        assert!(matches!(
            validate(&interval_over_half),
            Err(GraphError::InvalidHeartbeatConfig { .. })
        ));

        let timeout_past_abandon = vec![
            node::input("a"),
            node::compute("b", vec!["a"], ok_fn())
                .with_heartbeat(30, 120)
                .with_abandon_after_seconds(60),
        ];
        assert!(matches!(
            validate(&timeout_past_abandon),
            Err(GraphError::InvalidHeartbeatConfig { .. })
        ));
    }
}
