//! Gating expressions: the boolean trees that decide when a derived node
//! may run.
//!
//! A node's gate is either a flat AND of "upstream provided" conditions or
//! an arbitrary tree of [`Gate::And`] / [`Gate::Or`] / [`Gate::Not`] over
//! [`Condition`] leaves. Leaves evaluate against the upstream **value row**
//! (not the raw value), so predicates can distinguish "set to null" from
//! "never set".
//!
//! # Sugar
//!
//! - A single name or a list of names converts into an AND of
//!   [`Predicate::Provided`] leaves.
//! - [`when`] builds a `{name, predicate}` leaf.
//! - [`unblocked_when`] passes a prebuilt tree through unchanged.
//!
//! # Examples
//!
//! ```rust
//! use gategraph::gating::{Gate, Predicate, unblocked_when, when};
//!
//! // AND of provided? over two upstreams
//! let flat: Gate = vec!["first_name", "last_name"].into();
//!
//! // OR tree with an explicit predicate leaf
//! let tree = unblocked_when(Gate::any_of(vec![
//!     when("toggle", Predicate::is_true()),
//!     Gate::from("fallback"),
//! ]));
//! assert!(tree.references(&"toggle".into()));
//! assert_eq!(flat.leaves().len(), 2);
//! ```

pub mod eval;

pub use eval::{Pending, Readiness, Witness, evaluate};

use std::fmt;
use std::sync::Arc;

use crate::store::models::ValueRow;
use crate::types::NodeName;

/// Test applied to one upstream value row.
///
/// Built-ins cover the common cases; [`Predicate::custom`] accepts any
/// closure over the full row.
#[derive(Clone)]
pub enum Predicate {
    /// The slot has been set (`set_time` is present).
    Provided,
    /// The slot holds JSON `true`.
    IsTrue,
    /// The slot holds JSON `false`.
    IsFalse,
    /// User-supplied test with a label for diagnostics.
    Custom {
        label: String,
        test: Arc<dyn Fn(&ValueRow) -> bool + Send + Sync>,
    },
}

impl Predicate {
    /// The slot has been set.
    #[must_use]
    pub fn provided() -> Self {
        Predicate::Provided
    }

    /// The slot holds JSON `true`.
    #[must_use]
    pub fn is_true() -> Self {
        Predicate::IsTrue
    }

    /// The slot holds JSON `false`.
    #[must_use]
    pub fn is_false() -> Self {
        Predicate::IsFalse
    }

    /// A labelled custom test over the whole value row.
    pub fn custom(
        label: impl Into<String>,
        test: impl Fn(&ValueRow) -> bool + Send + Sync + 'static,
    ) -> Self {
        Predicate::Custom {
            label: label.into(),
            test: Arc::new(test),
        }
    }

    /// Label used in readiness reports and error messages.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Predicate::Provided => "provided",
            Predicate::IsTrue => "is_true",
            Predicate::IsFalse => "is_false",
            Predicate::Custom { label, .. } => label,
        }
    }

    /// Apply the predicate to a value row.
    #[must_use]
    pub fn test(&self, row: &ValueRow) -> bool {
        match self {
            Predicate::Provided => row.set_time.is_some(),
            Predicate::IsTrue => {
                row.set_time.is_some() && row.node_value == Some(serde_json::Value::Bool(true))
            }
            Predicate::IsFalse => {
                row.set_time.is_some() && row.node_value == Some(serde_json::Value::Bool(false))
            }
            Predicate::Custom { test, .. } => test(row),
        }
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Predicate({})", self.label())
    }
}

/// One gate leaf: an upstream node paired with the predicate applied to
/// its value row.
#[derive(Clone, Debug)]
pub struct Condition {
    pub node: NodeName,
    pub predicate: Predicate,
}

impl Condition {
    pub fn new(node: impl Into<NodeName>, predicate: Predicate) -> Self {
        Condition {
            node: node.into(),
            predicate,
        }
    }
}

/// Boolean tree over upstream conditions.
#[derive(Clone, Debug)]
pub enum Gate {
    /// A single condition leaf.
    Leaf(Condition),
    /// Every clause must hold.
    And(Vec<Gate>),
    /// At least one clause must hold.
    Or(Vec<Gate>),
    /// The clause must not hold.
    Not(Box<Gate>),
}

impl Gate {
    /// AND over the given clauses.
    #[must_use]
    pub fn all_of(clauses: Vec<Gate>) -> Self {
        Gate::And(clauses)
    }

    /// OR over the given clauses.
    #[must_use]
    pub fn any_of(clauses: Vec<Gate>) -> Self {
        Gate::Or(clauses)
    }

    /// Negation of the given clause.
    #[must_use]
    pub fn negate(clause: Gate) -> Self {
        Gate::Not(Box::new(clause))
    }

    /// Every condition leaf reachable in the tree, including leaves under
    /// `Or` and `Not`. This is the set the recompute detector takes its
    /// upstream-revision maximum over.
    #[must_use]
    pub fn leaves(&self) -> Vec<&Condition> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a Condition>) {
        match self {
            Gate::Leaf(c) => out.push(c),
            Gate::And(clauses) | Gate::Or(clauses) => {
                for clause in clauses {
                    clause.collect_leaves(out);
                }
            }
            Gate::Not(clause) => clause.collect_leaves(out),
        }
    }

    /// Whether any leaf references the given node.
    #[must_use]
    pub fn references(&self, node: &NodeName) -> bool {
        self.leaves().iter().any(|c| &c.node == node)
    }
}

impl From<&str> for Gate {
    fn from(name: &str) -> Self {
        Gate::Leaf(Condition::new(name, Predicate::provided()))
    }
}

impl From<NodeName> for Gate {
    fn from(name: NodeName) -> Self {
        Gate::Leaf(Condition::new(name, Predicate::provided()))
    }
}

impl From<Condition> for Gate {
    fn from(condition: Condition) -> Self {
        Gate::Leaf(condition)
    }
}

// Flat-list sugar: a list of names (or prebuilt leaves) is an AND.
impl<T: Into<Gate>> From<Vec<T>> for Gate {
    fn from(clauses: Vec<T>) -> Self {
        Gate::And(clauses.into_iter().map(Into::into).collect())
    }
}

/// Leaf sugar for a `{name, predicate}` pair.
///
/// ```rust
/// use gategraph::gating::{Gate, Predicate, when};
///
/// let gate: Gate = vec![when("enabled", Predicate::is_true()), "payload".into()].into();
/// assert_eq!(gate.leaves().len(), 2);
/// ```
pub fn when(node: impl Into<NodeName>, predicate: Predicate) -> Gate {
    Gate::Leaf(Condition::new(node, predicate))
}

/// Identity passthrough for a prebuilt gate tree, kept for call-site
/// symmetry with the flat-list form.
pub fn unblocked_when(gate: Gate) -> Gate {
    gate
}
