//! Graph definitions: the frozen description of a workflow.
//!
//! A [`Graph`] is a named, versioned, ordered list of node definitions
//! plus a SHA-256 hash over that list. The hash travels with every
//! execution created from the graph; a mismatch on load is what drives
//! additive schema evolution. Graphs are immutable once constructed and
//! are registered in a [`GraphCatalog`](catalog::GraphCatalog).
//!
//! Two synthetic input slots, `execution_id` and `last_updated_at`, are
//! injected into every graph; gates may reference them.
//!
//! # Examples
//!
//! ```rust
//! use gategraph::graphs::{new_graph, node};
//! use serde_json::json;
//!
//! let graph = new_graph(
//!     "greetings",
//!     "v1",
//!     vec![
//!         node::input("first_name"),
//!         node::compute(
//!             "greeting",
//!             vec!["first_name"],
//!             node::from_fn(|input| {
//!                 let name = input.param_str("first_name").unwrap_or("stranger");
//!                 Ok(json!(format!("Hello, {name}")))
//!             }),
//!         ),
//!     ],
//! )
//! .expect("coherent graph");
//!
//! assert_eq!(graph.name(), "greetings");
//! assert_eq!(graph.hash().len(), 64);
//! ```

pub mod catalog;
pub mod node;
pub mod validate;

pub use catalog::GraphCatalog;
pub use node::{
    ComputationOutcome, ComputeFn, ComputeInput, GraphSaveHook, NodeDef, NodeSaveHook, NodeSpec,
    RunPolicy, UserFnError, UserFnResult, ValueView, from_fn,
};
pub use validate::GraphError;

use rustc_hash::FxHashMap;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::types::{EXECUTION_ID_NODE, LAST_UPDATED_AT_NODE, NodeName, NodeType};

/// A frozen workflow definition.
#[derive(Clone)]
pub struct Graph {
    name: String,
    version: String,
    nodes: Vec<NodeDef>,
    index: FxHashMap<NodeName, usize>,
    hash: String,
    execution_id_prefix: String,
    on_save: Option<Arc<dyn GraphSaveHook>>,
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("nodes", &self.nodes.len())
            .field("hash", &self.hash)
            .finish()
    }
}

impl Graph {
    /// Construct and validate a graph.
    ///
    /// The synthetic `execution_id` and `last_updated_at` slots are
    /// injected ahead of the declared nodes. Fails on duplicate or
    /// reserved names, undeclared gating dependencies, empty boolean
    /// clauses, undeclared mutate targets, and out-of-bounds heartbeat
    /// settings.
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        nodes: Vec<NodeDef>,
    ) -> Result<Self, GraphError> {
        validate::validate(&nodes)?;

        let mut all_nodes = vec![node::input(EXECUTION_ID_NODE), node::input(LAST_UPDATED_AT_NODE)];
        all_nodes.extend(nodes);

        let index = all_nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.name.clone(), i))
            .collect();
        let hash = hash_nodes(&all_nodes);

        Ok(Graph {
            name: name.into(),
            version: version.into(),
            nodes: all_nodes,
            index,
            hash,
            execution_id_prefix: "exec".to_string(),
            on_save: None,
        })
    }

    /// Override the prefix used for generated execution ids.
    #[must_use]
    pub fn with_execution_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.execution_id_prefix = prefix.into();
        self
    }

    /// Attach a graph-wide save hook, invoked after every computation
    /// outcome.
    #[must_use]
    pub fn with_on_save(mut self, hook: Arc<dyn GraphSaveHook>) -> Self {
        self.on_save = Some(hook);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// SHA-256 hex digest over the sorted node list.
    #[must_use]
    pub fn hash(&self) -> &str {
        &self.hash
    }

    #[must_use]
    pub fn execution_id_prefix(&self) -> &str {
        &self.execution_id_prefix
    }

    #[must_use]
    pub fn graph_on_save(&self) -> Option<Arc<dyn GraphSaveHook>> {
        self.on_save.clone()
    }

    /// All node definitions, synthetic slots first, then declaration order.
    #[must_use]
    pub fn nodes(&self) -> &[NodeDef] {
        &self.nodes
    }

    /// Look up one node definition.
    #[must_use]
    pub fn node(&self, name: &NodeName) -> Option<&NodeDef> {
        self.index.get(name).map(|&i| &self.nodes[i])
    }

    /// Type of one node, if declared (synthetic slots are inputs).
    #[must_use]
    pub fn node_type(&self, name: &NodeName) -> Option<NodeType> {
        self.node(name).map(NodeDef::node_type)
    }

    /// Every derived (non-input) node.
    pub fn derived_nodes(&self) -> impl Iterator<Item = &NodeDef> {
        self.nodes.iter().filter(|n| n.node_type().is_derived())
    }

    /// Derived nodes whose gate references `name` directly.
    #[must_use]
    pub fn dependents_of(&self, name: &NodeName) -> Vec<&NodeDef> {
        self.derived_nodes()
            .filter(|n| n.gate().is_some_and(|g| g.references(name)))
            .collect()
    }

    /// Generate a fresh prefixed execution id.
    #[must_use]
    pub fn new_execution_id(&self) -> String {
        format!(
            "{}_{}",
            self.execution_id_prefix,
            uuid::Uuid::new_v4().simple()
        )
    }
}

/// Construct and validate a graph (free-function form of [`Graph::new`]).
pub fn new_graph(
    name: impl Into<String>,
    version: impl Into<String>,
    nodes: Vec<NodeDef>,
) -> Result<Graph, GraphError> {
    Graph::new(name, version, nodes)
}

/// SHA-256 hex over the sorted `name:type` lines of the node list.
///
/// Sorting makes the digest independent of declaration order, so two
/// graphs with the same node set always agree; adding a node always
/// changes it.
fn hash_nodes(nodes: &[NodeDef]) -> String {
    let mut lines: Vec<String> = nodes
        .iter()
        .map(|n| format!("{}:{}", n.name, n.node_type().encode()))
        .collect();
    lines.sort();

    let mut hasher = Sha256::new();
    for line in &lines {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}
