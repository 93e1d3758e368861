//! The in-process registry of graph definitions.
//!
//! Graphs are registered at startup (usually via
//! [`EngineConfig`](crate::engine::EngineConfig) factories) and looked up
//! by `(name, version)` whenever an execution is loaded or advanced. An
//! entry is frozen once registered: re-registering the same key keeps the
//! existing graph and warns, so concurrent readers never observe a
//! definition change mid-flight.

use rustc_hash::FxHashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::graphs::Graph;

/// Read-mostly registry of frozen graphs keyed by `(name, version)`.
#[derive(Default)]
pub struct GraphCatalog {
    inner: RwLock<FxHashMap<(String, String), Arc<Graph>>>,
}

impl GraphCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a graph, freezing its `(name, version)` entry.
    ///
    /// If the key is already present the existing entry wins and the new
    /// definition is dropped with a warning; the returned `Arc` is always
    /// the catalog's live entry.
    pub fn register(&self, graph: Graph) -> Arc<Graph> {
        let key = (graph.name().to_string(), graph.version().to_string());
        let mut map = self
            .inner
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = map.get(&key) {
            tracing::warn!(
                graph = %key.0,
                version = %key.1,
                "ignoring re-registration of a frozen graph"
            );
            return Arc::clone(existing);
        }
        let graph = Arc::new(graph);
        map.insert(key, Arc::clone(&graph));
        graph
    }

    /// Look up the frozen entry for `(name, version)`.
    #[must_use]
    pub fn get(&self, name: &str, version: &str) -> Option<Arc<Graph>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(name.to_string(), version.to_string()))
            .cloned()
    }

    /// Every registered graph, in no particular order.
    #[must_use]
    pub fn graphs(&self) -> Vec<Arc<Graph>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}
