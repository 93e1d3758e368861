//! The engine facade: one handle over the store, catalog, scheduler, and
//! sweep driver.
//!
//! [`Engine::connect`] wires everything from an [`EngineConfig`]: graph
//! factories register their definitions in the catalog, the Postgres
//! store connects (running embedded migrations), and the sweep driver
//! starts unless disabled. The engine then exposes the whole user-facing
//! API surface: starting executions, `set`/`unset`, waiting reads,
//! loading, history, and archival.
//!
//! # Examples
//!
//! ```rust,no_run
//! use gategraph::engine::{Engine, EngineConfig};
//! use gategraph::graphs::{new_graph, node};
//! use gategraph::values::GetOptions;
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), gategraph::engine::EngineError> {
//! let config = EngineConfig::new("postgresql://localhost/gategraph").with_graph(|| {
//!     new_graph(
//!         "greetings",
//!         "v1",
//!         vec![
//!             node::input("first_name"),
//!             node::compute(
//!                 "greeting",
//!                 vec!["first_name"],
//!                 node::from_fn(|input| {
//!                     let name = input.param_str("first_name").unwrap_or("stranger");
//!                     Ok(json!(format!("Hello, {name}")))
//!                 }),
//!             ),
//!         ],
//!     )
//! });
//!
//! let engine = Engine::connect(config).await?;
//! let execution = engine.start_execution("greetings", "v1").await?;
//! engine.set(execution.id(), "first_name", json!("Mario")).await?;
//! let row = engine
//!     .get_value(execution.id(), "greeting", GetOptions::wait_any())
//!     .await?;
//! assert_eq!(row.node_value, Some(json!("Hello, Mario")));
//! # Ok(())
//! # }
//! ```

use miette::Diagnostic;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

use crate::graphs::{Graph, GraphCatalog, GraphError};
use crate::schedulers::{Scheduler, SchedulerError};
use crate::store::{
    ComputationRow, ExecutionRow, ExecutionSnapshot, Store, StoreError, ValueRow, ValueWrite,
};
use crate::sweeps::{SweepConfig, SweepDriver};
use crate::types::NodeName;
use crate::values::{GetError, GetOptions, SetError};

/// Factory invoked at startup to register one graph in the catalog.
pub type GraphFactory = Box<dyn Fn() -> Result<Graph, GraphError> + Send + Sync>;

/// Startup configuration for [`Engine::connect`].
pub struct EngineConfig {
    pub database_url: String,
    graph_factories: Vec<GraphFactory>,
    pub log_level: Option<String>,
    pub sweeps: SweepConfig,
}

impl EngineConfig {
    #[must_use]
    pub fn new(database_url: impl Into<String>) -> Self {
        EngineConfig {
            database_url: database_url.into(),
            graph_factories: Vec::new(),
            log_level: None,
            sweeps: SweepConfig::default(),
        }
    }

    /// Register a graph factory, invoked once at startup.
    #[must_use]
    pub fn with_graph(
        mut self,
        factory: impl Fn() -> Result<Graph, GraphError> + Send + Sync + 'static,
    ) -> Self {
        self.graph_factories.push(Box::new(factory));
        self
    }

    /// Application logging level (an `EnvFilter` directive).
    #[must_use]
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = Some(level.into());
        self
    }

    /// Override the sweep driver settings (or disable it).
    #[must_use]
    pub fn with_sweeps(mut self, sweeps: SweepConfig) -> Self {
        self.sweeps = sweeps;
        self
    }
}

/// Errors surfaced by the engine facade.
#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Set(#[from] SetError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Get(#[from] GetError),

    /// The catalog has no entry for the requested graph.
    #[error("graph not registered: {name} {version}")]
    #[diagnostic(
        code(gategraph::engine::unknown_graph),
        help("Register the graph with `EngineConfig::with_graph` before use.")
    )]
    UnknownGraph { name: String, version: String },
}

/// The user-facing handle over one store and one catalog.
pub struct Engine {
    store: Arc<dyn Store>,
    catalog: Arc<GraphCatalog>,
    scheduler: Arc<Scheduler>,
    sweeps: Mutex<Option<SweepDriver>>,
}

impl Engine {
    /// Connect the Postgres store, register configured graphs, and start
    /// the sweep driver.
    #[cfg(feature = "postgres")]
    pub async fn connect(config: EngineConfig) -> Result<Self, EngineError> {
        crate::telemetry::init(config.log_level.as_deref());
        let store = crate::store::PostgresStore::connect(&config.database_url).await?;
        Self::with_store(Arc::new(store), config).await
    }

    /// Build an engine over an already-constructed store backend.
    ///
    /// Must run inside a tokio runtime when sweeps are enabled.
    pub async fn with_store(
        store: Arc<dyn Store>,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        let catalog = Arc::new(GraphCatalog::new());
        for factory in &config.graph_factories {
            catalog.register(factory()?);
        }
        let scheduler = Arc::new(Scheduler::new(Arc::clone(&store), Arc::clone(&catalog)));
        let sweeps = config
            .sweeps
            .enabled
            .then(|| SweepDriver::spawn(Arc::clone(&scheduler), config.sweeps.clone()));
        Ok(Engine {
            store,
            catalog,
            scheduler,
            sweeps: Mutex::new(sweeps),
        })
    }

    #[must_use]
    pub fn catalog(&self) -> &Arc<GraphCatalog> {
        &self.catalog
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// The scheduler driving this engine; useful for embedding (manual
    /// sweeps, custom drivers).
    #[must_use]
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Stop the sweep driver; safe to call more than once.
    pub async fn shutdown(&self) {
        let driver = self
            .sweeps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(driver) = driver {
            driver.shutdown().await;
        }
    }

    fn graph(&self, name: &str, version: &str) -> Result<Arc<Graph>, EngineError> {
        self.catalog
            .get(name, version)
            .ok_or_else(|| EngineError::UnknownGraph {
                name: name.to_string(),
                version: version.to_string(),
            })
    }

    async fn snapshot_and_graph(
        &self,
        execution_id: &str,
    ) -> Result<(ExecutionSnapshot, Arc<Graph>), EngineError> {
        let snapshot = self
            .store
            .load_execution(execution_id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                execution_id: execution_id.to_string(),
            })?;
        let graph = self.graph(
            &snapshot.execution.graph_name,
            &snapshot.execution.graph_version,
        )?;
        Ok((snapshot, graph))
    }

    /// Start a fresh execution of a registered graph.
    pub async fn start_execution(
        &self,
        graph_name: &str,
        graph_version: &str,
    ) -> Result<ExecutionSnapshot, EngineError> {
        let graph = self.graph(graph_name, graph_version)?;
        let snapshot = self.store.create_execution(&graph).await?;
        Ok(Arc::clone(&self.scheduler).advance(snapshot.id()).await?)
    }

    /// Start (or return) the single live execution of a registered graph.
    pub async fn start_singleton_execution(
        &self,
        graph_name: &str,
        graph_version: &str,
    ) -> Result<ExecutionSnapshot, EngineError> {
        let graph = self.graph(graph_name, graph_version)?;
        let snapshot = self.store.create_singleton_execution(&graph).await?;
        Ok(Arc::clone(&self.scheduler).advance(snapshot.id()).await?)
    }

    /// Set one input slot.
    pub async fn set(
        &self,
        execution_id: &str,
        node: impl Into<NodeName>,
        value: serde_json::Value,
    ) -> Result<ExecutionSnapshot, EngineError> {
        self.apply(execution_id, vec![ValueWrite::set(node, value)])
            .await
    }

    /// Set one input slot with metadata.
    pub async fn set_with_metadata(
        &self,
        execution_id: &str,
        node: impl Into<NodeName>,
        value: serde_json::Value,
        metadata: serde_json::Value,
    ) -> Result<ExecutionSnapshot, EngineError> {
        self.apply(
            execution_id,
            vec![ValueWrite::set_with_metadata(node, value, metadata)],
        )
        .await
    }

    /// Set several input slots in one transaction (one revision bump).
    pub async fn set_many(
        &self,
        execution_id: &str,
        entries: impl IntoIterator<Item = (NodeName, serde_json::Value)>,
    ) -> Result<ExecutionSnapshot, EngineError> {
        let writes = entries
            .into_iter()
            .map(|(node, value)| ValueWrite::set(node, value))
            .collect();
        self.apply(execution_id, writes).await
    }

    /// Clear one input slot; a no-op when already unset.
    pub async fn unset(
        &self,
        execution_id: &str,
        node: impl Into<NodeName>,
    ) -> Result<ExecutionSnapshot, EngineError> {
        self.apply(execution_id, vec![ValueWrite::unset(node)]).await
    }

    /// Clear several input slots in one transaction.
    pub async fn unset_many(
        &self,
        execution_id: &str,
        nodes: impl IntoIterator<Item = NodeName>,
    ) -> Result<ExecutionSnapshot, EngineError> {
        let writes = nodes.into_iter().map(ValueWrite::unset).collect();
        self.apply(execution_id, writes).await
    }

    async fn apply(
        &self,
        execution_id: &str,
        writes: Vec<ValueWrite>,
    ) -> Result<ExecutionSnapshot, EngineError> {
        let (_, graph) = self.snapshot_and_graph(execution_id).await?;
        Ok(crate::values::apply_writes(&self.scheduler, &graph, execution_id, writes).await?)
    }

    /// Current value of a slot, without waiting.
    pub async fn get(
        &self,
        execution_id: &str,
        node: impl Into<NodeName>,
    ) -> Result<serde_json::Value, EngineError> {
        let row = self
            .get_value(execution_id, node, GetOptions::default())
            .await?;
        Ok(row.node_value.unwrap_or(serde_json::Value::Null))
    }

    /// Read a slot's full value row, waiting per `options`.
    pub async fn get_value(
        &self,
        execution_id: &str,
        node: impl Into<NodeName>,
        options: GetOptions,
    ) -> Result<ValueRow, EngineError> {
        let node = node.into();
        let (_, graph) = self.snapshot_and_graph(execution_id).await?;
        Ok(crate::values::get_value(&self.store, &graph, execution_id, &node, options).await?)
    }

    /// Load an execution, evolving it when the graph gained nodes.
    pub async fn load(&self, execution_id: &str) -> Result<ExecutionSnapshot, EngineError> {
        let (snapshot, graph) = self.snapshot_and_graph(execution_id).await?;
        Ok(crate::evolution::ensure_current(&self.store, &graph, snapshot).await?)
    }

    /// The execution's computation rows, oldest first.
    pub async fn history(&self, execution_id: &str) -> Result<Vec<ComputationRow>, EngineError> {
        Ok(self.store.computations(execution_id).await?)
    }

    /// Archive an execution; sweeps stop visiting it.
    pub async fn archive(&self, execution_id: &str) -> Result<ExecutionRow, EngineError> {
        Ok(self.store.set_archived(execution_id, true).await?)
    }

    /// Bring an archived execution back.
    pub async fn unarchive(&self, execution_id: &str) -> Result<ExecutionRow, EngineError> {
        Ok(self.store.set_archived(execution_id, false).await?)
    }

    /// Manually advance one execution (sweeps and workers do this on
    /// their own).
    pub async fn advance(&self, execution_id: &str) -> Result<ExecutionSnapshot, EngineError> {
        Ok(Arc::clone(&self.scheduler).advance(execution_id).await?)
    }
}
