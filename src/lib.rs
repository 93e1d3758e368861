//! # Gategraph: Persistent Dataflow Workflow Engine
//!
//! Gategraph runs declared graphs of named nodes (inputs, derived
//! computations, self-scheduling timers, and targeted mutators) as
//! durable executions over PostgreSQL. Setting any input triggers the
//! scheduler to advance every derived node whose gating condition holds,
//! recursively and concurrently. All state lives in the store; the
//! scheduler is stateless, so any number of processes can drive the same
//! executions.
//!
//! ## Core Concepts
//!
//! - **Graph**: a frozen, versioned node list with a SHA-256 identity
//! - **Execution**: one instance of a graph, with a value slot per node
//! - **Revision**: the per-execution monotonic counter ordering every
//!   observable change
//! - **Gate**: a boolean tree over upstream value rows deciding when a
//!   derived node may run
//! - **Computation**: one attempt at a derived node, with its own row,
//!   lifecycle, and revision bracket
//! - **Sweep**: a background job reviving abandoned work and firing
//!   timers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gategraph::engine::{Engine, EngineConfig};
//! use gategraph::graphs::{new_graph, node};
//! use gategraph::values::GetOptions;
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), gategraph::engine::EngineError> {
//! let config = EngineConfig::new("postgresql://localhost/gategraph")
//!     .with_log_level("info")
//!     .with_graph(|| {
//!         new_graph(
//!             "greetings",
//!             "v1",
//!             vec![
//!                 node::input("first_name"),
//!                 node::compute(
//!                     "greeting",
//!                     vec!["first_name"],
//!                     node::from_fn(|input| {
//!                         let name = input.param_str("first_name").unwrap_or("stranger");
//!                         Ok(json!(format!("Hello, {name}")))
//!                     }),
//!                 ),
//!             ],
//!         )
//!     });
//!
//! let engine = Engine::connect(config).await?;
//! let execution = engine.start_execution("greetings", "v1").await?;
//!
//! engine.set(execution.id(), "first_name", json!("Mario")).await?;
//! let greeting = engine
//!     .get_value(execution.id(), "greeting", GetOptions::wait_any())
//!     .await?;
//! assert_eq!(greeting.node_value, Some(json!("Hello, Mario")));
//! # Ok(())
//! # }
//! ```
//!
//! ## Consistency Model
//!
//! Per execution, the monotonic revision totally orders all observable
//! state changes; within one transaction the revision increment precedes
//! every write it stamps, so readers never see a write without its bump.
//! Setting a slot to the value and metadata it already holds is a no-op
//! and leaves the revision untouched. Concurrent `advance` calls are safe:
//! the pending-row uniqueness rule plus `FOR UPDATE SKIP LOCKED` promotion
//! yield exactly one success per upstream change to a derived node.
//!
//! ## Module Guide
//!
//! - [`engine`] - The facade: configuration, executions, set/get surface
//! - [`graphs`] - Graph definitions, node constructors, catalog
//! - [`gating`] - Gating expression trees and the readiness evaluator
//! - [`store`] - The `Store` trait and the PostgreSQL backend
//! - [`schedulers`] - Advance pipeline, workers, watchdogs
//! - [`sweeps`] - Background jobs: timer firing, abandoned revival
//! - [`values`] - Value writes and waiting reads
//! - [`evolution`] - Additive schema evolution on load
//! - [`types`] - Names, type tags, lifecycle states

pub mod engine;
pub mod evolution;
pub mod gating;
pub mod graphs;
pub mod schedulers;
pub mod store;
pub mod sweeps;
pub mod telemetry;
pub mod types;
pub mod values;
