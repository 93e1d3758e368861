//! Node definitions for workflow graphs.
//!
//! A node is a tagged variant carrying its type-specific fields: inputs
//! have nothing but a name; derived nodes carry a gating expression, an
//! opaque user function, and a run policy. Constructors ([`input`],
//! [`compute`], [`mutate`], [`schedule_once`], [`schedule_recurring`],
//! [`historian`], [`archive`]) build the variants; fluent `with_*` methods
//! adjust options.
//!
//! # User functions
//!
//! A user function implements [`ComputeFn`]: it receives a [`ComputeInput`]
//! holding the parameter map of all currently-set slots plus the
//! `value_nodes` witness rows for the conditions that gated it, and
//! returns `Ok(value)` or `Err(details)`. Closures adapt via [`from_fn`].
//!
//! ```rust
//! use gategraph::graphs::node;
//! use serde_json::json;
//!
//! let greeting = node::compute(
//!     "greeting",
//!     vec!["first_name"],
//!     node::from_fn(|input| {
//!         let name = input.param_str("first_name").unwrap_or("stranger");
//!         Ok(json!(format!("Hello, {name}")))
//!     }),
//! )
//! .with_max_retries(3);
//! ```

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::gating::Gate;
use crate::types::{NodeName, NodeType};

// ============================================================================
// User-function contract
// ============================================================================

/// Per-upstream view handed to user functions for each satisfied gate leaf.
#[derive(Clone, Debug)]
pub struct ValueView {
    pub value: Option<serde_json::Value>,
    pub metadata: serde_json::Value,
    pub revision: i64,
    pub set_time: Option<i64>,
}

/// Input handed to a user function when its node runs.
#[derive(Clone, Debug)]
pub struct ComputeInput {
    /// Id of the execution being advanced.
    pub execution_id: String,
    /// All currently-set value slots, `{name → value}`.
    pub params: FxHashMap<NodeName, serde_json::Value>,
    /// The gate leaves that made this node ready, with their full rows.
    pub value_nodes: FxHashMap<NodeName, ValueView>,
}

impl ComputeInput {
    /// Look up one parameter by name.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&serde_json::Value> {
        self.params.get(&NodeName::from(name))
    }

    /// Look up one parameter and view it as a string.
    #[must_use]
    pub fn param_str(&self, name: &str) -> Option<&str> {
        self.param(name).and_then(serde_json::Value::as_str)
    }

    /// Look up one parameter and view it as an integer.
    #[must_use]
    pub fn param_i64(&self, name: &str) -> Option<i64> {
        self.param(name).and_then(serde_json::Value::as_i64)
    }
}

/// Failure reported by a user function.
#[derive(Debug, Error, Diagnostic)]
pub enum UserFnError {
    /// Free-form failure description, recorded on the computation row.
    #[error("{0}")]
    #[diagnostic(code(gategraph::node::user_fn))]
    Message(String),
}

impl From<String> for UserFnError {
    fn from(s: String) -> Self {
        UserFnError::Message(s)
    }
}

impl From<&str> for UserFnError {
    fn from(s: &str) -> Self {
        UserFnError::Message(s.to_string())
    }
}

/// Result shape every user function returns.
pub type UserFnResult = Result<serde_json::Value, UserFnError>;

/// The opaque callable a derived node runs.
///
/// Implementations must be stateless with respect to the engine: the same
/// input may be retried after failures or abandonment.
#[async_trait]
pub trait ComputeFn: Send + Sync {
    async fn run(&self, input: ComputeInput) -> UserFnResult;
}

struct FnCompute<F>(F);

#[async_trait]
impl<F> ComputeFn for FnCompute<F>
where
    F: Fn(&ComputeInput) -> UserFnResult + Send + Sync,
{
    async fn run(&self, input: ComputeInput) -> UserFnResult {
        (self.0)(&input)
    }
}

/// Adapt a synchronous closure into a [`ComputeFn`].
pub fn from_fn<F>(f: F) -> Arc<dyn ComputeFn>
where
    F: Fn(&ComputeInput) -> UserFnResult + Send + Sync + 'static,
{
    Arc::new(FnCompute(f))
}

// ============================================================================
// Save hooks
// ============================================================================

/// Outcome handed to save hooks after a computation is recorded.
#[derive(Clone, Debug)]
pub enum ComputationOutcome {
    Success(serde_json::Value),
    Failure(String),
}

/// Node-level callback invoked after a computation outcome is recorded.
///
/// Runs in a detached task with its own panic guard; a failing hook never
/// affects the computation it observed.
#[async_trait]
pub trait NodeSaveHook: Send + Sync {
    async fn on_save(&self, execution_id: &str, outcome: &ComputationOutcome);
}

/// Graph-wide callback invoked after every computation outcome.
#[async_trait]
pub trait GraphSaveHook: Send + Sync {
    async fn on_save(&self, execution_id: &str, node: &NodeName, outcome: &ComputationOutcome);
}

// ============================================================================
// Run policy
// ============================================================================

/// Retry and heartbeat settings for one derived node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunPolicy {
    /// Failures tolerated per upstream cycle before the node is
    /// permanently failed for that cycle.
    pub max_retries: u32,
    /// Hard bound on computation lifetime, when set.
    pub abandon_after_seconds: Option<i64>,
    /// Watchdog tick spacing.
    pub heartbeat_interval_seconds: i64,
    /// Deadline extension applied on every heartbeat.
    pub heartbeat_timeout_seconds: i64,
}

impl Default for RunPolicy {
    fn default() -> Self {
        RunPolicy {
            max_retries: 1,
            abandon_after_seconds: None,
            heartbeat_interval_seconds: 60,
            heartbeat_timeout_seconds: 300,
        }
    }
}

// ============================================================================
// Node definitions
// ============================================================================

/// Type-specific payload of one node definition.
#[derive(Clone)]
pub enum NodeSpec {
    Input,
    Compute {
        gated_by: Gate,
        f: Arc<dyn ComputeFn>,
        policy: RunPolicy,
        on_save: Option<Arc<dyn NodeSaveHook>>,
    },
    Mutate {
        gated_by: Gate,
        f: Arc<dyn ComputeFn>,
        mutates: NodeName,
        update_revision: bool,
        policy: RunPolicy,
        on_save: Option<Arc<dyn NodeSaveHook>>,
    },
    ScheduleOnce {
        gated_by: Gate,
        f: Arc<dyn ComputeFn>,
        policy: RunPolicy,
    },
    ScheduleRecurring {
        gated_by: Gate,
        f: Arc<dyn ComputeFn>,
        policy: RunPolicy,
    },
    Historian {
        gated_by: Gate,
        max_entries: Option<usize>,
        policy: RunPolicy,
    },
    Archive {
        gated_by: Gate,
        policy: RunPolicy,
    },
}

/// One declared cell in a graph.
#[derive(Clone)]
pub struct NodeDef {
    pub name: NodeName,
    pub spec: NodeSpec,
}

impl fmt::Debug for NodeDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeDef")
            .field("name", &self.name)
            .field("type", &self.node_type())
            .finish()
    }
}

impl NodeDef {
    /// The declared type tag of this node.
    #[must_use]
    pub fn node_type(&self) -> NodeType {
        match &self.spec {
            NodeSpec::Input => NodeType::Input,
            NodeSpec::Compute { .. } => NodeType::Compute,
            NodeSpec::Mutate { .. } => NodeType::Mutate,
            NodeSpec::ScheduleOnce { .. } => NodeType::ScheduleOnce,
            NodeSpec::ScheduleRecurring { .. } => NodeType::ScheduleRecurring,
            NodeSpec::Historian { .. } => NodeType::Historian,
            NodeSpec::Archive { .. } => NodeType::Archive,
        }
    }

    /// Gating expression, absent for inputs.
    #[must_use]
    pub fn gate(&self) -> Option<&Gate> {
        match &self.spec {
            NodeSpec::Input => None,
            NodeSpec::Compute { gated_by, .. }
            | NodeSpec::Mutate { gated_by, .. }
            | NodeSpec::ScheduleOnce { gated_by, .. }
            | NodeSpec::ScheduleRecurring { gated_by, .. }
            | NodeSpec::Historian { gated_by, .. }
            | NodeSpec::Archive { gated_by, .. } => Some(gated_by),
        }
    }

    /// Run policy; inputs have none.
    #[must_use]
    pub fn policy(&self) -> Option<&RunPolicy> {
        match &self.spec {
            NodeSpec::Input => None,
            NodeSpec::Compute { policy, .. }
            | NodeSpec::Mutate { policy, .. }
            | NodeSpec::ScheduleOnce { policy, .. }
            | NodeSpec::ScheduleRecurring { policy, .. }
            | NodeSpec::Historian { policy, .. }
            | NodeSpec::Archive { policy, .. } => Some(policy),
        }
    }

    /// User function, for the node types that carry one.
    #[must_use]
    pub fn user_fn(&self) -> Option<Arc<dyn ComputeFn>> {
        match &self.spec {
            NodeSpec::Compute { f, .. }
            | NodeSpec::Mutate { f, .. }
            | NodeSpec::ScheduleOnce { f, .. }
            | NodeSpec::ScheduleRecurring { f, .. } => Some(Arc::clone(f)),
            _ => None,
        }
    }

    /// Node-level save hook, when declared.
    #[must_use]
    pub fn on_save(&self) -> Option<Arc<dyn NodeSaveHook>> {
        match &self.spec {
            NodeSpec::Compute { on_save, .. } | NodeSpec::Mutate { on_save, .. } => {
                on_save.clone()
            }
            _ => None,
        }
    }

    /// Target slot of a mutator node.
    #[must_use]
    pub fn mutates(&self) -> Option<&NodeName> {
        match &self.spec {
            NodeSpec::Mutate { mutates, .. } => Some(mutates),
            _ => None,
        }
    }

    /// Whether a mutator's write is treated as a true value change.
    #[must_use]
    pub fn update_revision(&self) -> bool {
        match &self.spec {
            NodeSpec::Mutate {
                update_revision, ..
            } => *update_revision,
            _ => false,
        }
    }

    /// Entry cap of a historian node (`None` means unbounded).
    #[must_use]
    pub fn max_entries(&self) -> Option<usize> {
        match &self.spec {
            NodeSpec::Historian { max_entries, .. } => *max_entries,
            _ => None,
        }
    }

    /// Override the per-cycle retry budget.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        match &mut self.spec {
            NodeSpec::Input => {
                tracing::warn!(node = %self.name, "ignoring max_retries on an input node");
            }
            NodeSpec::Compute { policy, .. }
            | NodeSpec::Mutate { policy, .. }
            | NodeSpec::ScheduleOnce { policy, .. }
            | NodeSpec::ScheduleRecurring { policy, .. }
            | NodeSpec::Historian { policy, .. }
            | NodeSpec::Archive { policy, .. } => policy.max_retries = max_retries,
        }
        self
    }

    /// Override the heartbeat cadence.
    #[must_use]
    pub fn with_heartbeat(mut self, interval_seconds: i64, timeout_seconds: i64) -> Self {
        match &mut self.spec {
            NodeSpec::Input => {
                tracing::warn!(node = %self.name, "ignoring heartbeat settings on an input node");
            }
            NodeSpec::Compute { policy, .. }
            | NodeSpec::Mutate { policy, .. }
            | NodeSpec::ScheduleOnce { policy, .. }
            | NodeSpec::ScheduleRecurring { policy, .. }
            | NodeSpec::Historian { policy, .. }
            | NodeSpec::Archive { policy, .. } => {
                policy.heartbeat_interval_seconds = interval_seconds;
                policy.heartbeat_timeout_seconds = timeout_seconds;
            }
        }
        self
    }

    /// Bound the computation lifetime.
    #[must_use]
    pub fn with_abandon_after_seconds(mut self, seconds: i64) -> Self {
        match &mut self.spec {
            NodeSpec::Input => {
                tracing::warn!(node = %self.name, "ignoring abandon_after on an input node");
            }
            NodeSpec::Compute { policy, .. }
            | NodeSpec::Mutate { policy, .. }
            | NodeSpec::ScheduleOnce { policy, .. }
            | NodeSpec::ScheduleRecurring { policy, .. }
            | NodeSpec::Historian { policy, .. }
            | NodeSpec::Archive { policy, .. } => policy.abandon_after_seconds = Some(seconds),
        }
        self
    }

    /// Attach a node-level save hook.
    #[must_use]
    pub fn with_on_save(mut self, hook: Arc<dyn NodeSaveHook>) -> Self {
        match &mut self.spec {
            NodeSpec::Compute { on_save, .. } | NodeSpec::Mutate { on_save, .. } => {
                *on_save = Some(hook);
            }
            _ => tracing::warn!(node = %self.name, "ignoring on_save hook for this node type"),
        }
        self
    }

    /// Make a mutator's write bump the execution revision and propagate
    /// downstream.
    #[must_use]
    pub fn with_update_revision(mut self, update: bool) -> Self {
        match &mut self.spec {
            NodeSpec::Mutate {
                update_revision, ..
            } => *update_revision = update,
            _ => tracing::warn!(node = %self.name, "ignoring update_revision on a non-mutate node"),
        }
        self
    }

    /// Cap a historian's log length; oldest entries are dropped first.
    #[must_use]
    pub fn with_max_entries(mut self, cap: usize) -> Self {
        match &mut self.spec {
            NodeSpec::Historian { max_entries, .. } => *max_entries = Some(cap),
            _ => tracing::warn!(node = %self.name, "ignoring max_entries on a non-historian node"),
        }
        self
    }
}

// ============================================================================
// Constructors
// ============================================================================

/// A caller-settable slot.
pub fn input(name: impl Into<NodeName>) -> NodeDef {
    NodeDef {
        name: name.into(),
        spec: NodeSpec::Input,
    }
}

/// A derived node writing its own slot on success.
pub fn compute(
    name: impl Into<NodeName>,
    gated_by: impl Into<Gate>,
    f: Arc<dyn ComputeFn>,
) -> NodeDef {
    NodeDef {
        name: name.into(),
        spec: NodeSpec::Compute {
            gated_by: gated_by.into(),
            f,
            policy: RunPolicy::default(),
            on_save: None,
        },
    }
}

/// A targeted mutator writing the slot named by `mutates`.
pub fn mutate(
    name: impl Into<NodeName>,
    gated_by: impl Into<Gate>,
    f: Arc<dyn ComputeFn>,
    mutates: impl Into<NodeName>,
) -> NodeDef {
    NodeDef {
        name: name.into(),
        spec: NodeSpec::Mutate {
            gated_by: gated_by.into(),
            f,
            mutates: mutates.into(),
            update_revision: false,
            policy: RunPolicy::default(),
            on_save: None,
        },
    }
}

/// A timer producing a single epoch-second moment.
pub fn schedule_once(
    name: impl Into<NodeName>,
    gated_by: impl Into<Gate>,
    f: Arc<dyn ComputeFn>,
) -> NodeDef {
    NodeDef {
        name: name.into(),
        spec: NodeSpec::ScheduleOnce {
            gated_by: gated_by.into(),
            f,
            policy: RunPolicy::default(),
        },
    }
}

/// A timer producing a fresh moment after each consumed firing.
pub fn schedule_recurring(
    name: impl Into<NodeName>,
    gated_by: impl Into<Gate>,
    f: Arc<dyn ComputeFn>,
) -> NodeDef {
    NodeDef {
        name: name.into(),
        spec: NodeSpec::ScheduleRecurring {
            gated_by: gated_by.into(),
            f,
            policy: RunPolicy::default(),
        },
    }
}

/// An append-only log of upstream changes.
pub fn historian(name: impl Into<NodeName>, gated_by: impl Into<Gate>) -> NodeDef {
    NodeDef {
        name: name.into(),
        spec: NodeSpec::Historian {
            gated_by: gated_by.into(),
            max_entries: None,
            policy: RunPolicy::default(),
        },
    }
}

/// Archives the execution when its gate holds.
pub fn archive(name: impl Into<NodeName>, gated_by: impl Into<Gate>) -> NodeDef {
    NodeDef {
        name: name.into(),
        spec: NodeSpec::Archive {
            gated_by: gated_by.into(),
            policy: RunPolicy::default(),
        },
    }
}
