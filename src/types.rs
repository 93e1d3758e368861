//! Core types for the Gategraph workflow engine.
//!
//! This module defines the fundamental identifiers and lifecycle tags used
//! throughout the system: node names, node types, computation types and
//! states, and the synthetic node names every execution carries.
//!
//! # Key Types
//!
//! - [`NodeName`]: Identifies one declared cell within a graph
//! - [`NodeType`]: Distinguishes inputs, derived computations, timers, and mutators
//! - [`ComputationState`]: Lifecycle state of one evaluation attempt
//!
//! # Examples
//!
//! ```rust
//! use gategraph::types::{NodeName, NodeType};
//!
//! let name = NodeName::from("first_name");
//! assert_eq!(name.as_str(), "first_name");
//!
//! // Encode for persistence
//! assert_eq!(NodeType::ScheduleRecurring.encode(), "schedule_recurring");
//! assert_eq!(NodeType::decode("mutate"), Some(NodeType::Mutate));
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Synthetic slot present in every execution, holding the execution's id.
pub const EXECUTION_ID_NODE: &str = "execution_id";

/// Synthetic slot re-stamped on every value change with the change's
/// revision and wall-clock time.
pub const LAST_UPDATED_AT_NODE: &str = "last_updated_at";

/// Name of one declared node within a graph.
///
/// `NodeName` is the unique identifier for a value slot within an execution
/// and for a node definition within a graph. Names are plain strings; the
/// synthetic names [`EXECUTION_ID_NODE`] and [`LAST_UPDATED_AT_NODE`] are
/// reserved and injected into every graph automatically.
///
/// # Examples
///
/// ```rust
/// use gategraph::types::NodeName;
///
/// let a = NodeName::from("greeting");
/// let b: NodeName = "greeting".into();
/// assert_eq!(a, b);
/// assert_eq!(a.to_string(), "greeting");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeName(String);

impl NodeName {
    /// View the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` for the synthetic `execution_id` / `last_updated_at`
    /// slots that exist in every execution but are never declared by users.
    #[must_use]
    pub fn is_synthetic(&self) -> bool {
        self.0 == EXECUTION_ID_NODE || self.0 == LAST_UPDATED_AT_NODE
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeName {
    fn from(s: &str) -> Self {
        NodeName(s.to_string())
    }
}

impl From<String> for NodeName {
    fn from(s: String) -> Self {
        NodeName(s)
    }
}

impl From<&NodeName> for NodeName {
    fn from(n: &NodeName) -> Self {
        n.clone()
    }
}

impl AsRef<str> for NodeName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The declared type of a graph node.
///
/// Inputs are set directly by callers; every other type is derived and
/// evaluated by the scheduler when its gating condition holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Caller-settable slot; the only type `set`/`unset` accepts.
    Input,
    /// Derived node running a user function; writes its own slot.
    Compute,
    /// Timer producing a single scheduled moment.
    ScheduleOnce,
    /// Timer producing a new moment after each consumed firing.
    ScheduleRecurring,
    /// Derived node writing the slot named by its `mutates` target.
    Mutate,
    /// Append-only log of upstream changes.
    Historian,
    /// Archives the execution when its gate holds.
    Archive,
}

impl NodeType {
    /// Encode into the persisted string form (snake case).
    #[must_use]
    pub fn encode(&self) -> &'static str {
        match self {
            NodeType::Input => "input",
            NodeType::Compute => "compute",
            NodeType::ScheduleOnce => "schedule_once",
            NodeType::ScheduleRecurring => "schedule_recurring",
            NodeType::Mutate => "mutate",
            NodeType::Historian => "historian",
            NodeType::Archive => "archive",
        }
    }

    /// Decode a persisted string form; `None` for unknown tags.
    pub fn decode(s: &str) -> Option<Self> {
        match s {
            "input" => Some(NodeType::Input),
            "compute" => Some(NodeType::Compute),
            "schedule_once" => Some(NodeType::ScheduleOnce),
            "schedule_recurring" => Some(NodeType::ScheduleRecurring),
            "mutate" => Some(NodeType::Mutate),
            "historian" => Some(NodeType::Historian),
            "archive" => Some(NodeType::Archive),
            _ => None,
        }
    }

    /// Returns `true` for every type the scheduler evaluates (everything
    /// except [`Input`](Self::Input)).
    #[must_use]
    pub fn is_derived(&self) -> bool {
        !matches!(self, NodeType::Input)
    }

    /// Returns `true` for the two timer types.
    #[must_use]
    pub fn is_timer(&self) -> bool {
        matches!(self, NodeType::ScheduleOnce | NodeType::ScheduleRecurring)
    }

    /// The computation type recorded for attempts at this node.
    ///
    /// Historian and archive nodes run as plain compute-type computations;
    /// their special success semantics live in the worker, not the row tag.
    #[must_use]
    pub fn computation_type(&self) -> Option<ComputationType> {
        match self {
            NodeType::Input => None,
            NodeType::Compute | NodeType::Historian | NodeType::Archive => {
                Some(ComputationType::Compute)
            }
            NodeType::ScheduleOnce => Some(ComputationType::ScheduleOnce),
            NodeType::ScheduleRecurring => Some(ComputationType::ScheduleRecurring),
            NodeType::Mutate => Some(ComputationType::Mutate),
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

/// The persisted type tag of one computation row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputationType {
    Compute,
    ScheduleOnce,
    ScheduleRecurring,
    Mutate,
}

impl ComputationType {
    /// Encode into the persisted string form.
    #[must_use]
    pub fn encode(&self) -> &'static str {
        match self {
            ComputationType::Compute => "compute",
            ComputationType::ScheduleOnce => "schedule_once",
            ComputationType::ScheduleRecurring => "schedule_recurring",
            ComputationType::Mutate => "mutate",
        }
    }

    /// Decode a persisted string form; `None` for unknown tags.
    pub fn decode(s: &str) -> Option<Self> {
        match s {
            "compute" => Some(ComputationType::Compute),
            "schedule_once" => Some(ComputationType::ScheduleOnce),
            "schedule_recurring" => Some(ComputationType::ScheduleRecurring),
            "mutate" => Some(ComputationType::Mutate),
            _ => None,
        }
    }
}

impl fmt::Display for ComputationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

/// Lifecycle state of one computation row.
///
/// Rows are created `NotSet` by the recompute detector, promoted to
/// `Computing` under a row lock by the grabber, and finished by the worker
/// (`Success`/`Failed`). The abandoned sweep and watchdog move stuck
/// `Computing` rows to `Abandoned`; superseded pending rows become
/// `Cancelled` when a newer upstream cycle replaces them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputationState {
    NotSet,
    Computing,
    Success,
    Failed,
    Abandoned,
    Cancelled,
}

impl ComputationState {
    /// Encode into the persisted string form.
    #[must_use]
    pub fn encode(&self) -> &'static str {
        match self {
            ComputationState::NotSet => "not_set",
            ComputationState::Computing => "computing",
            ComputationState::Success => "success",
            ComputationState::Failed => "failed",
            ComputationState::Abandoned => "abandoned",
            ComputationState::Cancelled => "cancelled",
        }
    }

    /// Decode a persisted string form; `None` for unknown tags.
    pub fn decode(s: &str) -> Option<Self> {
        match s {
            "not_set" => Some(ComputationState::NotSet),
            "computing" => Some(ComputationState::Computing),
            "success" => Some(ComputationState::Success),
            "failed" => Some(ComputationState::Failed),
            "abandoned" => Some(ComputationState::Abandoned),
            "cancelled" => Some(ComputationState::Cancelled),
            _ => None,
        }
    }

    /// `NotSet` and `Computing` rows block new attempts at the same
    /// revision.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, ComputationState::NotSet | ComputationState::Computing)
    }
}

impl fmt::Display for ComputationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

/// Tag for each background sweep family, used as the `SweepRun` watermark key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepType {
    /// Kicks `advance` for executions whose timer moments have arrived.
    ScheduleFire,
    /// Revives `computing` rows past their heartbeat deadline.
    AbandonedRevival,
    /// Ensures fired recurring timers get a fresh pending computation.
    RecurringReschedule,
}

impl SweepType {
    /// Encode into the persisted string form.
    #[must_use]
    pub fn encode(&self) -> &'static str {
        match self {
            SweepType::ScheduleFire => "schedule_fire",
            SweepType::AbandonedRevival => "abandoned_revival",
            SweepType::RecurringReschedule => "recurring_reschedule",
        }
    }

    /// Decode a persisted string form; `None` for unknown tags.
    pub fn decode(s: &str) -> Option<Self> {
        match s {
            "schedule_fire" => Some(SweepType::ScheduleFire),
            "abandoned_revival" => Some(SweepType::AbandonedRevival),
            "recurring_reschedule" => Some(SweepType::RecurringReschedule),
            _ => None,
        }
    }
}

impl fmt::Display for SweepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_type_round_trip() {
        for t in [
            NodeType::Input,
            NodeType::Compute,
            NodeType::ScheduleOnce,
            NodeType::ScheduleRecurring,
            NodeType::Mutate,
            NodeType::Historian,
            NodeType::Archive,
        ] {
            assert_eq!(NodeType::decode(t.encode()), Some(t));
        }
        assert_eq!(NodeType::decode("bogus"), None);
    }

    #[test]
    fn computation_state_round_trip() {
        for s in [
            ComputationState::NotSet,
            ComputationState::Computing,
            ComputationState::Success,
            ComputationState::Failed,
            ComputationState::Abandoned,
            ComputationState::Cancelled,
        ] {
            assert_eq!(ComputationState::decode(s.encode()), Some(s));
        }
    }

    #[test]
    fn active_states() {
        assert!(ComputationState::NotSet.is_active());
        assert!(ComputationState::Computing.is_active());
        assert!(!ComputationState::Success.is_active());
        assert!(!ComputationState::Cancelled.is_active());
    }

    #[test]
    fn synthetic_names() {
        assert!(NodeName::from(EXECUTION_ID_NODE).is_synthetic());
        assert!(NodeName::from(LAST_UPDATED_AT_NODE).is_synthetic());
        assert!(!NodeName::from("greeting").is_synthetic());
    }
}
