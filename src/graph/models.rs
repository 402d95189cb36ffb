//! # Graph Model
//!
//! Immutable workflow configuration: graphs, state groups, states and the
//! directed paths between them.
//!
//! Paths are loaded "joined": a `StatePath` carries its owning graph and both
//! endpoint states, so the executor never needs a second round-trip to check
//! record types or state compatibility.

use serde::{Deserialize, Serialize};
use std::fmt;

pub type GraphId = i64;
pub type GroupId = i64;
pub type StateId = i64;
pub type PathId = i64;

/// Change-stamp masks that leave a stamp untouched: `(s & -1) | 0 == s`.
pub const IDENTITY_AND_MASK: i64 = -1;
pub const IDENTITY_OR_MASK: i64 = 0;

/// Lookup key for a graph node (path or state)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKey {
    Id(i64),
    CodeName(String),
}

impl NodeKey {
    /// Check whether a node with the given id and code name answers to this key
    pub fn matches(&self, id: i64, code_name: &str) -> bool {
        match self {
            Self::Id(key) => *key == id,
            Self::CodeName(key) => key == code_name,
        }
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "#{id}"),
            Self::CodeName(code_name) => write!(f, "{code_name}"),
        }
    }
}

impl From<i64> for NodeKey {
    fn from(id: i64) -> Self {
        Self::Id(id)
    }
}

impl From<&str> for NodeKey {
    fn from(code_name: &str) -> Self {
        Self::CodeName(code_name.to_string())
    }
}

impl From<String> for NodeKey {
    fn from(code_name: String) -> Self {
        Self::CodeName(code_name)
    }
}

/// A family of states and paths operating on one transition-record type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowGraph {
    pub id: GraphId,
    pub code_name: String,
    pub name: String,
    /// Declared transition-record type; must equal the executing engine's
    /// `TransitionRecord::RECORD_TYPE`
    pub transition_record_type: String,
}

impl WorkflowGraph {
    pub fn accepts_record_type(&self, record_type: &str) -> bool {
        self.transition_record_type == record_type
    }
}

/// Groups states of one graph, e.g. "interim" vs "final"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateGroup {
    pub id: GroupId,
    pub graph_id: GraphId,
    pub code_name: String,
    pub name: String,
}

/// A named node of a workflow graph
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct State {
    pub id: StateId,
    pub code_name: String,
    pub name: String,
    pub graph: WorkflowGraph,
    pub group: Option<StateGroup>,
}

impl State {
    pub fn group_code_name(&self) -> Option<&str> {
        self.group.as_ref().map(|group| group.code_name.as_str())
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code_name)
    }
}

/// A configured directed edge `previous_state -> next_state`
///
/// Besides the endpoints a path carries the AND/OR change-stamp masks and the
/// ordered names of its pre- and post-actions. Action names are resolved
/// through the engine's action registry at execution time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatePath {
    pub id: PathId,
    pub code_name: String,
    pub name: String,
    pub graph: WorkflowGraph,
    pub previous_state: State,
    pub next_state: State,
    pub and_mask: i64,
    pub or_mask: i64,
    pub pre_actions: Vec<String>,
    pub post_actions: Vec<String>,
}

impl StatePath {
    /// Compute the change stamp produced by executing this path
    #[inline]
    pub fn apply_masks(&self, change_stamp: i64) -> i64 {
        (change_stamp & self.and_mask) | self.or_mask
    }

    /// True when the path moves between two different state groups
    pub fn is_group_transition(&self) -> bool {
        let previous = self.previous_state.group.as_ref().map(|g| g.id);
        let next = self.next_state.group.as_ref().map(|g| g.id);
        previous != next
    }

    pub fn belongs_to_record_type(&self, record_type: &str) -> bool {
        self.graph.accepts_record_type(record_type)
    }

    /// Whether the named action appears in either phase of this path
    pub fn declares_action(&self, action: &str) -> bool {
        self.pre_actions.iter().any(|name| name == action)
            || self.post_actions.iter().any(|name| name == action)
    }
}

impl fmt::Display for StatePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} -> {})",
            self.code_name, self.previous_state.code_name, self.next_state.code_name
        )
    }
}
