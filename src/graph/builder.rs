//! # Graph Builder
//!
//! Fluent construction of graph configuration in code.
//!
//! ```rust
//! use statepath::graph::{GraphBuilder, PathDefinition};
//!
//! # fn main() -> Result<(), statepath::graph::GraphError> {
//! let definition = GraphBuilder::new("payments", "state_transition")
//!     .group("interim")
//!     .group("final")
//!     .state("pending", Some("interim"))
//!     .state("approved", Some("final"))
//!     .path(PathDefinition::new("approve", "pending", "approved").masks(0xFF, 0x01))
//!     .build(1)?;
//!
//! assert_eq!(definition.path("approve").map(|p| p.or_mask), Some(0x01));
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use thiserror::Error;

use super::models::{
    GraphId, State, StateGroup, StatePath, WorkflowGraph, IDENTITY_AND_MASK, IDENTITY_OR_MASK,
};

/// Errors raised while assembling a graph definition
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Unknown state '{state}' referenced by path '{path}'")]
    UnknownState { path: String, state: String },

    #[error("Unknown state group '{group}' referenced by state '{state}'")]
    UnknownGroup { state: String, group: String },

    #[error("Duplicate {kind} code name '{code_name}' in graph '{graph}'")]
    DuplicateCodeName {
        kind: &'static str,
        code_name: String,
        graph: String,
    },
}

#[derive(Debug, Clone)]
struct StateDefinition {
    code_name: String,
    group: Option<String>,
}

/// Declarative description of one path, resolved by [`GraphBuilder::build`]
#[derive(Debug, Clone)]
pub struct PathDefinition {
    code_name: String,
    name: Option<String>,
    from: String,
    to: String,
    and_mask: i64,
    or_mask: i64,
    pre_actions: Vec<String>,
    post_actions: Vec<String>,
}

impl PathDefinition {
    pub fn new(code_name: &str, from: &str, to: &str) -> Self {
        Self {
            code_name: code_name.to_string(),
            name: None,
            from: from.to_string(),
            to: to.to_string(),
            and_mask: IDENTITY_AND_MASK,
            or_mask: IDENTITY_OR_MASK,
            pre_actions: Vec::new(),
            post_actions: Vec::new(),
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn masks(mut self, and_mask: i64, or_mask: i64) -> Self {
        self.and_mask = and_mask;
        self.or_mask = or_mask;
        self
    }

    pub fn pre_action(mut self, action: &str) -> Self {
        self.pre_actions.push(action.to_string());
        self
    }

    pub fn post_action(mut self, action: &str) -> Self {
        self.post_actions.push(action.to_string());
        self
    }
}

/// Builder for a complete workflow graph
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    code_name: String,
    name: Option<String>,
    transition_record_type: String,
    groups: Vec<String>,
    states: Vec<StateDefinition>,
    paths: Vec<PathDefinition>,
}

impl GraphBuilder {
    pub fn new(code_name: &str, transition_record_type: &str) -> Self {
        Self {
            code_name: code_name.to_string(),
            name: None,
            transition_record_type: transition_record_type.to_string(),
            groups: Vec::new(),
            states: Vec::new(),
            paths: Vec::new(),
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn group(mut self, code_name: &str) -> Self {
        self.groups.push(code_name.to_string());
        self
    }

    pub fn state(mut self, code_name: &str, group: Option<&str>) -> Self {
        self.states.push(StateDefinition {
            code_name: code_name.to_string(),
            group: group.map(str::to_string),
        });
        self
    }

    pub fn path(mut self, path: PathDefinition) -> Self {
        self.paths.push(path);
        self
    }

    /// Resolve all references and assign sequential ids starting at `first_id`
    pub fn build(self, first_id: GraphId) -> Result<GraphDefinition, GraphError> {
        let mut next_id = first_id;
        let mut take_id = || {
            let id = next_id;
            next_id += 1;
            id
        };

        let graph = WorkflowGraph {
            id: take_id(),
            name: self.name.clone().unwrap_or_else(|| self.code_name.clone()),
            code_name: self.code_name.clone(),
            transition_record_type: self.transition_record_type.clone(),
        };

        ensure_unique(&graph.code_name, "group", self.groups.iter())?;
        ensure_unique(
            &graph.code_name,
            "state",
            self.states.iter().map(|s| &s.code_name),
        )?;
        ensure_unique(
            &graph.code_name,
            "path",
            self.paths.iter().map(|p| &p.code_name),
        )?;

        let groups: Vec<StateGroup> = self
            .groups
            .iter()
            .map(|code_name| StateGroup {
                id: take_id(),
                graph_id: graph.id,
                code_name: code_name.clone(),
                name: code_name.clone(),
            })
            .collect();

        let mut states = Vec::with_capacity(self.states.len());
        for definition in &self.states {
            let group = match &definition.group {
                Some(group_code) => Some(
                    groups
                        .iter()
                        .find(|g| &g.code_name == group_code)
                        .cloned()
                        .ok_or_else(|| GraphError::UnknownGroup {
                            state: definition.code_name.clone(),
                            group: group_code.clone(),
                        })?,
                ),
                None => None,
            };

            states.push(State {
                id: take_id(),
                code_name: definition.code_name.clone(),
                name: definition.code_name.clone(),
                graph: graph.clone(),
                group,
            });
        }

        let find_state = |path: &str, code_name: &str| {
            states
                .iter()
                .find(|s| s.code_name == code_name)
                .cloned()
                .ok_or_else(|| GraphError::UnknownState {
                    path: path.to_string(),
                    state: code_name.to_string(),
                })
        };

        let mut paths = Vec::with_capacity(self.paths.len());
        for definition in self.paths {
            let previous_state = find_state(&definition.code_name, &definition.from)?;
            let next_state = find_state(&definition.code_name, &definition.to)?;

            paths.push(StatePath {
                id: take_id(),
                name: definition
                    .name
                    .unwrap_or_else(|| definition.code_name.clone()),
                code_name: definition.code_name,
                graph: graph.clone(),
                previous_state,
                next_state,
                and_mask: definition.and_mask,
                or_mask: definition.or_mask,
                pre_actions: definition.pre_actions,
                post_actions: definition.post_actions,
            });
        }

        Ok(GraphDefinition {
            graph,
            groups,
            states,
            paths,
            next_id,
        })
    }
}

fn ensure_unique<'a>(
    graph: &str,
    kind: &'static str,
    code_names: impl Iterator<Item = &'a String>,
) -> Result<(), GraphError> {
    let mut seen = HashSet::new();
    for code_name in code_names {
        if !seen.insert(code_name) {
            return Err(GraphError::DuplicateCodeName {
                kind,
                code_name: code_name.clone(),
                graph: graph.to_string(),
            });
        }
    }
    Ok(())
}

/// A fully resolved graph with ids assigned
#[derive(Debug, Clone, PartialEq)]
pub struct GraphDefinition {
    pub graph: WorkflowGraph,
    pub groups: Vec<StateGroup>,
    pub states: Vec<State>,
    pub paths: Vec<StatePath>,
    next_id: GraphId,
}

impl GraphDefinition {
    pub fn state(&self, code_name: &str) -> Option<&State> {
        self.states.iter().find(|s| s.code_name == code_name)
    }

    pub fn path(&self, code_name: &str) -> Option<&StatePath> {
        self.paths.iter().find(|p| p.code_name == code_name)
    }

    /// First id not used by this definition
    pub fn next_id(&self) -> GraphId {
        self.next_id
    }
}
