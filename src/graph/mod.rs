//! # Workflow Graph
//!
//! Configuration data the engine executes against, and the read-side
//! collaborator that loads it.

pub mod builder;
pub mod models;
pub mod source;

pub use builder::{GraphBuilder, GraphDefinition, GraphError, PathDefinition};
pub use models::{
    GraphId, GroupId, NodeKey, PathId, State, StateGroup, StateId, StatePath, WorkflowGraph,
    IDENTITY_AND_MASK, IDENTITY_OR_MASK,
};
pub use source::{EntityState, GraphSource};
