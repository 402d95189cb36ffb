//! # Stateful Objects and Transition Records
//!
//! The two narrow interfaces a domain implements to be driven by the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::guards::Principal;
use crate::graph::{PathId, StateId, StatePath};

/// A domain entity whose lifecycle is governed by workflow paths
///
/// `Clone` lets the executor snapshot the object and discard in-memory edits
/// made by actions when a transition fails.
pub trait Stateful: Clone + Send + Sync + 'static {
    fn stateful_id(&self) -> Uuid;

    fn state_id(&self) -> StateId;

    fn set_state_id(&mut self, state_id: StateId);

    /// Opaque bit field of derived flags, mutated only through path masks
    fn change_stamp(&self) -> i64;

    fn set_change_stamp(&mut self, change_stamp: i64);
}

/// Audit header shared by every transition-record type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub id: Uuid,
    pub stateful_id: Uuid,
    pub path_id: PathId,
    pub path_code_name: String,
    pub previous_state_id: StateId,
    pub next_state_id: StateId,
    pub change_stamp_before: i64,
    /// Set once the state mutation has been applied
    pub change_stamp_after: Option<i64>,
    pub owner_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StateTransition {
    /// Open a transition for `object` executing `path` on behalf of `principal`
    pub fn begin<S: Stateful>(object: &S, path: &StatePath, principal: &Principal) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            stateful_id: object.stateful_id(),
            path_id: path.id,
            path_code_name: path.code_name.clone(),
            previous_state_id: path.previous_state.id,
            next_state_id: path.next_state.id,
            change_stamp_before: object.change_stamp(),
            change_stamp_after: None,
            owner_id: principal.user_id,
            created_at: now,
            updated_at: now,
        }
    }

    pub(crate) fn complete(&mut self, change_stamp_after: i64) {
        self.change_stamp_after = Some(change_stamp_after);
        self.updated_at = Utc::now();
    }

    pub fn is_complete(&self) -> bool {
        self.change_stamp_after.is_some()
    }
}

/// Concrete transition-record type a graph is declared for
pub trait TransitionRecord: Clone + Send + Sync + 'static {
    /// Matched against `WorkflowGraph::transition_record_type`
    const RECORD_TYPE: &'static str;

    fn open(transition: StateTransition) -> Self;

    fn transition(&self) -> &StateTransition;

    fn transition_mut(&mut self) -> &mut StateTransition;
}

impl TransitionRecord for StateTransition {
    const RECORD_TYPE: &'static str = "state_transition";

    fn open(transition: StateTransition) -> Self {
        transition
    }

    fn transition(&self) -> &StateTransition {
        self
    }

    fn transition_mut(&mut self) -> &mut StateTransition {
        self
    }
}
