use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::models::{NodeKey, State, StatePath};
use crate::state_machine::errors::PersistenceResult;

/// Tracking state of an entity relative to what is persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityState {
    /// Persisted and identical to the stored row
    Unchanged,
    /// Never persisted
    Added,
    /// Persisted but differs from the stored row
    Modified,
    /// Was persisted, no longer is
    Deleted,
    /// Not tracked by the session at all
    Detached,
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unchanged => "unchanged",
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
            Self::Detached => "detached",
        };
        write!(f, "{name}")
    }
}

/// Read side of the persistence collaborator for graph configuration
#[async_trait]
pub trait GraphSource: Send + Sync {
    /// Load a path with its owning graph and joined previous/next states
    async fn load_path(&self, key: &NodeKey) -> PersistenceResult<Option<StatePath>>;

    /// Load a state with its owning graph and group
    async fn load_state(&self, key: &NodeKey) -> PersistenceResult<Option<State>>;

    /// Compare a path definition against the currently persisted one
    ///
    /// Paths with id `0` were never persisted. A path whose id no longer
    /// resolves was deleted; one that resolves to a different definition
    /// has been modified in memory (or changed underneath the caller).
    async fn path_entity_state(&self, path: &StatePath) -> PersistenceResult<EntityState> {
        if path.id == 0 {
            return Ok(EntityState::Added);
        }

        let state = match self.load_path(&NodeKey::Id(path.id)).await? {
            None => EntityState::Deleted,
            Some(persisted) if persisted == *path => EntityState::Unchanged,
            Some(_) => EntityState::Modified,
        };

        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_state_display() {
        assert_eq!(EntityState::Unchanged.to_string(), "unchanged");
        assert_eq!(EntityState::Detached.to_string(), "detached");
    }
}
