//! Crate-level error aggregating the per-module error types

use thiserror::Error;

use crate::config::ConfigurationError;
use crate::funds::{DigestionError, IntakeError};
use crate::graph::GraphError;
use crate::state_machine::{ActionError, PersistenceError, StateMachineError};

#[derive(Error, Debug)]
pub enum StatePathError {
    #[error(transparent)]
    StateMachine(#[from] StateMachineError),

    #[error(transparent)]
    Action(#[from] ActionError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Digestion(#[from] DigestionError),

    #[error(transparent)]
    Intake(#[from] IntakeError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl StatePathError {
    /// Whether retrying the same operation may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::StateMachine(err) => err.is_retryable(),
            Self::Persistence(err) => err.is_retryable(),
            Self::Digestion(DigestionError::Persistence(err)) => err.is_retryable(),
            Self::Intake(IntakeError::Persistence(err)) => err.is_retryable(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, StatePathError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::errors::backend_error;

    #[test]
    fn test_conversions_keep_source_message() {
        let err: StatePathError = GraphError::UnknownGroup {
            state: "pending".to_string(),
            group: "interim".to_string(),
        }
        .into();
        assert!(err.to_string().contains("interim"));
        assert!(!err.is_retryable());

        let err: StatePathError = IntakeError::from(backend_error("connection reset")).into();
        assert!(err.to_string().contains("connection reset"));
    }
}
