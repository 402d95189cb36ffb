use thiserror::Error;

use super::actions::ActionPhase;
use super::parameters::ValidationErrors;
use crate::graph::{EntityState, NodeKey};

/// Error types for transition execution
#[derive(Error, Debug)]
pub enum StateMachineError {
    #[error("Principal '{principal}' may not execute path '{path}'")]
    AccessDenied { principal: String, path: String },

    #[error("Invalid arguments for path '{path}': {}", format_validation_errors(.errors))]
    ArgumentValidation {
        path: String,
        errors: ValidationErrors,
    },

    #[error("Path '{path}' requires state '{expected}' but object is in state #{actual}")]
    IncompatibleState {
        path: String,
        expected: String,
        actual: i64,
    },

    #[error("Node {node} belongs to graph '{graph}' declaring record type '{found}', expected '{expected}'")]
    GraphMismatch {
        node: String,
        graph: String,
        expected: String,
        found: String,
    },

    #[error("Path '{path}' is not the persisted configuration (entity state: {state})")]
    StalePathConfiguration { path: String, state: EntityState },

    #[error("Path '{path}' is not known to this engine")]
    UnknownPath { path: String },

    #[error("Path '{path}' references unregistered action '{action}'")]
    UnknownAction { path: String, action: String },

    #[error("{phase}-action '{action}' failed: {source}")]
    ActionFailed {
        action: String,
        phase: ActionPhase,
        #[source]
        source: ActionError,
    },

    #[error("Path not found: {key}")]
    PathNotFound { key: NodeKey },

    #[error("State not found: {key}")]
    StateNotFound { key: NodeKey },

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

impl StateMachineError {
    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::AccessDenied { .. } => "ACCESS_DENIED",
            Self::ArgumentValidation { .. } => "ARGUMENT_VALIDATION",
            Self::IncompatibleState { .. } => "INCOMPATIBLE_STATE",
            Self::GraphMismatch { .. } => "GRAPH_MISMATCH",
            Self::StalePathConfiguration { .. } => "STALE_PATH_CONFIGURATION",
            Self::UnknownPath { .. } => "UNKNOWN_PATH",
            Self::UnknownAction { .. } => "UNKNOWN_ACTION",
            Self::ActionFailed { .. } => "ACTION_FAILED",
            Self::PathNotFound { .. } => "PATH_NOT_FOUND",
            Self::StateNotFound { .. } => "STATE_NOT_FOUND",
            Self::Persistence(_) => "PERSISTENCE_ERROR",
        }
    }

    /// Only transient storage failures are worth retrying
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Persistence(err) => err.is_retryable(),
            Self::ActionFailed {
                source: ActionError::Persistence(err),
                ..
            } => err.is_retryable(),
            _ => false,
        }
    }

    /// Business-rule violations that should be shown to the end user as-is
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Self::AccessDenied { .. }
                | Self::ArgumentValidation { .. }
                | Self::IncompatibleState { .. }
        )
    }
}

fn format_validation_errors(errors: &ValidationErrors) -> String {
    errors
        .iter()
        .map(|(key, messages)| format!("{key}: {}", messages.join(", ")))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Error type for pluggable action failures
#[derive(Error, Debug)]
pub enum ActionError {
    #[error("Missing argument: {key}")]
    MissingArgument { key: String },

    #[error("Invalid argument '{key}': {reason}")]
    InvalidArgument { key: String, reason: String },

    #[error("Action rejected the transition: {reason}")]
    Rejected { reason: String },

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Error type for persistence collaborators
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Concurrent modification detected for {entity} {id}")]
    ConcurrentModification { entity: &'static str, id: String },

    #[error("Database constraint violation: {constraint}")]
    ConstraintViolation { constraint: String },

    #[error("Storage backend failure: {reason}")]
    Backend { reason: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PersistenceError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConcurrentModification { .. } | Self::Backend { .. } => true,
            Self::Database(err) => matches!(
                err,
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed
            ),
            _ => false,
        }
    }
}

/// Result type alias for state machine operations
pub type StateMachineResult<T> = Result<T, StateMachineError>;
pub type ActionResult<T> = Result<T, ActionError>;
pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Helper function to create action rejections
pub fn rejected(reason: impl Into<String>) -> ActionError {
    ActionError::Rejected {
        reason: reason.into(),
    }
}

/// Helper function to create invalid-argument errors
pub fn invalid_argument(key: impl Into<String>, reason: impl Into<String>) -> ActionError {
    ActionError::InvalidArgument {
        key: key.into(),
        reason: reason.into(),
    }
}

/// Helper function to create backend failures
pub fn backend_error(reason: impl Into<String>) -> PersistenceError {
    PersistenceError::Backend {
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_codes_and_retryability() {
        let denied = StateMachineError::AccessDenied {
            principal: "alice".to_string(),
            path: "approve".to_string(),
        };
        assert_eq!(denied.code(), "ACCESS_DENIED");
        assert!(!denied.is_retryable());
        assert!(denied.is_user_facing());

        let transient = StateMachineError::Persistence(backend_error("connection reset"));
        assert!(transient.is_retryable());
        assert!(!transient.is_user_facing());

        let action = StateMachineError::ActionFailed {
            action: "notify".to_string(),
            phase: ActionPhase::Post,
            source: rejected("no recipients"),
        };
        assert_eq!(action.code(), "ACTION_FAILED");
        assert!(!action.is_retryable());
        assert_eq!(
            action.to_string(),
            "post-action 'notify' failed: Action rejected the transition: no recipients"
        );
    }

    #[test]
    fn test_validation_error_message() {
        let mut errors = BTreeMap::new();
        errors.insert("amount".to_string(), vec!["required".to_string()]);
        errors.insert(
            "note".to_string(),
            vec!["expected string, found number".to_string()],
        );

        let err = StateMachineError::ArgumentValidation {
            path: "approve".to_string(),
            errors,
        };

        assert_eq!(
            err.to_string(),
            "Invalid arguments for path 'approve': amount: required; note: expected string, found number"
        );
    }
}
