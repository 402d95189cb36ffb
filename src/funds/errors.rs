use thiserror::Error;

use crate::state_machine::{PersistenceError, StateMachineError};

/// Failure digesting one response line
///
/// Carried in the line's result and persisted as a failure event; never
/// aborts the surrounding batch.
#[derive(Error, Debug)]
pub enum DigestionError {
    #[error("No transfer request matches transaction '{transaction_id}'{}", group_suffix(.group_id))]
    Unresolved {
        transaction_id: String,
        group_id: Option<String>,
    },

    #[error("Unknown credit system: {code}")]
    UnknownCreditSystem { code: String },

    #[error("Digestion policy rejected the line: {message}")]
    Policy { message: String },

    #[error("Workflow error: {0}")]
    Workflow(#[from] StateMachineError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("{original} (failure event not recorded: {record_error})")]
    FailureNotRecorded {
        original: Box<DigestionError>,
        record_error: PersistenceError,
    },
}

impl DigestionError {
    pub fn policy(err: &anyhow::Error) -> Self {
        Self::Policy {
            message: format!("{err:#}"),
        }
    }

    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unresolved { .. } => "UNRESOLVED_LINE",
            Self::UnknownCreditSystem { .. } => "UNKNOWN_CREDIT_SYSTEM",
            Self::Policy { .. } => "POLICY_REJECTED",
            Self::Workflow(err) => err.code(),
            Self::Persistence(_) => "PERSISTENCE_ERROR",
            Self::FailureNotRecorded { .. } => "FAILURE_NOT_RECORDED",
        }
    }
}

fn group_suffix(group_id: &Option<String>) -> String {
    group_id
        .as_ref()
        .map(|group| format!(" in group '{group}'"))
        .unwrap_or_default()
}

/// Whole-batch intake failures; no line of the batch is digested
#[derive(Error, Debug)]
pub enum IntakeError {
    #[error("Unknown credit system: {code}")]
    UnknownCreditSystem { code: String },

    #[error("Batch '{collation_id}' from credit system '{credit_system}' was already received")]
    DuplicateCollation {
        credit_system: String,
        collation_id: String,
    },

    #[error("Batch has {lines} lines, limit is {max}")]
    BatchTooLarge { lines: usize, max: usize },

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

pub type DigestionResult<T> = Result<T, DigestionError>;
pub type IntakeResult<T> = Result<T, IntakeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unresolved_message() {
        let err = DigestionError::Unresolved {
            transaction_id: "TX-9".to_string(),
            group_id: Some("G-1".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "No transfer request matches transaction 'TX-9' in group 'G-1'"
        );
        assert_eq!(err.code(), "UNRESOLVED_LINE");
    }

    #[test]
    fn test_policy_error_keeps_context_chain() {
        let source = anyhow::anyhow!("limit exceeded").context("cannot settle");
        let err = DigestionError::policy(&source);
        assert_eq!(
            err.to_string(),
            "Digestion policy rejected the line: cannot settle: limit exceeded"
        );
    }

    #[test]
    fn test_workflow_code_is_forwarded() {
        let err = DigestionError::from(StateMachineError::UnknownPath {
            path: "settle".to_string(),
        });
        assert_eq!(err.code(), "UNKNOWN_PATH");
    }
}
