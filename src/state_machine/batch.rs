use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::errors::{StateMachineError, StateMachineResult};
use super::executor::{TransitionExecutor, TransitionRequest};
use super::guards::Principal;
use super::parameters::Arguments;
use super::persistence::WorkflowSession;
use super::stateful::Stateful;
use crate::graph::StatePath;

/// Outcome of one item of a batch execution
#[derive(Debug)]
pub struct ExecutionResult<S, R> {
    pub object: S,
    pub transition: Option<R>,
    pub error: Option<StateMachineError>,
}

impl<S, R> ExecutionResult<S, R> {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Runs one path over many stateful objects, one transaction per object
pub struct BatchExecutor<D: WorkflowSession> {
    executor: Arc<TransitionExecutor<D>>,
}

impl<D: WorkflowSession> BatchExecutor<D> {
    pub fn new(executor: Arc<TransitionExecutor<D>>) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &Arc<TransitionExecutor<D>> {
        &self.executor
    }

    /// Execute `path` for every object, sequentially
    ///
    /// Fails as a whole only when the path itself is unusable. Per-object
    /// failures are captured in the matching result, which always carries
    /// the object as it was left by its own execution.
    #[instrument(skip_all, fields(path = %path.code_name, items = objects.len()))]
    pub async fn execute_batch(
        &self,
        principal: &Principal,
        objects: Vec<D::Object>,
        path: Arc<StatePath>,
        arguments: Arguments,
    ) -> StateMachineResult<Vec<ExecutionResult<D::Object, D::Record>>> {
        self.executor.validate_path_static(&path).await?;
        self.executor.ensure_known_path(&path).await?;

        let mut results = Vec::with_capacity(objects.len());
        for mut object in objects {
            let request = TransitionRequest::new(path.clone()).with_arguments(arguments.clone());

            let result = match self
                .executor
                .execute_validated(principal, &mut object, request)
                .await
            {
                Ok(transition) => ExecutionResult {
                    object,
                    transition: Some(transition),
                    error: None,
                },
                Err(err) => {
                    warn!(
                        stateful_id = %object.stateful_id(),
                        error = %err,
                        "Batch item failed"
                    );
                    ExecutionResult {
                        object,
                        transition: None,
                        error: Some(err),
                    }
                }
            };
            results.push(result);
        }

        let failed = results.iter().filter(|r| !r.is_success()).count();
        info!(
            succeeded = results.len() - failed,
            failed = failed,
            "Batch execution finished"
        );

        Ok(results)
    }
}
