use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use super::errors::{ActionResult, StateMachineError, StateMachineResult};
use super::guards::Principal;
use super::parameters::{Arguments, ParameterSpecification, ParameterValidator};
use super::persistence::WorkflowSession;
use super::transaction::Compensations;
use crate::graph::StatePath;

/// Which side of the state mutation an action runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionPhase {
    Pre,
    Post,
}

impl fmt::Display for ActionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pre => write!(f, "pre"),
            Self::Post => write!(f, "post"),
        }
    }
}

/// Everything an action may touch besides the object and its transition
pub struct ActionContext<'a, D: WorkflowSession> {
    session: &'a D,
    tx: &'a mut D::Tx,
    compensations: &'a mut Compensations,
    principal: &'a Principal,
    path: &'a StatePath,
    phase: ActionPhase,
}

impl<'a, D: WorkflowSession> ActionContext<'a, D> {
    pub(crate) fn new(
        session: &'a D,
        tx: &'a mut D::Tx,
        compensations: &'a mut Compensations,
        principal: &'a Principal,
        path: &'a StatePath,
        phase: ActionPhase,
    ) -> Self {
        Self {
            session,
            tx,
            compensations,
            principal,
            path,
            phase,
        }
    }

    pub fn session(&self) -> &'a D {
        self.session
    }

    /// The open transaction all writes of this execution belong to
    pub fn tx(&mut self) -> &mut D::Tx {
        &mut *self.tx
    }

    pub fn principal(&self) -> &'a Principal {
        self.principal
    }

    pub fn path(&self) -> &'a StatePath {
        self.path
    }

    pub fn phase(&self) -> ActionPhase {
        self.phase
    }

    /// Run `hook` after the transaction committed
    pub fn on_commit<F, Fut>(&mut self, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.compensations.on_commit(hook);
    }

    /// Run `hook` if the transaction is rolled back or fails to commit
    pub fn on_rollback<F, Fut>(&mut self, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.compensations.on_rollback(hook);
    }
}

/// Trait for implementing pluggable pre- and post-actions
#[async_trait]
pub trait StateAction<D: WorkflowSession>: Send + Sync {
    /// Name paths use to reference this action
    fn name(&self) -> &str;

    /// Arguments this action consumes
    fn parameter_specifications(&self) -> Vec<ParameterSpecification> {
        Vec::new()
    }

    /// Execute the action; any error aborts and rolls back the transition
    async fn execute(
        &self,
        ctx: &mut ActionContext<'_, D>,
        object: &mut D::Object,
        transition: &mut D::Record,
        args: &Arguments,
    ) -> ActionResult<()>;

    /// Get a description of this action for logging
    fn description(&self) -> &'static str;
}

/// Resolved actions of one path execution
pub struct ActionPipeline<D: WorkflowSession> {
    pub pre: Vec<Arc<dyn StateAction<D>>>,
    pub post: Vec<Arc<dyn StateAction<D>>>,
}

impl<D: WorkflowSession> ActionPipeline<D> {
    pub fn parameter_specifications(&self) -> Vec<ParameterSpecification> {
        ParameterValidator::gather(
            self.pre.iter().flat_map(|a| a.parameter_specifications()),
            self.post.iter().flat_map(|a| a.parameter_specifications()),
        )
    }

    pub fn len(&self) -> usize {
        self.pre.len() + self.post.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Name to action lookup for one engine instance
pub struct ActionRegistry<D: WorkflowSession> {
    actions: HashMap<String, Arc<dyn StateAction<D>>>,
}

impl<D: WorkflowSession> Default for ActionRegistry<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: WorkflowSession> ActionRegistry<D> {
    pub fn new() -> Self {
        Self {
            actions: HashMap::new(),
        }
    }

    /// Register an action under its own name, replacing any previous one
    pub fn register<A>(&mut self, action: A) -> &mut Self
    where
        A: StateAction<D> + 'static,
    {
        self.register_arc(Arc::new(action))
    }

    pub fn register_arc(&mut self, action: Arc<dyn StateAction<D>>) -> &mut Self {
        let name = action.name().to_string();
        debug!(action = %name, description = action.description(), "Registering state action");
        if self.actions.insert(name.clone(), action).is_some() {
            warn!(action = %name, "Replaced previously registered state action");
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn StateAction<D>>> {
        self.actions.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Resolve every action a path declares plus `extra_post` appended after
    /// the path's own post-actions
    pub fn resolve_pipeline(
        &self,
        path: &StatePath,
        extra_post: &[String],
    ) -> StateMachineResult<ActionPipeline<D>> {
        let resolve = |name: &String| {
            self.get(name).ok_or_else(|| StateMachineError::UnknownAction {
                path: path.code_name.clone(),
                action: name.clone(),
            })
        };

        let pre = path
            .pre_actions
            .iter()
            .map(resolve)
            .collect::<StateMachineResult<Vec<_>>>()?;
        let post = path
            .post_actions
            .iter()
            .chain(extra_post.iter())
            .map(resolve)
            .collect::<StateMachineResult<Vec<_>>>()?;

        Ok(ActionPipeline { pre, post })
    }
}
