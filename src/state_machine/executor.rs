//! # Transition Executor
//!
//! Executes one path against one stateful object inside a single
//! transaction:
//!
//! 1. static validation of the path (record type, persisted unchanged)
//! 2. access gate
//! 3. action resolution and argument validation
//! 4. optimistic reload of the object
//! 5. state compatibility check
//! 6. transaction, pre-actions, state/stamp mutation, post-actions, commit
//!
//! Any failure leaves the object as it was before the call and nothing
//! persisted.

use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::actions::{ActionContext, ActionPhase, ActionPipeline, ActionRegistry, StateAction};
use super::cache::PathCache;
use super::errors::{StateMachineError, StateMachineResult};
use super::guards::{AccessGate, Principal};
use super::parameters::{Arguments, ParameterValidator, ValidationErrors};
use super::persistence::WorkflowSession;
use super::stateful::{StateTransition, Stateful, TransitionRecord};
use super::transaction::TransactionScope;
use crate::config::PathCacheConfig;
use crate::graph::{EntityState, GraphSource, NodeKey, StatePath};
use crate::logging::log_transition_operation;

/// One path execution request
#[derive(Debug, Clone)]
pub struct TransitionRequest {
    pub path: Arc<StatePath>,
    pub arguments: Arguments,
    /// Registry names run after the path's own post-actions
    pub extra_post_actions: Vec<String>,
}

impl TransitionRequest {
    pub fn new(path: Arc<StatePath>) -> Self {
        Self {
            path,
            arguments: Arguments::new(),
            extra_post_actions: Vec::new(),
        }
    }

    pub fn with_arguments(mut self, arguments: Arguments) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn with_argument(mut self, key: &str, value: serde_json::Value) -> Self {
        self.arguments.insert(key.to_string(), value);
        self
    }

    pub fn with_post_action(mut self, action: &str) -> Self {
        self.extra_post_actions.push(action.to_string());
        self
    }
}

pub struct TransitionExecutor<D: WorkflowSession> {
    session: Arc<D>,
    cache: Arc<PathCache>,
    registry: Arc<ActionRegistry<D>>,
    gate: Arc<dyn AccessGate<D::Object>>,
}

impl<D: WorkflowSession> TransitionExecutor<D> {
    /// Create an executor with its own path cache over `source`
    pub fn new(
        session: Arc<D>,
        source: Arc<dyn GraphSource>,
        registry: Arc<ActionRegistry<D>>,
        gate: Arc<dyn AccessGate<D::Object>>,
        cache_config: &PathCacheConfig,
    ) -> Self {
        let cache = Arc::new(PathCache::new(
            <D::Record as TransitionRecord>::RECORD_TYPE,
            source,
            cache_config,
        ));

        Self {
            session,
            cache,
            registry,
            gate,
        }
    }

    /// Create an executor sharing an existing cache
    ///
    /// The cache must have been built for this session's record type.
    pub fn with_cache(
        session: Arc<D>,
        cache: Arc<PathCache>,
        registry: Arc<ActionRegistry<D>>,
        gate: Arc<dyn AccessGate<D::Object>>,
    ) -> StateMachineResult<Self> {
        let expected = <D::Record as TransitionRecord>::RECORD_TYPE;
        if cache.expected_record_type() != expected {
            return Err(StateMachineError::GraphMismatch {
                node: "path cache".to_string(),
                graph: "*".to_string(),
                expected: expected.to_string(),
                found: cache.expected_record_type().to_string(),
            });
        }

        Ok(Self {
            session,
            cache,
            registry,
            gate,
        })
    }

    pub fn session(&self) -> &Arc<D> {
        &self.session
    }

    pub fn cache(&self) -> &Arc<PathCache> {
        &self.cache
    }

    pub fn registry(&self) -> &Arc<ActionRegistry<D>> {
        &self.registry
    }

    pub async fn resolve_path(&self, key: impl Into<NodeKey>) -> StateMachineResult<Arc<StatePath>> {
        self.cache.get_path(&key.into()).await
    }

    /// Access gate check without executing anything
    pub async fn can_execute(
        &self,
        principal: &Principal,
        object: &D::Object,
        path: &StatePath,
    ) -> bool {
        self.gate.can_execute(principal, object, path).await
    }

    /// Validate `args` against the specifications gathered from the path's
    /// action pipeline; defaults are taken into account
    pub fn validate_arguments(
        &self,
        path: &StatePath,
        args: &Arguments,
    ) -> StateMachineResult<ValidationErrors> {
        let pipeline = self.registry.resolve_pipeline(path, &[])?;
        let specs = pipeline.parameter_specifications();
        let mut args = args.clone();
        ParameterValidator::apply_defaults(&specs, &mut args);
        Ok(ParameterValidator::validate(&specs, &args))
    }

    pub async fn validate_arguments_by_code(
        &self,
        path_code_name: &str,
        args: &Arguments,
    ) -> StateMachineResult<ValidationErrors> {
        let path = self.resolve_path(path_code_name).await?;
        self.validate_arguments(&path, args)
    }

    /// Reject paths of a foreign record type and paths that are not the
    /// currently persisted configuration
    pub async fn validate_path_static(&self, path: &StatePath) -> StateMachineResult<()> {
        let expected = <D::Record as TransitionRecord>::RECORD_TYPE;
        if !path.belongs_to_record_type(expected) {
            return Err(StateMachineError::GraphMismatch {
                node: format!("path '{}'", path.code_name),
                graph: path.graph.code_name.clone(),
                expected: expected.to_string(),
                found: path.graph.transition_record_type.clone(),
            });
        }

        let state = self.cache.source().path_entity_state(path).await?;
        if state != EntityState::Unchanged {
            return Err(StateMachineError::StalePathConfiguration {
                path: path.code_name.clone(),
                state,
            });
        }

        Ok(())
    }

    /// Resolve a path through the cache and statically validate it
    ///
    /// A cached definition that no longer matches the persisted one is
    /// evicted and loaded once more before giving up.
    pub async fn resolve_current_path(
        &self,
        key: impl Into<NodeKey>,
    ) -> StateMachineResult<Arc<StatePath>> {
        let key = key.into();
        let path = self.cache.get_path(&key).await?;

        match self.validate_path_static(&path).await {
            Ok(()) => Ok(path),
            Err(StateMachineError::StalePathConfiguration { state, .. }) => {
                debug!(path = %path.code_name, state = %state, "Evicting stale cached path");
                self.cache.invalidate_path(&path).await;

                let reloaded = self.cache.get_path(&key).await?;
                self.validate_path_static(&reloaded).await?;
                Ok(reloaded)
            }
            Err(err) => Err(err),
        }
    }

    /// The path must resolve by id through this engine's cache to an
    /// identical definition
    pub async fn ensure_known_path(&self, path: &StatePath) -> StateMachineResult<()> {
        match self.cache.get_path(&NodeKey::Id(path.id)).await {
            Ok(known) if known.as_ref() == path => Ok(()),
            Ok(_) | Err(StateMachineError::PathNotFound { .. }) => {
                Err(StateMachineError::UnknownPath {
                    path: path.code_name.clone(),
                })
            }
            Err(err) => Err(err),
        }
    }

    /// Execute the requested path against `object`
    #[instrument(
        skip_all,
        fields(
            path = %request.path.code_name,
            stateful_id = %object.stateful_id(),
            principal = %principal.name
        )
    )]
    pub async fn execute(
        &self,
        principal: &Principal,
        object: &mut D::Object,
        request: TransitionRequest,
    ) -> StateMachineResult<D::Record> {
        self.validate_path_static(&request.path).await?;
        self.execute_validated(principal, object, request).await
    }

    /// Resolve a path by code name through the cache, then execute it
    pub async fn execute_by_code(
        &self,
        principal: &Principal,
        object: &mut D::Object,
        path_code_name: &str,
        arguments: Arguments,
    ) -> StateMachineResult<D::Record> {
        let path = self.resolve_current_path(path_code_name).await?;
        self.execute_validated(
            principal,
            object,
            TransitionRequest::new(path).with_arguments(arguments),
        )
        .await
    }

    /// Execute a path that already passed static validation
    pub(crate) async fn execute_validated(
        &self,
        principal: &Principal,
        object: &mut D::Object,
        request: TransitionRequest,
    ) -> StateMachineResult<D::Record> {
        let TransitionRequest {
            path,
            mut arguments,
            extra_post_actions,
        } = request;

        if !self.gate.can_execute(principal, object, &path).await {
            warn!(
                path = %path.code_name,
                principal = %principal.name,
                gate = self.gate.description(),
                "Access denied"
            );
            return Err(StateMachineError::AccessDenied {
                principal: principal.name.clone(),
                path: path.code_name.clone(),
            });
        }

        let pipeline = self.registry.resolve_pipeline(&path, &extra_post_actions)?;
        let specs = pipeline.parameter_specifications();
        ParameterValidator::apply_defaults(&specs, &mut arguments);
        let errors = ParameterValidator::validate(&specs, &arguments);
        if !errors.is_empty() {
            return Err(StateMachineError::ArgumentValidation {
                path: path.code_name.clone(),
                errors,
            });
        }

        if self.session.object_entity_state(object).await? == EntityState::Unchanged {
            self.session.reload(object).await?;
        }

        if object.state_id() != path.previous_state.id {
            return Err(StateMachineError::IncompatibleState {
                path: path.code_name.clone(),
                expected: path.previous_state.code_name.clone(),
                actual: object.state_id(),
            });
        }

        let snapshot = object.clone();
        let mut scope = TransactionScope::begin(self.session.as_ref()).await?;

        let outcome = self
            .run_in_scope(&mut scope, principal, object, &path, &pipeline, &arguments)
            .await;

        let record = match outcome {
            Ok(record) => record,
            Err(err) => {
                *object = snapshot;
                if let Err(rollback_err) = scope.rollback().await {
                    warn!(error = %rollback_err, "Rollback after failed transition also failed");
                }
                debug!(path = %path.code_name, error = %err, "Transition rolled back");
                return Err(err);
            }
        };

        if let Err(err) = scope.commit().await {
            *object = snapshot;
            return Err(err.into());
        }

        if path.is_group_transition() {
            info!(
                path = %path.code_name,
                from_group = path.previous_state.group_code_name(),
                to_group = path.next_state.group_code_name(),
                "State group transition"
            );
        }

        log_transition_operation(
            "execute",
            &path.code_name,
            object.stateful_id(),
            "committed",
            None,
        );

        Ok(record)
    }

    async fn run_in_scope(
        &self,
        scope: &mut TransactionScope<'_, D>,
        principal: &Principal,
        object: &mut D::Object,
        path: &StatePath,
        pipeline: &ActionPipeline<D>,
        arguments: &Arguments,
    ) -> StateMachineResult<D::Record> {
        let mut record = D::Record::open(StateTransition::begin(object, path, principal));

        for action in &pipeline.pre {
            self.run_action(
                scope,
                principal,
                path,
                ActionPhase::Pre,
                action.as_ref(),
                object,
                &mut record,
                arguments,
            )
            .await?;
        }

        let change_stamp = path.apply_masks(object.change_stamp());
        object.set_state_id(path.next_state.id);
        object.set_change_stamp(change_stamp);
        record.transition_mut().complete(change_stamp);

        for action in &pipeline.post {
            self.run_action(
                scope,
                principal,
                path,
                ActionPhase::Post,
                action.as_ref(),
                object,
                &mut record,
                arguments,
            )
            .await?;
        }

        let session = scope.session();
        let (tx, _) = scope.parts_mut();
        session.save_object(tx, object).await?;
        session.insert_transition(tx, &record).await?;

        Ok(record)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_action(
        &self,
        scope: &mut TransactionScope<'_, D>,
        principal: &Principal,
        path: &StatePath,
        phase: ActionPhase,
        action: &dyn StateAction<D>,
        object: &mut D::Object,
        record: &mut D::Record,
        arguments: &Arguments,
    ) -> StateMachineResult<()> {
        debug!(action = action.name(), phase = %phase, "Running state action");

        let session = scope.session();
        let (tx, compensations) = scope.parts_mut();
        let mut ctx = ActionContext::new(session, tx, compensations, principal, path, phase);

        action
            .execute(&mut ctx, object, record, arguments)
            .await
            .map_err(|source| StateMachineError::ActionFailed {
                action: action.name().to_string(),
                phase,
                source,
            })
    }
}
