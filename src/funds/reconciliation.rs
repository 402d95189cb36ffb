//! # Reconciliation Engine
//!
//! Applies credit-system responses to in-flight transfers exactly once.
//!
//! Each line is resolved to its request and stateful object, checked against
//! the event trail for an earlier digestion, handed to the digestion policy
//! and then either drives a path execution or is recorded directly. Errors
//! after resolution are turned into `Failed`/`WorkflowFailed` events instead
//! of escaping; only whole-batch intake problems are returned as errors.

use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::actions::{RecordTransferEventAction, RECORD_TRANSFER_EVENT};
use super::errors::{DigestionError, DigestionResult, IntakeError, IntakeResult};
use super::policy::{DecisionContext, DigestionPolicy, PathSelection};
use super::store::TransferRequestStore;
use super::types::{
    BatchMessage, CreditSystem, ExceptionPayload, FailurePhase, FundsResponseBatch,
    FundsResponseLine, FundsResponseResult, FundsStateTransition, FundsTransferEvent,
    FundsTransferEventType, FundsTransferRequest,
};
use crate::config::ReconciliationConfig;
use crate::graph::NodeKey;
use crate::logging::{log_digestion_operation, log_error};
use crate::state_machine::{
    PersistenceError, Principal, StateMachineError, Stateful, TransactionScope,
    TransitionExecutor, TransitionRequest,
};

pub struct ReconciliationEngine<D: TransferRequestStore> {
    executor: Arc<TransitionExecutor<D>>,
    policy: Arc<dyn DigestionPolicy<D::Object>>,
    config: ReconciliationConfig,
}

/// A line resolved to its request and object
struct Resolved<S> {
    request: FundsTransferRequest,
    object: S,
}

/// Error raised while digesting, tagged with where it happened
struct PhasedError {
    phase: FailurePhase,
    error: DigestionError,
}

impl PhasedError {
    fn decision(error: impl Into<DigestionError>) -> Self {
        Self {
            phase: FailurePhase::Decision,
            error: error.into(),
        }
    }

    fn workflow(error: impl Into<DigestionError>) -> Self {
        Self {
            phase: FailurePhase::Workflow,
            error: error.into(),
        }
    }
}

impl<D: TransferRequestStore> ReconciliationEngine<D> {
    /// The executor's registry must provide the transfer-event action
    pub fn new(
        executor: Arc<TransitionExecutor<D>>,
        policy: Arc<dyn DigestionPolicy<D::Object>>,
        config: ReconciliationConfig,
    ) -> Result<Self, StateMachineError> {
        if !executor.registry().contains(RECORD_TRANSFER_EVENT) {
            return Err(StateMachineError::UnknownAction {
                path: "*".to_string(),
                action: RECORD_TRANSFER_EVENT.to_string(),
            });
        }

        Ok(Self {
            executor,
            policy,
            config,
        })
    }

    pub fn executor(&self) -> &Arc<TransitionExecutor<D>> {
        &self.executor
    }

    fn store(&self) -> &D {
        self.executor.session().as_ref()
    }

    /// Record a new transfer request together with its `Submitted` event
    ///
    /// Resubmitting a transaction id already known for the credit system
    /// returns the original `Submitted` event.
    #[instrument(skip_all, fields(transaction_id = %request.transaction_id))]
    pub async fn submit_request(
        &self,
        request: FundsTransferRequest,
    ) -> IntakeResult<FundsTransferEvent> {
        let store = self.store();

        if let Some(existing) = store
            .find_request(
                request.credit_system_id,
                &request.transaction_id,
                request.group_id.as_deref(),
            )
            .await?
        {
            if let Some(event) = store
                .find_event(existing.id, FundsTransferEventType::Submitted, None)
                .await?
            {
                debug!(request_id = %existing.id, "Transfer request already submitted");
                return Ok(event);
            }

            let event = FundsTransferEvent::new(
                existing.id,
                FundsTransferEventType::Submitted,
                existing.created_at,
            );
            self.append_in_transaction(&event).await?;
            return Ok(event);
        }

        let event = FundsTransferEvent::new(
            request.id,
            FundsTransferEventType::Submitted,
            request.created_at,
        );

        let mut scope = TransactionScope::begin(store).await?;
        let (tx, _) = scope.parts_mut();
        let staged = match store.insert_request(tx, &request).await {
            Ok(()) => store.append_event(tx, &event).await,
            Err(err) => Err(err),
        };
        match staged {
            Ok(()) => scope.commit().await?,
            Err(err) => {
                if let Err(rollback_err) = scope.rollback().await {
                    warn!(error = %rollback_err, "Rollback of request submission failed");
                }
                return Err(err.into());
            }
        }

        log_digestion_operation(
            "submit",
            &request.credit_system_id.to_string(),
            Some(&request.transaction_id),
            Some(request.id),
            "submitted",
            None,
        );

        Ok(event)
    }

    /// Digest a single line outside of any batch
    #[instrument(skip_all, fields(credit_system = credit_system_code, line = %line.line_id))]
    pub async fn digest_line(
        &self,
        principal: &Principal,
        credit_system_code: &str,
        line: FundsResponseLine,
    ) -> FundsResponseResult<D::Object> {
        let credit_system = match self.store().find_credit_system(credit_system_code).await {
            Ok(Some(credit_system)) => credit_system,
            Ok(None) => {
                let mut result = FundsResponseResult::for_line(line);
                result.error = Some(DigestionError::UnknownCreditSystem {
                    code: credit_system_code.to_string(),
                });
                return result;
            }
            Err(err) => {
                let mut result = FundsResponseResult::for_line(line);
                result.error = Some(err.into());
                return result;
            }
        };

        self.digest(principal, &credit_system, line, None).await
    }

    /// Digest every line of a batch, in order
    ///
    /// The credit system and collation id are validated once up front; a
    /// failure there rejects the whole batch before any line is touched.
    #[instrument(
        skip_all,
        fields(
            credit_system = %batch.credit_system_code,
            collation_id = %batch.collation_id,
            lines = batch.lines.len()
        )
    )]
    pub async fn digest_batch(
        &self,
        principal: &Principal,
        batch: FundsResponseBatch,
    ) -> IntakeResult<Vec<FundsResponseResult<D::Object>>> {
        let FundsResponseBatch {
            credit_system_code,
            collation_id,
            lines,
        } = batch;

        if lines.len() > self.config.max_batch_lines {
            return Err(IntakeError::BatchTooLarge {
                lines: lines.len(),
                max: self.config.max_batch_lines,
            });
        }

        let store = self.store();
        let credit_system = store
            .find_credit_system(&credit_system_code)
            .await?
            .ok_or_else(|| IntakeError::UnknownCreditSystem {
                code: credit_system_code.clone(),
            })?;

        if store
            .collation_exists(credit_system.id, &collation_id)
            .await?
        {
            return Err(IntakeError::DuplicateCollation {
                credit_system: credit_system.code_name,
                collation_id,
            });
        }

        let message = BatchMessage::new(credit_system.id, &collation_id, lines.len());
        let mut scope = TransactionScope::begin(store).await?;
        let (tx, _) = scope.parts_mut();
        match store.insert_batch_message(tx, &message).await {
            Ok(()) => scope.commit().await?,
            Err(err) => {
                if let Err(rollback_err) = scope.rollback().await {
                    warn!(error = %rollback_err, "Rollback of batch message failed");
                }
                return Err(err.into());
            }
        }

        let mut results = Vec::with_capacity(lines.len());
        for line in lines {
            results.push(
                self.digest(principal, &credit_system, line, Some(message.id))
                    .await,
            );
        }

        let digested = results.iter().filter(|r| r.is_success()).count();
        let duplicates = results.iter().filter(|r| r.is_already_digested).count();
        info!(
            batch_message_id = %message.id,
            digested = digested,
            already_digested = duplicates,
            failed = results.len() - digested,
            "Batch digestion finished"
        );

        Ok(results)
    }

    async fn digest(
        &self,
        principal: &Principal,
        credit_system: &CreditSystem,
        line: FundsResponseLine,
        batch_message_id: Option<Uuid>,
    ) -> FundsResponseResult<D::Object> {
        let mut result = FundsResponseResult::for_line(line.clone());

        let Resolved {
            request,
            mut object,
        } = match self.resolve(credit_system, &line).await {
            Ok(resolved) => resolved,
            Err(err) => {
                log_digestion_operation(
                    "digest",
                    &credit_system.code_name,
                    Some(&line.transaction_id),
                    None,
                    "unresolved",
                    Some(&err.to_string()),
                );
                result.error = Some(err);
                return result;
            }
        };
        result.request_id = Some(request.id);

        let event_type = line.event_type();
        match self
            .store()
            .find_event(request.id, event_type, line.response_code.as_deref())
            .await
        {
            Ok(Some(event)) => {
                debug!(request_id = %request.id, event_type = %event_type, "Line already digested");
                result.stateful_object = Some(object);
                result.event = Some(event);
                result.is_already_digested = true;
                return result;
            }
            Ok(None) => {}
            Err(err) => {
                result.stateful_object = Some(object);
                result.error = Some(err.into());
                return result;
            }
        }

        let snapshot = object.clone();
        match self
            .apply(principal, &request, &mut object, &line, batch_message_id)
            .await
        {
            Ok((transition, event)) => {
                log_digestion_operation(
                    "digest",
                    &credit_system.code_name,
                    Some(&line.transaction_id),
                    Some(request.id),
                    event.event_type.as_str(),
                    None,
                );
                result.stateful_object = Some(object);
                result.transition = transition;
                result.event = Some(event);
            }
            Err(PhasedError { phase, error }) => {
                // discard anything the failed attempt left on the object
                object = snapshot;
                let (event, error) = self
                    .record_failure(&request, &line, batch_message_id, phase, error)
                    .await;
                result.stateful_object = Some(object);
                result.event = event;
                result.error = Some(error);
            }
        }

        result
    }

    async fn resolve(
        &self,
        credit_system: &CreditSystem,
        line: &FundsResponseLine,
    ) -> DigestionResult<Resolved<D::Object>> {
        let store = self.store();
        let unresolved = || DigestionError::Unresolved {
            transaction_id: line.transaction_id.clone(),
            group_id: line.group_id.clone(),
        };

        let request = store
            .find_request(
                credit_system.id,
                &line.transaction_id,
                line.group_id.as_deref(),
            )
            .await?
            .ok_or_else(unresolved)?;

        let object = store
            .load_object(request.stateful_id)
            .await?
            .ok_or_else(unresolved)?;

        Ok(Resolved { request, object })
    }

    /// Policy decision followed by path execution or direct recording
    async fn apply(
        &self,
        principal: &Principal,
        request: &FundsTransferRequest,
        object: &mut D::Object,
        line: &FundsResponseLine,
        batch_message_id: Option<Uuid>,
    ) -> Result<(Option<FundsStateTransition>, FundsTransferEvent), PhasedError> {
        let current_state = self
            .executor
            .cache()
            .get_state(&NodeKey::Id(object.state_id()))
            .await
            .map_err(PhasedError::decision)?;

        let mut selection = PathSelection::new();
        let decision = {
            let ctx = DecisionContext {
                request,
                object: &*object,
                current_state: &current_state,
                line,
            };
            self.policy.decide(&ctx, &mut selection)
        };

        if let Err(err) = decision {
            let error = DigestionError::policy(&err);
            return Err(if selection.is_path_selected() {
                PhasedError::workflow(error)
            } else {
                PhasedError::decision(error)
            });
        }

        let (selected, extra_arguments) = selection.into_parts();
        let Some(path_code_name) = selected else {
            let event = FundsTransferEvent::new(request.id, line.event_type(), line.timestamp)
                .with_codes(line.response_code.as_deref(), line.trace_code.as_deref())
                .in_batch(batch_message_id);
            self.append_in_transaction(&event)
                .await
                .map_err(PhasedError::decision)?;
            return Ok((None, event));
        };

        let path = self
            .executor
            .resolve_current_path(path_code_name.as_str())
            .await
            .map_err(PhasedError::workflow)?;

        let mut arguments = extra_arguments;
        arguments.extend(RecordTransferEventAction::arguments_for(
            request.id,
            line,
            batch_message_id,
        ));

        let mut transition_request = TransitionRequest::new(path.clone()).with_arguments(arguments);
        if !path.declares_action(RECORD_TRANSFER_EVENT) {
            transition_request = transition_request.with_post_action(RECORD_TRANSFER_EVENT);
        }

        let transition = self
            .executor
            .execute_validated(principal, object, transition_request)
            .await
            .map_err(PhasedError::workflow)?;

        let event = transition.funds_transfer_event.clone().ok_or_else(|| {
            PhasedError::workflow(StateMachineError::UnknownAction {
                path: path.code_name.clone(),
                action: RECORD_TRANSFER_EVENT.to_string(),
            })
        })?;

        Ok((Some(transition), event))
    }

    async fn record_failure(
        &self,
        request: &FundsTransferRequest,
        line: &FundsResponseLine,
        batch_message_id: Option<Uuid>,
        phase: FailurePhase,
        error: DigestionError,
    ) -> (Option<FundsTransferEvent>, DigestionError) {
        warn!(
            request_id = %request.id,
            phase = ?phase,
            code = error.code(),
            error = %error,
            "Digestion failed"
        );

        if !self.config.record_failure_events {
            return (None, error);
        }

        let event = FundsTransferEvent::new(request.id, phase.event_type(), line.timestamp)
            .with_codes(line.response_code.as_deref(), line.trace_code.as_deref())
            .with_exception(ExceptionPayload::from_error(&error, phase))
            .in_batch(batch_message_id);

        match self.append_in_transaction(&event).await {
            Ok(()) => (Some(event), error),
            Err(record_error) => {
                log_error(
                    "reconciliation",
                    "record_failure",
                    &record_error.to_string(),
                    Some(&error.to_string()),
                );
                (
                    None,
                    DigestionError::FailureNotRecorded {
                        original: Box::new(error),
                        record_error,
                    },
                )
            }
        }
    }

    async fn append_in_transaction(
        &self,
        event: &FundsTransferEvent,
    ) -> Result<(), PersistenceError> {
        let store = self.store();
        let mut scope = TransactionScope::begin(store).await?;
        let (tx, _) = scope.parts_mut();
        match store.append_event(tx, event).await {
            Ok(()) => scope.commit().await,
            Err(err) => {
                if let Err(rollback_err) = scope.rollback().await {
                    warn!(error = %rollback_err, "Rollback of event append failed");
                }
                Err(err)
            }
        }
    }
}
