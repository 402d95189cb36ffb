use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use super::store::TransferRequestStore;
use super::types::{FundsResponseLine, FundsStateTransition, FundsTransferEvent, FundsTransferEventType};
use crate::state_machine::parameters::args;
use crate::state_machine::{
    ActionContext, ActionRegistry, ActionResult, Arguments, ParameterSpecification, StateAction,
    TransitionRecord, ValueType,
};

/// Registry name of [`RecordTransferEventAction`]
pub const RECORD_TRANSFER_EVENT: &str = "funds.record_transfer_event";

/// Argument keys consumed by [`RecordTransferEventAction`]
pub mod keys {
    pub const REQUEST_ID: &str = "funds.request_id";
    pub const EVENT_TYPE: &str = "funds.event_type";
    pub const RESPONSE_CODE: &str = "funds.response_code";
    pub const TRACE_CODE: &str = "funds.trace_code";
    pub const OCCURRED_AT: &str = "funds.occurred_at";
    pub const BATCH_MESSAGE_ID: &str = "funds.batch_message_id";
}

/// Post-action appending the transfer event correlated with a transition
///
/// Runs inside the transition's transaction, so the event and the state
/// change become durable together.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordTransferEventAction;

impl RecordTransferEventAction {
    /// Argument bag describing the event a response line produces
    pub fn arguments_for(
        request_id: Uuid,
        line: &FundsResponseLine,
        batch_message_id: Option<Uuid>,
    ) -> Arguments {
        let mut arguments = Arguments::new();
        arguments.insert(keys::REQUEST_ID.to_string(), json!(request_id.to_string()));
        arguments.insert(keys::EVENT_TYPE.to_string(), json!(line.event_type()));
        arguments.insert(keys::OCCURRED_AT.to_string(), json!(line.timestamp.to_rfc3339()));
        if let Some(code) = &line.response_code {
            arguments.insert(keys::RESPONSE_CODE.to_string(), json!(code));
        }
        if let Some(code) = &line.trace_code {
            arguments.insert(keys::TRACE_CODE.to_string(), json!(code));
        }
        if let Some(id) = batch_message_id {
            arguments.insert(keys::BATCH_MESSAGE_ID.to_string(), json!(id.to_string()));
        }
        arguments
    }
}

#[async_trait]
impl<D> StateAction<D> for RecordTransferEventAction
where
    D: TransferRequestStore,
{
    fn name(&self) -> &str {
        RECORD_TRANSFER_EVENT
    }

    fn parameter_specifications(&self) -> Vec<ParameterSpecification> {
        vec![
            ParameterSpecification::required(keys::REQUEST_ID, ValueType::Uuid),
            ParameterSpecification::required(keys::EVENT_TYPE, ValueType::String),
            ParameterSpecification::optional(keys::RESPONSE_CODE, ValueType::String),
            ParameterSpecification::optional(keys::TRACE_CODE, ValueType::String),
            ParameterSpecification::optional(keys::OCCURRED_AT, ValueType::Timestamp)
                .with_default(|| Value::String(Utc::now().to_rfc3339())),
            ParameterSpecification::optional(keys::BATCH_MESSAGE_ID, ValueType::Uuid),
        ]
    }

    async fn execute(
        &self,
        ctx: &mut ActionContext<'_, D>,
        _object: &mut D::Object,
        transition: &mut FundsStateTransition,
        arguments: &Arguments,
    ) -> ActionResult<()> {
        let request_id = args::require_uuid(arguments, keys::REQUEST_ID)?;
        let event_type: FundsTransferEventType =
            args::require_deserialized(arguments, keys::EVENT_TYPE)?;
        let occurred_at = args::optional_timestamp(arguments, keys::OCCURRED_AT)?
            .unwrap_or_else(Utc::now);

        let event = FundsTransferEvent::new(request_id, event_type, occurred_at)
            .with_codes(
                args::optional_str(arguments, keys::RESPONSE_CODE)?,
                args::optional_str(arguments, keys::TRACE_CODE)?,
            )
            .with_transition(transition.transition().id)
            .in_batch(args::optional_uuid(arguments, keys::BATCH_MESSAGE_ID)?);

        let session = ctx.session();
        session.append_event(ctx.tx(), &event).await?;

        debug!(
            request_id = %request_id,
            event_type = %event_type,
            transition_id = %transition.transition().id,
            "Recorded transfer event with transition"
        );

        transition.funds_transfer_event = Some(event);
        Ok(())
    }

    fn description(&self) -> &'static str {
        "Append the funds transfer event produced by this transition"
    }
}

/// Register the actions the reconciliation engine relies on
pub fn register_funds_actions<D: TransferRequestStore>(registry: &mut ActionRegistry<D>) {
    registry.register(RecordTransferEventAction);
}
