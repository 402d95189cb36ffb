//! # Funds Transfer Model
//!
//! Requests sent to an external credit system, the append-only event trail
//! recorded against them, and the response lines that come back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::errors::DigestionError;
use crate::state_machine::{StateTransition, TransitionRecord};

/// External system that executes transfers and reports back in batches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditSystem {
    pub id: i64,
    pub code_name: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankingDetail {
    pub account_holder: String,
    pub account_number: String,
    pub bank_code: String,
}

/// A payment instruction awaiting reconciliation
///
/// Never mutated once submitted; only events are appended against it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundsTransferRequest {
    pub id: Uuid,
    /// The stateful object this transfer belongs to
    pub stateful_id: Uuid,
    pub credit_system_id: i64,
    /// External transaction identifier echoed back in responses
    pub transaction_id: String,
    pub group_id: Option<String>,
    /// Amount in minor currency units
    pub amount: i64,
    pub banking_detail: BankingDetail,
    pub created_at: DateTime<Utc>,
}

impl FundsTransferRequest {
    pub fn new(
        stateful_id: Uuid,
        credit_system_id: i64,
        transaction_id: &str,
        amount: i64,
        banking_detail: BankingDetail,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            stateful_id,
            credit_system_id,
            transaction_id: transaction_id.to_string(),
            group_id: None,
            amount,
            banking_detail,
            created_at: Utc::now(),
        }
    }

    pub fn with_group(mut self, group_id: &str) -> Self {
        self.group_id = Some(group_id.to_string());
        self
    }

    /// Whether a response carrying these identifiers refers to this request
    pub fn matches(&self, transaction_id: &str, group_id: Option<&str>) -> bool {
        self.transaction_id == transaction_id
            && group_id.map_or(true, |group| self.group_id.as_deref() == Some(group))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FundsTransferEventType {
    Submitted,
    Pending,
    Succeeded,
    Rejected,
    Returned,
    /// Digestion failed before a path was selected
    Failed,
    /// Digestion failed after a path was selected
    WorkflowFailed,
}

impl FundsTransferEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Rejected => "rejected",
            Self::Returned => "returned",
            Self::Failed => "failed",
            Self::WorkflowFailed => "workflow_failed",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::WorkflowFailed)
    }
}

impl fmt::Display for FundsTransferEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status reported by the credit system for one line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FundsResponseStatus {
    Pending,
    Accepted,
    Rejected,
    Returned,
}

impl FundsResponseStatus {
    /// Event type recorded when a line with this status is digested
    pub fn event_type(&self) -> FundsTransferEventType {
        match self {
            Self::Pending => FundsTransferEventType::Pending,
            Self::Accepted => FundsTransferEventType::Succeeded,
            Self::Rejected => FundsTransferEventType::Rejected,
            Self::Returned => FundsTransferEventType::Returned,
        }
    }
}

impl fmt::Display for FundsResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Returned => "returned",
        };
        write!(f, "{name}")
    }
}

/// Stage of digestion at which an error surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePhase {
    /// Before any path was selected
    Decision,
    /// While or after executing the selected path
    Workflow,
}

impl FailurePhase {
    pub fn event_type(&self) -> FundsTransferEventType {
        match self {
            Self::Decision => FundsTransferEventType::Failed,
            Self::Workflow => FundsTransferEventType::WorkflowFailed,
        }
    }
}

/// Error details persisted with a failure event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionPayload {
    pub code: String,
    pub message: String,
    pub phase: FailurePhase,
}

impl ExceptionPayload {
    pub fn from_error(error: &DigestionError, phase: FailurePhase) -> Self {
        Self {
            code: error.code().to_string(),
            message: error.to_string(),
            phase,
        }
    }
}

/// Append-only audit entry against a transfer request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundsTransferEvent {
    pub id: Uuid,
    pub request_id: Uuid,
    pub event_type: FundsTransferEventType,
    /// When the credit system says it happened
    pub occurred_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
    pub response_code: Option<String>,
    pub trace_code: Option<String>,
    pub exception: Option<ExceptionPayload>,
    pub state_transition_id: Option<Uuid>,
    pub batch_message_id: Option<Uuid>,
}

impl FundsTransferEvent {
    pub fn new(
        request_id: Uuid,
        event_type: FundsTransferEventType,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            request_id,
            event_type,
            occurred_at,
            recorded_at: Utc::now(),
            response_code: None,
            trace_code: None,
            exception: None,
            state_transition_id: None,
            batch_message_id: None,
        }
    }

    pub fn with_codes(mut self, response_code: Option<&str>, trace_code: Option<&str>) -> Self {
        self.response_code = response_code.map(str::to_string);
        self.trace_code = trace_code.map(str::to_string);
        self
    }

    pub fn with_exception(mut self, exception: ExceptionPayload) -> Self {
        self.exception = Some(exception);
        self
    }

    pub fn with_transition(mut self, state_transition_id: Uuid) -> Self {
        self.state_transition_id = Some(state_transition_id);
        self
    }

    pub fn in_batch(mut self, batch_message_id: Option<Uuid>) -> Self {
        self.batch_message_id = batch_message_id;
        self
    }

    /// Idempotency key: same request, event type and response code
    pub fn matches_key(
        &self,
        request_id: Uuid,
        event_type: FundsTransferEventType,
        response_code: Option<&str>,
    ) -> bool {
        self.request_id == request_id
            && self.event_type == event_type
            && self.response_code.as_deref() == response_code
    }
}

/// One entry of an inbound response batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundsResponseLine {
    pub line_id: String,
    pub transaction_id: String,
    pub group_id: Option<String>,
    pub status: FundsResponseStatus,
    pub response_code: Option<String>,
    pub trace_code: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl FundsResponseLine {
    pub fn new(line_id: &str, transaction_id: &str, status: FundsResponseStatus) -> Self {
        Self {
            line_id: line_id.to_string(),
            transaction_id: transaction_id.to_string(),
            group_id: None,
            status,
            response_code: None,
            trace_code: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_response_code(mut self, response_code: &str) -> Self {
        self.response_code = Some(response_code.to_string());
        self
    }

    pub fn with_trace_code(mut self, trace_code: &str) -> Self {
        self.trace_code = Some(trace_code.to_string());
        self
    }

    pub fn with_group(mut self, group_id: &str) -> Self {
        self.group_id = Some(group_id.to_string());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn event_type(&self) -> FundsTransferEventType {
        self.status.event_type()
    }
}

/// An inbound response file as handed over by the intake layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundsResponseBatch {
    pub credit_system_code: String,
    /// Unique per credit system; a repeated id is a redelivery
    pub collation_id: String,
    pub lines: Vec<FundsResponseLine>,
}

/// Audit container grouping every event produced while digesting one batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchMessage {
    pub id: Uuid,
    pub credit_system_id: i64,
    pub collation_id: String,
    pub received_at: DateTime<Utc>,
    pub line_count: usize,
}

impl BatchMessage {
    pub fn new(credit_system_id: i64, collation_id: &str, line_count: usize) -> Self {
        Self {
            id: Uuid::now_v7(),
            credit_system_id,
            collation_id: collation_id.to_string(),
            received_at: Utc::now(),
            line_count,
        }
    }
}

/// Transition record correlating a state change with the event it produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundsStateTransition {
    pub transition: StateTransition,
    pub funds_transfer_event: Option<FundsTransferEvent>,
}

impl TransitionRecord for FundsStateTransition {
    const RECORD_TYPE: &'static str = "funds_state_transition";

    fn open(transition: StateTransition) -> Self {
        Self {
            transition,
            funds_transfer_event: None,
        }
    }

    fn transition(&self) -> &StateTransition {
        &self.transition
    }

    fn transition_mut(&mut self) -> &mut StateTransition {
        &mut self.transition
    }
}

/// Outcome of digesting one response line; never persisted
#[derive(Debug)]
pub struct FundsResponseResult<S> {
    pub line: FundsResponseLine,
    pub request_id: Option<Uuid>,
    pub stateful_object: Option<S>,
    pub transition: Option<FundsStateTransition>,
    pub event: Option<FundsTransferEvent>,
    pub is_already_digested: bool,
    pub error: Option<DigestionError>,
}

impl<S> FundsResponseResult<S> {
    pub(crate) fn for_line(line: FundsResponseLine) -> Self {
        Self {
            line,
            request_id: None,
            stateful_object: None,
            transition: None,
            event: None,
            is_already_digested: false,
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
