//! # Funds Reconciliation
//!
//! Idempotent digestion of credit-system responses on top of the
//! transition executor.

pub mod actions;
pub mod errors;
pub mod policy;
pub mod reconciliation;
pub mod store;
pub mod types;

pub use actions::{register_funds_actions, RecordTransferEventAction, RECORD_TRANSFER_EVENT};
pub use errors::{DigestionError, DigestionResult, IntakeError, IntakeResult};
pub use policy::{policy_fn, DecisionContext, DigestionPolicy, PathSelection, StatusTransitionPolicy};
pub use reconciliation::ReconciliationEngine;
pub use store::TransferRequestStore;
pub use types::{
    BankingDetail, BatchMessage, CreditSystem, ExceptionPayload, FailurePhase, FundsResponseBatch,
    FundsResponseLine, FundsResponseResult, FundsResponseStatus, FundsStateTransition,
    FundsTransferEvent, FundsTransferEventType, FundsTransferRequest,
};
