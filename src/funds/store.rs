use async_trait::async_trait;
use uuid::Uuid;

use super::types::{
    BatchMessage, CreditSystem, FundsStateTransition, FundsTransferEvent, FundsTransferEventType,
    FundsTransferRequest,
};
use crate::state_machine::{PersistenceResult, WorkflowSession};

/// Persistence collaborator for transfer requests and their event trail
///
/// Reads see committed data only. Writes take the session transaction so
/// they commit or roll back together with any state change.
#[async_trait]
pub trait TransferRequestStore: WorkflowSession<Record = FundsStateTransition> {
    async fn find_credit_system(&self, code_name: &str) -> PersistenceResult<Option<CreditSystem>>;

    async fn collation_exists(
        &self,
        credit_system_id: i64,
        collation_id: &str,
    ) -> PersistenceResult<bool>;

    /// Resolve a request from the external identifiers of a response line
    async fn find_request(
        &self,
        credit_system_id: i64,
        transaction_id: &str,
        group_id: Option<&str>,
    ) -> PersistenceResult<Option<FundsTransferRequest>>;

    async fn load_object(&self, stateful_id: Uuid) -> PersistenceResult<Option<Self::Object>>;

    /// Look up an event by its idempotency key
    async fn find_event(
        &self,
        request_id: Uuid,
        event_type: FundsTransferEventType,
        response_code: Option<&str>,
    ) -> PersistenceResult<Option<FundsTransferEvent>>;

    /// All events of a request in recording order
    async fn events_for_request(&self, request_id: Uuid)
        -> PersistenceResult<Vec<FundsTransferEvent>>;

    async fn insert_request(
        &self,
        tx: &mut Self::Tx,
        request: &FundsTransferRequest,
    ) -> PersistenceResult<()>;

    async fn append_event(
        &self,
        tx: &mut Self::Tx,
        event: &FundsTransferEvent,
    ) -> PersistenceResult<()>;

    async fn insert_batch_message(
        &self,
        tx: &mut Self::Tx,
        message: &BatchMessage,
    ) -> PersistenceResult<()>;
}
