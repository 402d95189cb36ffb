use async_trait::async_trait;

use super::errors::PersistenceResult;
use super::stateful::{Stateful, TransitionRecord};
use crate::graph::EntityState;

/// Persistence collaborator for one domain of stateful objects
///
/// A session owns the unit of work: every write goes through a transaction
/// handle obtained from [`WorkflowSession::begin`] and becomes durable only
/// when that handle is committed.
#[async_trait]
pub trait WorkflowSession: Send + Sync + 'static {
    type Object: Stateful;
    type Record: TransitionRecord;
    type Tx: Send;

    async fn begin(&self) -> PersistenceResult<Self::Tx>;

    async fn commit(&self, tx: Self::Tx) -> PersistenceResult<()>;

    async fn rollback(&self, tx: Self::Tx) -> PersistenceResult<()>;

    /// Stage the current values of `object`
    async fn save_object(&self, tx: &mut Self::Tx, object: &Self::Object)
        -> PersistenceResult<()>;

    /// Stage a new transition record
    async fn insert_transition(
        &self,
        tx: &mut Self::Tx,
        record: &Self::Record,
    ) -> PersistenceResult<()>;

    /// Tracking state of `object` relative to committed storage
    async fn object_entity_state(&self, object: &Self::Object) -> PersistenceResult<EntityState>;

    /// Replace `object` with its latest committed values
    async fn reload(&self, object: &mut Self::Object) -> PersistenceResult<()>;
}
