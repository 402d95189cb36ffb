//! # Transaction Scope
//!
//! Wraps a session transaction together with deferred compensating closures.
//! Commit hooks run in registration order once the commit succeeded; rollback
//! hooks run in reverse registration order after a rollback or a failed
//! commit.

use futures::future::BoxFuture;
use std::future::Future;
use tracing::{debug, warn};

use super::errors::PersistenceResult;
use super::persistence::WorkflowSession;

type Hook = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Deferred closures registered while a transaction is open
#[derive(Default)]
pub struct Compensations {
    on_commit: Vec<Hook>,
    on_rollback: Vec<Hook>,
}

impl Compensations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_commit<F, Fut>(&mut self, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_commit.push(Box::new(move || Box::pin(hook())));
    }

    pub fn on_rollback<F, Fut>(&mut self, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_rollback.push(Box::new(move || Box::pin(hook())));
    }

    pub fn len(&self) -> usize {
        self.on_commit.len() + self.on_rollback.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn run_commit_hooks(self) {
        for hook in self.on_commit {
            hook().await;
        }
    }

    async fn run_rollback_hooks(self) {
        for hook in self.on_rollback.into_iter().rev() {
            hook().await;
        }
    }
}

/// An open transaction that must end in exactly one of commit or rollback
pub struct TransactionScope<'a, D: WorkflowSession> {
    session: &'a D,
    tx: D::Tx,
    compensations: Compensations,
}

impl<'a, D: WorkflowSession> TransactionScope<'a, D> {
    pub async fn begin(session: &'a D) -> PersistenceResult<Self> {
        let tx = session.begin().await?;
        Ok(Self {
            session,
            tx,
            compensations: Compensations::new(),
        })
    }

    pub fn session(&self) -> &'a D {
        self.session
    }

    /// Split borrow of the transaction handle and the hook lists
    pub fn parts_mut(&mut self) -> (&mut D::Tx, &mut Compensations) {
        (&mut self.tx, &mut self.compensations)
    }

    pub async fn commit(self) -> PersistenceResult<()> {
        let Self {
            session,
            tx,
            compensations,
        } = self;

        match session.commit(tx).await {
            Ok(()) => {
                debug!(hooks = compensations.on_commit.len(), "Transaction committed");
                compensations.run_commit_hooks().await;
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "Commit failed, running rollback compensations");
                compensations.run_rollback_hooks().await;
                Err(err)
            }
        }
    }

    pub async fn rollback(self) -> PersistenceResult<()> {
        let Self {
            session,
            tx,
            compensations,
        } = self;

        let result = session.rollback(tx).await;
        if let Err(err) = &result {
            warn!(error = %err, "Rollback failed");
        }
        debug!(hooks = compensations.on_rollback.len(), "Transaction rolled back");
        compensations.run_rollback_hooks().await;
        result
    }
}
