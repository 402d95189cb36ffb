//! # In-Memory Persistence
//!
//! `MemoryGraph` serves graph configuration from memory and counts loads per
//! key. `MemorySession` is a unit-of-work store: writes are staged on the
//! transaction handle and applied to the committed state atomically on
//! commit. A commit whose transition was based on an older state or change
//! stamp than the stored object fails with `ConcurrentModification`.
//!
//! Both are used by the test suite and by embedders that keep configuration
//! and state in process.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::funds::{
    BatchMessage, CreditSystem, FundsStateTransition, FundsTransferEvent, FundsTransferEventType,
    FundsTransferRequest, TransferRequestStore,
};
use crate::graph::{
    EntityState, GraphDefinition, GraphSource, NodeKey, PathId, State, StateId, StatePath,
    WorkflowGraph,
};
use crate::state_machine::errors::backend_error;
use crate::state_machine::{
    PersistenceError, PersistenceResult, Stateful, TransitionRecord, WorkflowSession,
};

/// Graph configuration held in memory
#[derive(Debug, Default)]
pub struct MemoryGraph {
    paths: DashMap<PathId, StatePath>,
    states: DashMap<StateId, State>,
    path_loads: DashMap<NodeKey, usize>,
    state_loads: DashMap<NodeKey, usize>,
    latency: Option<Duration>,
    graph_code_name: Option<String>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_definition(definition: &GraphDefinition) -> Self {
        let graph = Self::new();
        graph.install(definition);
        graph
    }

    /// Delay every load, widening the window for concurrent lookups
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Restrict code-name lookups to one graph
    ///
    /// Unscoped, a code name shared by several graphs resolves to the node
    /// with the lowest id.
    pub fn scoped_to(mut self, graph_code_name: &str) -> Self {
        self.graph_code_name = Some(graph_code_name.to_string());
        self
    }

    pub fn install(&self, definition: &GraphDefinition) {
        for state in &definition.states {
            self.states.insert(state.id, state.clone());
        }
        for path in &definition.paths {
            self.paths.insert(path.id, path.clone());
        }
        debug!(
            graph = %definition.graph.code_name,
            states = definition.states.len(),
            paths = definition.paths.len(),
            "Installed graph definition"
        );
    }

    /// Replace the persisted definition of a path
    pub fn update_path(&self, path: StatePath) {
        self.paths.insert(path.id, path);
    }

    pub fn remove_path(&self, id: PathId) -> Option<StatePath> {
        self.paths.remove(&id).map(|(_, path)| path)
    }

    /// Number of times `key` was loaded as a path
    pub fn path_load_count(&self, key: &NodeKey) -> usize {
        self.path_loads.get(key).map(|count| *count).unwrap_or(0)
    }

    pub fn total_path_loads(&self) -> usize {
        self.path_loads.iter().map(|entry| *entry.value()).sum()
    }

    pub fn state_load_count(&self, key: &NodeKey) -> usize {
        self.state_loads.get(key).map(|count| *count).unwrap_or(0)
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn in_scope(&self, graph: &WorkflowGraph) -> bool {
        self.graph_code_name
            .as_deref()
            .map_or(true, |scope| graph.code_name == scope)
    }

    fn find_path(&self, key: &NodeKey) -> Option<StatePath> {
        match key {
            NodeKey::Id(id) => self.paths.get(id).map(|path| path.clone()),
            NodeKey::CodeName(_) => self
                .paths
                .iter()
                .filter(|entry| {
                    key.matches(entry.id, &entry.code_name) && self.in_scope(&entry.graph)
                })
                .min_by_key(|entry| entry.id)
                .map(|entry| entry.value().clone()),
        }
    }

    fn find_state(&self, key: &NodeKey) -> Option<State> {
        match key {
            NodeKey::Id(id) => self.states.get(id).map(|state| state.clone()),
            NodeKey::CodeName(_) => self
                .states
                .iter()
                .filter(|entry| {
                    key.matches(entry.id, &entry.code_name) && self.in_scope(&entry.graph)
                })
                .min_by_key(|entry| entry.id)
                .map(|entry| entry.value().clone()),
        }
    }
}

#[async_trait]
impl GraphSource for MemoryGraph {
    async fn load_path(&self, key: &NodeKey) -> PersistenceResult<Option<StatePath>> {
        *self.path_loads.entry(key.clone()).or_insert(0) += 1;
        self.simulate_latency().await;
        Ok(self.find_path(key))
    }

    async fn load_state(&self, key: &NodeKey) -> PersistenceResult<Option<State>> {
        *self.state_loads.entry(key.clone()).or_insert(0) += 1;
        self.simulate_latency().await;
        Ok(self.find_state(key))
    }

    async fn path_entity_state(&self, path: &StatePath) -> PersistenceResult<EntityState> {
        if path.id == 0 {
            return Ok(EntityState::Added);
        }

        let state = match self.paths.get(&path.id) {
            None => EntityState::Deleted,
            Some(persisted) if *persisted == *path => EntityState::Unchanged,
            Some(_) => EntityState::Modified,
        };
        Ok(state)
    }
}

/// Writes staged by one open transaction
#[derive(Debug)]
pub struct MemoryTx<S, R> {
    objects: Vec<S>,
    /// `(state_id, change_stamp)` each transitioned object was read at
    expected_versions: HashMap<Uuid, (StateId, i64)>,
    transitions: Vec<R>,
    requests: Vec<FundsTransferRequest>,
    events: Vec<FundsTransferEvent>,
    batch_messages: Vec<BatchMessage>,
}

impl<S, R> Default for MemoryTx<S, R> {
    fn default() -> Self {
        Self {
            objects: Vec::new(),
            expected_versions: HashMap::new(),
            transitions: Vec::new(),
            requests: Vec::new(),
            events: Vec::new(),
            batch_messages: Vec::new(),
        }
    }
}

impl<S, R> MemoryTx<S, R> {
    pub fn staged_writes(&self) -> usize {
        self.objects.len()
            + self.transitions.len()
            + self.requests.len()
            + self.events.len()
            + self.batch_messages.len()
    }
}

#[derive(Debug)]
struct Committed<S, R> {
    objects: HashMap<Uuid, S>,
    /// Every value each object was ever committed with, oldest first
    history: HashMap<Uuid, Vec<S>>,
    transitions: Vec<R>,
    credit_systems: Vec<CreditSystem>,
    requests: Vec<FundsTransferRequest>,
    events: Vec<FundsTransferEvent>,
    batch_messages: Vec<BatchMessage>,
}

impl<S, R> Default for Committed<S, R> {
    fn default() -> Self {
        Self {
            objects: HashMap::new(),
            history: HashMap::new(),
            transitions: Vec::new(),
            credit_systems: Vec::new(),
            requests: Vec::new(),
            events: Vec::new(),
            batch_messages: Vec::new(),
        }
    }
}

impl<S: Stateful, R> Committed<S, R> {
    fn store(&mut self, object: S) {
        let id = object.stateful_id();
        self.history.entry(id).or_default().push(object.clone());
        self.objects.insert(id, object);
    }
}

/// Unit-of-work store for stateful objects, transitions and the funds trail
#[derive(Debug)]
pub struct MemorySession<S, R> {
    committed: Mutex<Committed<S, R>>,
    fail_next_commit: AtomicBool,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    next_credit_system_id: AtomicI64,
}

impl<S, R> Default for MemorySession<S, R> {
    fn default() -> Self {
        Self {
            committed: Mutex::new(Committed::default()),
            fail_next_commit: AtomicBool::new(false),
            commits: AtomicUsize::new(0),
            rollbacks: AtomicUsize::new(0),
            next_credit_system_id: AtomicI64::new(1),
        }
    }
}

impl<S, R> MemorySession<S, R>
where
    S: Stateful,
    R: TransitionRecord,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `object` as committed, bypassing transactions
    pub fn seed_object(&self, object: S) {
        self.committed.lock().store(object);
    }

    pub fn add_credit_system(&self, code_name: &str, name: &str) -> CreditSystem {
        let credit_system = CreditSystem {
            id: self.next_credit_system_id.fetch_add(1, Ordering::SeqCst),
            code_name: code_name.to_string(),
            name: name.to_string(),
        };
        self.committed
            .lock()
            .credit_systems
            .push(credit_system.clone());
        credit_system
    }

    /// Make the next commit fail after the transaction was handed over
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    pub fn object(&self, id: Uuid) -> Option<S> {
        self.committed.lock().objects.get(&id).cloned()
    }

    pub fn transitions(&self) -> Vec<R> {
        self.committed.lock().transitions.clone()
    }

    pub fn requests(&self) -> Vec<FundsTransferRequest> {
        self.committed.lock().requests.clone()
    }

    pub fn events(&self) -> Vec<FundsTransferEvent> {
        self.committed.lock().events.clone()
    }

    pub fn batch_messages(&self) -> Vec<BatchMessage> {
        self.committed.lock().batch_messages.clone()
    }

    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn rollback_count(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }

    fn check_constraints(committed: &Committed<S, R>, tx: &MemoryTx<S, R>) -> PersistenceResult<()> {
        for (id, (state_id, change_stamp)) in &tx.expected_versions {
            if let Some(stored) = committed.objects.get(id) {
                if stored.state_id() != *state_id || stored.change_stamp() != *change_stamp {
                    return Err(PersistenceError::ConcurrentModification {
                        entity: "stateful object",
                        id: id.to_string(),
                    });
                }
            }
        }

        for message in &tx.batch_messages {
            let duplicate = committed.batch_messages.iter().any(|existing| {
                existing.credit_system_id == message.credit_system_id
                    && existing.collation_id == message.collation_id
            });
            if duplicate {
                return Err(PersistenceError::ConstraintViolation {
                    constraint: "batch_messages_collation_unique".to_string(),
                });
            }
        }

        for request in &tx.requests {
            let duplicate = committed.requests.iter().any(|existing| {
                existing.credit_system_id == request.credit_system_id
                    && existing.transaction_id == request.transaction_id
            });
            if duplicate {
                return Err(PersistenceError::ConstraintViolation {
                    constraint: "funds_transfer_requests_transaction_unique".to_string(),
                });
            }
        }

        Ok(())
    }
}

#[async_trait]
impl<S, R> WorkflowSession for MemorySession<S, R>
where
    S: Stateful + PartialEq,
    R: TransitionRecord,
{
    type Object = S;
    type Record = R;
    type Tx = MemoryTx<S, R>;

    async fn begin(&self) -> PersistenceResult<Self::Tx> {
        Ok(MemoryTx::default())
    }

    async fn commit(&self, tx: Self::Tx) -> PersistenceResult<()> {
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            self.rollbacks.fetch_add(1, Ordering::SeqCst);
            return Err(backend_error("commit failed"));
        }

        let mut committed = self.committed.lock();
        if let Err(err) = Self::check_constraints(&committed, &tx) {
            self.rollbacks.fetch_add(1, Ordering::SeqCst);
            return Err(err);
        }

        let writes = tx.staged_writes();
        let MemoryTx {
            objects,
            expected_versions: _,
            transitions,
            requests,
            events,
            batch_messages,
        } = tx;

        for object in objects {
            committed.store(object);
        }
        committed.transitions.extend(transitions);
        committed.requests.extend(requests);
        committed.events.extend(events);
        committed.batch_messages.extend(batch_messages);

        self.commits.fetch_add(1, Ordering::SeqCst);
        debug!(writes = writes, "Memory transaction committed");
        Ok(())
    }

    async fn rollback(&self, tx: Self::Tx) -> PersistenceResult<()> {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        debug!(discarded = tx.staged_writes(), "Memory transaction rolled back");
        Ok(())
    }

    async fn save_object(&self, tx: &mut Self::Tx, object: &S) -> PersistenceResult<()> {
        tx.objects.push(object.clone());
        Ok(())
    }

    async fn insert_transition(&self, tx: &mut Self::Tx, record: &R) -> PersistenceResult<()> {
        let transition = record.transition();
        tx.expected_versions
            .entry(transition.stateful_id)
            .or_insert((transition.previous_state_id, transition.change_stamp_before));
        tx.transitions.push(record.clone());
        Ok(())
    }

    /// An object equal to any value it was committed with is an untouched
    /// copy of that version and reports `Unchanged`, so the executor reloads
    /// it before checking its state.
    async fn object_entity_state(&self, object: &S) -> PersistenceResult<EntityState> {
        let committed = self.committed.lock();
        let id = object.stateful_id();
        let state = match committed.objects.get(&id) {
            None => EntityState::Detached,
            Some(stored) if stored == object => EntityState::Unchanged,
            Some(_) => {
                let known_version = committed
                    .history
                    .get(&id)
                    .is_some_and(|versions| versions.contains(object));
                if known_version {
                    EntityState::Unchanged
                } else {
                    EntityState::Modified
                }
            }
        };
        Ok(state)
    }

    async fn reload(&self, object: &mut S) -> PersistenceResult<()> {
        let stored = self
            .committed
            .lock()
            .objects
            .get(&object.stateful_id())
            .cloned();

        match stored {
            Some(stored) => {
                *object = stored;
                Ok(())
            }
            None => Err(PersistenceError::NotFound {
                entity: "stateful object",
                id: object.stateful_id().to_string(),
            }),
        }
    }
}

#[async_trait]
impl<S> TransferRequestStore for MemorySession<S, FundsStateTransition>
where
    S: Stateful + PartialEq,
{
    async fn find_credit_system(&self, code_name: &str) -> PersistenceResult<Option<CreditSystem>> {
        Ok(self
            .committed
            .lock()
            .credit_systems
            .iter()
            .find(|cs| cs.code_name == code_name)
            .cloned())
    }

    async fn collation_exists(
        &self,
        credit_system_id: i64,
        collation_id: &str,
    ) -> PersistenceResult<bool> {
        Ok(self
            .committed
            .lock()
            .batch_messages
            .iter()
            .any(|m| m.credit_system_id == credit_system_id && m.collation_id == collation_id))
    }

    async fn find_request(
        &self,
        credit_system_id: i64,
        transaction_id: &str,
        group_id: Option<&str>,
    ) -> PersistenceResult<Option<FundsTransferRequest>> {
        Ok(self
            .committed
            .lock()
            .requests
            .iter()
            .find(|r| r.credit_system_id == credit_system_id && r.matches(transaction_id, group_id))
            .cloned())
    }

    async fn load_object(&self, stateful_id: Uuid) -> PersistenceResult<Option<S>> {
        Ok(self.object(stateful_id))
    }

    async fn find_event(
        &self,
        request_id: Uuid,
        event_type: FundsTransferEventType,
        response_code: Option<&str>,
    ) -> PersistenceResult<Option<FundsTransferEvent>> {
        Ok(self
            .committed
            .lock()
            .events
            .iter()
            .find(|e| e.matches_key(request_id, event_type, response_code))
            .cloned())
    }

    async fn events_for_request(
        &self,
        request_id: Uuid,
    ) -> PersistenceResult<Vec<FundsTransferEvent>> {
        Ok(self
            .committed
            .lock()
            .events
            .iter()
            .filter(|e| e.request_id == request_id)
            .cloned()
            .collect())
    }

    async fn insert_request(
        &self,
        tx: &mut Self::Tx,
        request: &FundsTransferRequest,
    ) -> PersistenceResult<()> {
        tx.requests.push(request.clone());
        Ok(())
    }

    async fn append_event(
        &self,
        tx: &mut Self::Tx,
        event: &FundsTransferEvent,
    ) -> PersistenceResult<()> {
        tx.events.push(event.clone());
        Ok(())
    }

    async fn insert_batch_message(
        &self,
        tx: &mut Self::Tx,
        message: &BatchMessage,
    ) -> PersistenceResult<()> {
        tx.batch_messages.push(message.clone());
        Ok(())
    }
}
