//! Shared domain fixtures: a `Payment` stateful object, its workflow graph,
//! a handful of test actions and builders wiring them into engines.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use statepath::config::{PathCacheConfig, ReconciliationConfig};
use statepath::funds::{
    register_funds_actions, BankingDetail, DigestionPolicy, FundsStateTransition,
    FundsTransferRequest, ReconciliationEngine,
};
use statepath::graph::{GraphBuilder, GraphDefinition, PathDefinition, StateId};
use statepath::persistence::{MemoryGraph, MemorySession};
use statepath::state_machine::errors::{invalid_argument, rejected};
use statepath::state_machine::parameters::args;
use statepath::state_machine::{
    AccessGate, ActionContext, ActionRegistry, ActionResult, AllowAllGate, Arguments,
    ParameterSpecification, Principal, StateAction, StateTransition, Stateful, TransitionExecutor,
    TransitionRecord, ValueType, WorkflowSession,
};

pub const PAYMENTS: &str = "payments";

#[derive(Debug, Clone, PartialEq)]
pub struct Payment {
    pub id: Uuid,
    pub state_id: StateId,
    pub change_stamp: i64,
    pub amount: i64,
    pub notes: Vec<String>,
}

impl Payment {
    pub fn new(state_id: StateId, amount: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            state_id,
            change_stamp: 0,
            amount,
            notes: Vec::new(),
        }
    }

    pub fn with_stamp(mut self, change_stamp: i64) -> Self {
        self.change_stamp = change_stamp;
        self
    }
}

impl Stateful for Payment {
    fn stateful_id(&self) -> Uuid {
        self.id
    }

    fn state_id(&self) -> StateId {
        self.state_id
    }

    fn set_state_id(&mut self, state_id: StateId) {
        self.state_id = state_id;
    }

    fn change_stamp(&self) -> i64 {
        self.change_stamp
    }

    fn set_change_stamp(&mut self, change_stamp: i64) {
        self.change_stamp = change_stamp;
    }
}

/// pending -> approved -> settled, with rejection from pending
///
/// - `approve`: masks 0xFF / 0x01, post `audit`
/// - `settle`: sets bit 0x02, pre `check_amount`, post `audit`
/// - `reject`: no actions, crosses into the final group
/// - `confirm`: pending -> approved with post `track_hooks`
/// - `explode`: pending -> rejected with post `track_hooks`, `explode`
pub fn payment_graph(record_type: &str) -> GraphDefinition {
    GraphBuilder::new(PAYMENTS, record_type)
        .named("Payments")
        .group("interim")
        .group("final")
        .state("pending", Some("interim"))
        .state("approved", Some("interim"))
        .state("settled", Some("final"))
        .state("rejected", Some("final"))
        .path(
            PathDefinition::new("approve", "pending", "approved")
                .masks(0xFF, 0x01)
                .post_action("audit"),
        )
        .path(
            PathDefinition::new("settle", "approved", "settled")
                .masks(-1, 0x02)
                .pre_action("check_amount")
                .post_action("audit"),
        )
        .path(PathDefinition::new("reject", "pending", "rejected"))
        .path(PathDefinition::new("confirm", "pending", "approved").post_action("track_hooks"))
        .path(
            PathDefinition::new("explode", "pending", "rejected")
                .post_action("track_hooks")
                .post_action("explode"),
        )
        .build(1)
        .expect("payment graph is well formed")
}

pub fn state_id(definition: &GraphDefinition, code_name: &str) -> StateId {
    definition
        .state(code_name)
        .map(|state| state.id)
        .unwrap_or_else(|| panic!("unknown state {code_name}"))
}

pub fn clerk() -> Principal {
    Principal::new(1, "clerk")
}

/// Appends `audit:<path>` to the payment's notes
pub struct AuditAction;

#[async_trait]
impl<D> StateAction<D> for AuditAction
where
    D: WorkflowSession<Object = Payment>,
{
    fn name(&self) -> &str {
        "audit"
    }

    async fn execute(
        &self,
        ctx: &mut ActionContext<'_, D>,
        object: &mut Payment,
        _transition: &mut D::Record,
        _args: &Arguments,
    ) -> ActionResult<()> {
        object.notes.push(format!("audit:{}", ctx.path().code_name));
        Ok(())
    }

    fn description(&self) -> &'static str {
        "Note the executed path on the payment"
    }
}

/// Requires an `approver` and rejects payments above `limit`
pub struct CheckAmountAction;

#[async_trait]
impl<D> StateAction<D> for CheckAmountAction
where
    D: WorkflowSession<Object = Payment>,
{
    fn name(&self) -> &str {
        "check_amount"
    }

    fn parameter_specifications(&self) -> Vec<ParameterSpecification> {
        vec![
            ParameterSpecification::required("approver", ValueType::String),
            ParameterSpecification::optional("limit", ValueType::Integer)
                .with_default(|| json!(1_000)),
        ]
    }

    async fn execute(
        &self,
        _ctx: &mut ActionContext<'_, D>,
        object: &mut Payment,
        _transition: &mut D::Record,
        args: &Arguments,
    ) -> ActionResult<()> {
        let approver = args::require_str(args, "approver")?;
        let limit = args::require(args, "limit")?
            .as_i64()
            .ok_or_else(|| invalid_argument("limit", "not an integer"))?;

        if object.amount > limit {
            return Err(rejected(format!(
                "amount {} exceeds limit {limit}",
                object.amount
            )));
        }
        object.notes.push(format!("checked_by:{approver}"));
        Ok(())
    }

    fn description(&self) -> &'static str {
        "Reject payments over the approval limit"
    }
}

/// Mutates the payment, then fails
pub struct ExplodeAction;

#[async_trait]
impl<D> StateAction<D> for ExplodeAction
where
    D: WorkflowSession<Object = Payment>,
{
    fn name(&self) -> &str {
        "explode"
    }

    async fn execute(
        &self,
        _ctx: &mut ActionContext<'_, D>,
        object: &mut Payment,
        _transition: &mut D::Record,
        _args: &Arguments,
    ) -> ActionResult<()> {
        object.amount = 0;
        object.notes.push("exploded".to_string());
        Err(rejected("boom"))
    }

    fn description(&self) -> &'static str {
        "Always fails after touching the payment"
    }
}

pub type HookLog = Arc<Mutex<Vec<String>>>;

/// Registers commit and rollback hooks writing to a shared log
pub struct HookTrackingAction {
    pub log: HookLog,
}

#[async_trait]
impl<D> StateAction<D> for HookTrackingAction
where
    D: WorkflowSession<Object = Payment>,
{
    fn name(&self) -> &str {
        "track_hooks"
    }

    async fn execute(
        &self,
        ctx: &mut ActionContext<'_, D>,
        object: &mut Payment,
        _transition: &mut D::Record,
        _args: &Arguments,
    ) -> ActionResult<()> {
        let id = object.id;
        let log = self.log.clone();
        ctx.on_commit(move || async move { log.lock().push(format!("commit:{id}")) });
        let log = self.log.clone();
        ctx.on_rollback(move || async move { log.lock().push(format!("rollback:{id}")) });
        Ok(())
    }

    fn description(&self) -> &'static str {
        "Record transaction outcome hooks"
    }
}

pub fn payment_registry<D>(log: &HookLog) -> ActionRegistry<D>
where
    D: WorkflowSession<Object = Payment>,
{
    let mut registry = ActionRegistry::new();
    registry
        .register(AuditAction)
        .register(CheckAmountAction)
        .register(ExplodeAction)
        .register(HookTrackingAction { log: log.clone() });
    registry
}

/// A payment engine over in-memory collaborators
pub struct Harness<R: TransitionRecord> {
    pub definition: GraphDefinition,
    pub graph: Arc<MemoryGraph>,
    pub session: Arc<MemorySession<Payment, R>>,
    pub executor: Arc<TransitionExecutor<MemorySession<Payment, R>>>,
    pub hooks: HookLog,
}

impl<R: TransitionRecord> Harness<R> {
    pub fn state(&self, code_name: &str) -> StateId {
        state_id(&self.definition, code_name)
    }

    /// A payment committed in `state`
    pub fn seeded_payment(&self, state: &str, amount: i64) -> Payment {
        let payment = Payment::new(self.state(state), amount);
        self.session.seed_object(payment.clone());
        payment
    }

    pub fn hook_log(&self) -> Vec<String> {
        self.hooks.lock().clone()
    }
}

fn harness_with<R: TransitionRecord>(
    registry: ActionRegistry<MemorySession<Payment, R>>,
    hooks: HookLog,
    gate: Arc<dyn AccessGate<Payment>>,
) -> Harness<R> {
    let definition = payment_graph(R::RECORD_TYPE);
    let graph = Arc::new(MemoryGraph::from_definition(&definition));
    let session = Arc::new(MemorySession::new());
    let executor = Arc::new(TransitionExecutor::new(
        session.clone(),
        graph.clone(),
        Arc::new(registry),
        gate,
        &PathCacheConfig::default(),
    ));

    Harness {
        definition,
        graph,
        session,
        executor,
        hooks,
    }
}

pub fn payment_harness() -> Harness<StateTransition> {
    payment_harness_with_gate(Arc::new(AllowAllGate))
}

pub fn payment_harness_with_gate(gate: Arc<dyn AccessGate<Payment>>) -> Harness<StateTransition> {
    let hooks = HookLog::default();
    harness_with(payment_registry(&hooks), hooks, gate)
}

pub type PayoutSession = MemorySession<Payment, FundsStateTransition>;

/// Reconciliation engine plus the harness it runs on
pub struct PayoutHarness {
    pub inner: Harness<FundsStateTransition>,
    pub engine: ReconciliationEngine<PayoutSession>,
    pub credit_system_id: i64,
}

pub const BANK: &str = "acme_bank";

impl PayoutHarness {
    pub fn session(&self) -> &Arc<PayoutSession> {
        &self.inner.session
    }

    /// Submit a pending payout for `transaction_id`
    pub async fn submit(&self, transaction_id: &str, amount: i64) -> (Payment, FundsTransferRequest) {
        let payment = self.inner.seeded_payment("pending", amount);
        let request = FundsTransferRequest::new(
            payment.id,
            self.credit_system_id,
            transaction_id,
            amount,
            banking_detail(),
        );
        self.engine
            .submit_request(request.clone())
            .await
            .expect("submission succeeds");
        (payment, request)
    }
}

pub fn banking_detail() -> BankingDetail {
    BankingDetail {
        account_holder: "Jordan Reyes".to_string(),
        account_number: "000123456".to_string(),
        bank_code: "021000021".to_string(),
    }
}

pub fn payout_harness(policy: Arc<dyn DigestionPolicy<Payment>>) -> PayoutHarness {
    payout_harness_with_config(policy, ReconciliationConfig::default())
}

pub fn payout_harness_with_config(
    policy: Arc<dyn DigestionPolicy<Payment>>,
    config: ReconciliationConfig,
) -> PayoutHarness {
    let hooks = HookLog::default();
    let mut registry = payment_registry(&hooks);
    register_funds_actions(&mut registry);

    let inner = harness_with(registry, hooks, Arc::new(AllowAllGate));
    let credit_system = inner.session.add_credit_system(BANK, "Acme Bank");
    let engine = ReconciliationEngine::new(inner.executor.clone(), policy, config)
        .expect("transfer event action is registered");

    PayoutHarness {
        inner,
        engine,
        credit_system_id: credit_system.id,
    }
}
