//! # State Machine
//!
//! Graph-driven transition execution: path cache, argument validation,
//! access gating, the pre/post action pipeline and transactional
//! application of state and change-stamp mutations.

pub mod actions;
pub mod batch;
pub mod cache;
pub mod errors;
pub mod executor;
pub mod guards;
pub mod parameters;
pub mod persistence;
pub mod stateful;
pub mod transaction;

pub use actions::{ActionContext, ActionPhase, ActionPipeline, ActionRegistry, StateAction};
pub use batch::{BatchExecutor, ExecutionResult};
pub use cache::PathCache;
pub use errors::{
    ActionError, ActionResult, PersistenceError, PersistenceResult, StateMachineError,
    StateMachineResult,
};
pub use executor::{TransitionExecutor, TransitionRequest};
pub use guards::{AccessGate, AllowAllGate, Principal, RoleAccessGate};
pub use parameters::{
    Arguments, ParameterSpecification, ParameterValidator, ValidationErrors, ValueType,
};
pub use persistence::WorkflowSession;
pub use stateful::{StateTransition, Stateful, TransitionRecord};
pub use transaction::{Compensations, TransactionScope};
