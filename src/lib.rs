#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # StatePath Core
//!
//! Graph-driven workflow engine for stateful business objects, with
//! idempotent reconciliation of funds-transfer responses on top.
//!
//! ## Overview
//!
//! Workflows are data, not code. A [`graph::WorkflowGraph`] declares states
//! and the directed [`graph::StatePath`]s between them; each path carries
//! change-stamp masks and named pre- and post-actions. The
//! [`state_machine::TransitionExecutor`] moves an object along a path
//! atomically: the state change, its mask-updated change stamp, the
//! transition record and every write the actions make either all commit or
//! none do.
//!
//! ## Module Organization
//!
//! - [`graph`] - Graph configuration model, builder and source trait
//! - [`state_machine`] - Path cache, validation, access gates, actions and the executor
//! - [`funds`] - Funds-transfer requests, response digestion and the event trail
//! - [`persistence`] - In-memory and PostgreSQL collaborators
//! - [`config`] - Layered configuration
//! - [`logging`] - Structured logging setup
//! - [`error`] - Crate-level error aggregation
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use statepath::config::PathCacheConfig;
//! use statepath::graph::{GraphBuilder, PathDefinition};
//! use statepath::persistence::{MemoryGraph, MemorySession};
//! use statepath::state_machine::{
//!     ActionRegistry, AllowAllGate, Principal, StateTransition, Stateful, TransitionExecutor,
//!     TransitionRequest,
//! };
//! use uuid::Uuid;
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct Invoice { id: Uuid, state_id: i64, change_stamp: i64 }
//!
//! impl Stateful for Invoice {
//!     fn stateful_id(&self) -> Uuid { self.id }
//!     fn state_id(&self) -> i64 { self.state_id }
//!     fn set_state_id(&mut self, state_id: i64) { self.state_id = state_id; }
//!     fn change_stamp(&self) -> i64 { self.change_stamp }
//!     fn set_change_stamp(&mut self, stamp: i64) { self.change_stamp = stamp; }
//! }
//!
//! # async fn example() -> Result<(), statepath::StatePathError> {
//! let definition = GraphBuilder::new("invoices", "state_transition")
//!     .state("draft", None)
//!     .state("sent", None)
//!     .path(PathDefinition::new("send", "draft", "sent").masks(-1, 0b10))
//!     .build(1)?;
//!
//! let session = Arc::new(MemorySession::<Invoice, StateTransition>::new());
//! let executor = TransitionExecutor::new(
//!     session.clone(),
//!     Arc::new(MemoryGraph::from_definition(&definition)),
//!     Arc::new(ActionRegistry::new()),
//!     Arc::new(AllowAllGate),
//!     &PathCacheConfig::default(),
//! );
//!
//! let mut invoice = Invoice { id: Uuid::new_v4(), state_id: 2, change_stamp: 0 };
//! let path = executor.resolve_path("send").await?;
//! let principal = Principal::new(7, "clerk");
//! executor
//!     .execute(&principal, &mut invoice, TransitionRequest::new(path))
//!     .await?;
//! assert_eq!(invoice.change_stamp, 0b10);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod funds;
pub mod graph;
pub mod logging;
pub mod persistence;
pub mod state_machine;

pub use config::{ConfigManager, StatePathConfig};
pub use error::{Result, StatePathError};
pub use funds::{ReconciliationEngine, TransferRequestStore};
pub use graph::{GraphBuilder, GraphSource, NodeKey, StatePath};
pub use state_machine::{
    BatchExecutor, Principal, StateAction, StateMachineError, Stateful, TransitionExecutor,
    TransitionRequest, WorkflowSession,
};
