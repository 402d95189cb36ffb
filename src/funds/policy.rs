//! # Digestion Policy
//!
//! Caller-supplied decision of what to do with a resolved response line:
//! execute a path, or record the event directly without a transition.
//!
//! Any `Fn(&DecisionContext<S>, &mut PathSelection) -> anyhow::Result<()>`
//! is a policy. Use [`policy_fn`] to pin the closure signature:
//!
//! ```rust
//! use statepath::funds::{policy_fn, FundsResponseStatus};
//!
//! # #[derive(Clone)] struct Payment;
//! let policy = policy_fn(|ctx: &statepath::funds::DecisionContext<'_, Payment>, selection| {
//!     match ctx.line.status {
//!         FundsResponseStatus::Accepted => selection.select("settle"),
//!         FundsResponseStatus::Pending => selection.record_directly(),
//!         other => anyhow::bail!("unexpected status {other}"),
//!     }
//!     Ok(())
//! });
//! # let _ = policy;
//! ```

use anyhow::anyhow;
use serde_json::Value;
use std::collections::HashMap;

use super::types::{FundsResponseLine, FundsResponseStatus, FundsTransferRequest};
use crate::graph::State;
use crate::state_machine::Arguments;

/// Everything known about a line once it has been resolved
pub struct DecisionContext<'a, S> {
    pub request: &'a FundsTransferRequest,
    pub object: &'a S,
    pub current_state: &'a State,
    pub line: &'a FundsResponseLine,
}

/// Outcome slot a policy fills in
///
/// Untouched means "record the event directly".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PathSelection {
    selected: Option<String>,
    arguments: Arguments,
}

impl PathSelection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(&mut self, path_code_name: &str) {
        self.selected = Some(path_code_name.to_string());
    }

    pub fn record_directly(&mut self) {
        self.selected = None;
    }

    /// Extra argument passed to the selected path
    pub fn argument(&mut self, key: &str, value: Value) {
        self.arguments.insert(key.to_string(), value);
    }

    pub fn selected_path(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn is_path_selected(&self) -> bool {
        self.selected.is_some()
    }

    pub(crate) fn into_parts(self) -> (Option<String>, Arguments) {
        (self.selected, self.arguments)
    }
}

pub trait DigestionPolicy<S>: Send + Sync {
    fn decide(
        &self,
        ctx: &DecisionContext<'_, S>,
        selection: &mut PathSelection,
    ) -> anyhow::Result<()>;
}

impl<S, F> DigestionPolicy<S> for F
where
    F: Fn(&DecisionContext<'_, S>, &mut PathSelection) -> anyhow::Result<()> + Send + Sync,
{
    fn decide(
        &self,
        ctx: &DecisionContext<'_, S>,
        selection: &mut PathSelection,
    ) -> anyhow::Result<()> {
        self(ctx, selection)
    }
}

/// Identity helper fixing a closure's signature to a policy's
pub fn policy_fn<S, F>(policy: F) -> F
where
    F: Fn(&DecisionContext<'_, S>, &mut PathSelection) -> anyhow::Result<()> + Send + Sync,
{
    policy
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Route {
    Path(String),
    Direct,
}

/// Table-driven policy keyed by current state code name and line status
///
/// Combinations without an entry are rejected.
#[derive(Debug, Clone, Default)]
pub struct StatusTransitionPolicy {
    routes: HashMap<(String, FundsResponseStatus), Route>,
}

impl StatusTransitionPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, state: &str, status: FundsResponseStatus, path_code_name: &str) -> Self {
        self.routes.insert(
            (state.to_string(), status),
            Route::Path(path_code_name.to_string()),
        );
        self
    }

    pub fn record_on(mut self, state: &str, status: FundsResponseStatus) -> Self {
        self.routes
            .insert((state.to_string(), status), Route::Direct);
        self
    }
}

impl<S> DigestionPolicy<S> for StatusTransitionPolicy {
    fn decide(
        &self,
        ctx: &DecisionContext<'_, S>,
        selection: &mut PathSelection,
    ) -> anyhow::Result<()> {
        let key = (ctx.current_state.code_name.clone(), ctx.line.status);
        match self.routes.get(&key) {
            Some(Route::Path(code_name)) => selection.select(code_name),
            Some(Route::Direct) => selection.record_directly(),
            None => {
                return Err(anyhow!(
                    "no route for status '{}' in state '{}'",
                    ctx.line.status,
                    ctx.current_state.code_name
                ))
            }
        }
        Ok(())
    }
}
