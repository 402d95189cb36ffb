use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::graph::StatePath;

/// The acting user on whose behalf a path is executed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: i64,
    pub name: String,
    pub roles: BTreeSet<String>,
}

impl Principal {
    pub fn new(user_id: i64, name: &str) -> Self {
        Self {
            user_id,
            name: name.to_string(),
            roles: BTreeSet::new(),
        }
    }

    pub fn with_role(mut self, role: &str) -> Self {
        self.roles.insert(role.to_string());
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
}

/// Authorization collaborator deciding whether a principal may execute a path
///
/// Implementations must be free of side effects. The executor consults the
/// gate before resolving actions or opening a transaction.
#[async_trait]
pub trait AccessGate<S>: Send + Sync {
    async fn can_execute(&self, principal: &Principal, object: &S, path: &StatePath) -> bool;

    /// Get a description of this gate for logging
    fn description(&self) -> &'static str;
}

/// Gate that authorizes every principal
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllGate;

#[async_trait]
impl<S: Send + Sync> AccessGate<S> for AllowAllGate {
    async fn can_execute(&self, _principal: &Principal, _object: &S, _path: &StatePath) -> bool {
        true
    }

    fn description(&self) -> &'static str {
        "All principals may execute every path"
    }
}

/// Gate requiring one of a set of roles per path code name
///
/// Paths without an entry fall back to `default_allow`.
#[derive(Debug, Clone, Default)]
pub struct RoleAccessGate {
    required_roles: HashMap<String, BTreeSet<String>>,
    default_allow: bool,
}

impl RoleAccessGate {
    pub fn new(default_allow: bool) -> Self {
        Self {
            required_roles: HashMap::new(),
            default_allow,
        }
    }

    pub fn require(mut self, path_code_name: &str, role: &str) -> Self {
        self.required_roles
            .entry(path_code_name.to_string())
            .or_default()
            .insert(role.to_string());
        self
    }
}

#[async_trait]
impl<S: Send + Sync> AccessGate<S> for RoleAccessGate {
    async fn can_execute(&self, principal: &Principal, _object: &S, path: &StatePath) -> bool {
        match self.required_roles.get(&path.code_name) {
            Some(roles) => roles.iter().any(|role| principal.has_role(role)),
            None => self.default_allow,
        }
    }

    fn description(&self) -> &'static str {
        "Principal must hold a role configured for the path"
    }
}
