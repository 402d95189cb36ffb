//! # Path/State Cache
//!
//! Memoizes graph configuration per engine instance. Concurrent lookups of
//! the same unresolved key share a single load through moka's
//! `try_get_with`; unrelated keys load concurrently. Nodes are evicted by
//! recency once `max_capacity` nodes are cached.
//!
//! A loaded node is stored under both its id and its code name. Each key is
//! its own moka entry, so the underlying caches hold two entries per node.
//!
//! Keys are not qualified by graph: a cache resolves code names through
//! whatever scope its `GraphSource` applies, so sources spanning graphs that
//! share code names should be scoped to one graph.
//!
//! Every hit re-validates that the cached node still belongs to a graph
//! declaring the engine's transition-record type.

use moka::future::Cache;
use moka::policy::EvictionPolicy;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::errors::{backend_error, StateMachineError, StateMachineResult};
use crate::config::PathCacheConfig;
use crate::graph::{GraphSource, NodeKey, State, StatePath, WorkflowGraph};

pub struct PathCache {
    expected_record_type: String,
    source: Arc<dyn GraphSource>,
    paths: Cache<NodeKey, Arc<StatePath>>,
    states: Cache<NodeKey, Arc<State>>,
}

impl fmt::Debug for PathCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathCache")
            .field("expected_record_type", &self.expected_record_type)
            .field("max_entries", &self.paths.policy().max_capacity())
            .field("paths", &self.paths.entry_count())
            .field("states", &self.states.entry_count())
            .finish()
    }
}

impl PathCache {
    pub fn new(
        expected_record_type: &str,
        source: Arc<dyn GraphSource>,
        config: &PathCacheConfig,
    ) -> Self {
        let ttl = config.time_to_live();

        debug!(
            record_type = expected_record_type,
            max_capacity = config.max_capacity,
            ttl_seconds = config.time_to_live_seconds,
            "Path cache created"
        );

        Self {
            expected_record_type: expected_record_type.to_string(),
            source,
            paths: build_cache(config.max_capacity, ttl),
            states: build_cache(config.max_capacity, ttl),
        }
    }

    pub fn expected_record_type(&self) -> &str {
        &self.expected_record_type
    }

    pub fn source(&self) -> &Arc<dyn GraphSource> {
        &self.source
    }

    pub async fn get_path(&self, key: &NodeKey) -> StateMachineResult<Arc<StatePath>> {
        let path = match self.paths.get(key).await {
            Some(path) => {
                debug!(key = %key, "Path cache HIT");
                path
            }
            None => {
                let source = self.source.clone();
                let lookup = key.clone();
                let path = self
                    .paths
                    .try_get_with(key.clone(), async move {
                        debug!(key = %lookup, "Path cache MISS, loading");
                        match source.load_path(&lookup).await {
                            Ok(Some(path)) => Ok(Arc::new(path)),
                            Ok(None) => Err(StateMachineError::PathNotFound { key: lookup }),
                            Err(err) => Err(StateMachineError::Persistence(err)),
                        }
                    })
                    .await
                    .map_err(unshare)?;

                let alias = alias_of(key, path.id, &path.code_name);
                self.paths.insert(alias, path.clone()).await;
                path
            }
        };

        self.ensure_record_type(&format!("path '{}'", path.code_name), &path.graph)?;
        Ok(path)
    }

    pub async fn get_state(&self, key: &NodeKey) -> StateMachineResult<Arc<State>> {
        let state = match self.states.get(key).await {
            Some(state) => state,
            None => {
                let source = self.source.clone();
                let lookup = key.clone();
                let state = self
                    .states
                    .try_get_with(key.clone(), async move {
                        match source.load_state(&lookup).await {
                            Ok(Some(state)) => Ok(Arc::new(state)),
                            Ok(None) => Err(StateMachineError::StateNotFound { key: lookup }),
                            Err(err) => Err(StateMachineError::Persistence(err)),
                        }
                    })
                    .await
                    .map_err(unshare)?;

                let alias = alias_of(key, state.id, &state.code_name);
                self.states.insert(alias, state.clone()).await;
                state
            }
        };

        self.ensure_record_type(&format!("state '{}'", state.code_name), &state.graph)?;
        Ok(state)
    }

    /// Drop a path under both its id and code-name keys
    pub async fn invalidate_path(&self, path: &StatePath) {
        self.paths.invalidate(&NodeKey::Id(path.id)).await;
        self.paths
            .invalidate(&NodeKey::CodeName(path.code_name.clone()))
            .await;
    }

    pub fn invalidate_all(&self) {
        self.paths.invalidate_all();
        self.states.invalidate_all();
    }

    /// Approximate number of cached path and state entries
    pub async fn entry_count(&self) -> u64 {
        self.paths.run_pending_tasks().await;
        self.states.run_pending_tasks().await;
        self.paths.entry_count() + self.states.entry_count()
    }

    fn ensure_record_type(&self, node: &str, graph: &WorkflowGraph) -> StateMachineResult<()> {
        if graph.accepts_record_type(&self.expected_record_type) {
            return Ok(());
        }

        Err(StateMachineError::GraphMismatch {
            node: node.to_string(),
            graph: graph.code_name.clone(),
            expected: self.expected_record_type.clone(),
            found: graph.transition_record_type.clone(),
        })
    }
}

/// Keys a cached node is reachable under: id and code name
const KEYS_PER_NODE: u64 = 2;

fn build_cache<V>(max_nodes: u64, ttl: Option<Duration>) -> Cache<NodeKey, V>
where
    V: Clone + Send + Sync + 'static,
{
    let builder = Cache::builder()
        .max_capacity(max_nodes.saturating_mul(KEYS_PER_NODE))
        .eviction_policy(EvictionPolicy::lru());

    match ttl {
        Some(ttl) => builder.time_to_live(ttl).build(),
        None => builder.build(),
    }
}

/// The other key a freshly loaded node answers to
fn alias_of(key: &NodeKey, id: i64, code_name: &str) -> NodeKey {
    match key {
        NodeKey::Id(_) => NodeKey::CodeName(code_name.to_string()),
        NodeKey::CodeName(_) => NodeKey::Id(id),
    }
}

/// Waiters that joined an in-flight load receive a shared error
fn unshare(err: Arc<StateMachineError>) -> StateMachineError {
    match Arc::try_unwrap(err) {
        Ok(err) => err,
        Err(shared) => match shared.as_ref() {
            StateMachineError::PathNotFound { key } => {
                StateMachineError::PathNotFound { key: key.clone() }
            }
            StateMachineError::StateNotFound { key } => {
                StateMachineError::StateNotFound { key: key.clone() }
            }
            other => StateMachineError::Persistence(backend_error(other.to_string())),
        },
    }
}
