//! # PostgreSQL Graph Source
//!
//! Loads joined graph configuration from the tables created by
//! `migrations/0001_workflow_graph.sql`; run [`MIGRATOR`] to create them.
//!
//! ```rust,no_run
//! use statepath::persistence::PgGraphSource;
//! use statepath::graph::{GraphSource, NodeKey};
//! use sqlx::PgPool;
//!
//! # async fn example(pool: PgPool) -> Result<(), statepath::state_machine::PersistenceError> {
//! let source = PgGraphSource::new(pool).scoped_to("payouts");
//! if let Some(path) = source.load_path(&NodeKey::from("settle")).await? {
//!     println!("{} -> {}", path.previous_state, path.next_state);
//! }
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use tracing::{debug, instrument};

use crate::graph::{GraphSource, NodeKey, State, StateGroup, StatePath, WorkflowGraph};
use crate::state_machine::PersistenceResult;

/// Schema for the graph tables, embedded from `migrations/`
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

const PATH_SELECT: &str = r#"
SELECT
    p.id AS path_id, p.code_name AS path_code_name, p.name AS path_name,
    p.and_mask, p.or_mask, p.pre_actions, p.post_actions,
    g.id AS graph_id, g.code_name AS graph_code_name, g.name AS graph_name,
    g.transition_record_type,
    ps.id AS prev_id, ps.code_name AS prev_code_name, ps.name AS prev_name,
    pg.id AS prev_group_id, pg.code_name AS prev_group_code_name, pg.name AS prev_group_name,
    ns.id AS next_id, ns.code_name AS next_code_name, ns.name AS next_name,
    ng.id AS next_group_id, ng.code_name AS next_group_code_name, ng.name AS next_group_name
FROM state_paths p
JOIN workflow_graphs g ON g.id = p.graph_id
JOIN states ps ON ps.id = p.previous_state_id
LEFT JOIN state_groups pg ON pg.id = ps.group_id
JOIN states ns ON ns.id = p.next_state_id
LEFT JOIN state_groups ng ON ng.id = ns.group_id
"#;

const STATE_SELECT: &str = r#"
SELECT
    s.id AS state_id, s.code_name AS state_code_name, s.name AS state_name,
    g.id AS graph_id, g.code_name AS graph_code_name, g.name AS graph_name,
    g.transition_record_type,
    sg.id AS group_id, sg.code_name AS group_code_name, sg.name AS group_name
FROM states s
JOIN workflow_graphs g ON g.id = s.graph_id
LEFT JOIN state_groups sg ON sg.id = s.group_id
"#;

/// Flat row produced by [`PATH_SELECT`]
#[derive(Debug, Clone, FromRow)]
pub(crate) struct PathRow {
    path_id: i64,
    path_code_name: String,
    path_name: String,
    and_mask: i64,
    or_mask: i64,
    pre_actions: Json<Vec<String>>,
    post_actions: Json<Vec<String>>,
    graph_id: i64,
    graph_code_name: String,
    graph_name: String,
    transition_record_type: String,
    prev_id: i64,
    prev_code_name: String,
    prev_name: String,
    prev_group_id: Option<i64>,
    prev_group_code_name: Option<String>,
    prev_group_name: Option<String>,
    next_id: i64,
    next_code_name: String,
    next_name: String,
    next_group_id: Option<i64>,
    next_group_code_name: Option<String>,
    next_group_name: Option<String>,
}

/// Flat row produced by [`STATE_SELECT`]
#[derive(Debug, Clone, FromRow)]
pub(crate) struct StateRow {
    state_id: i64,
    state_code_name: String,
    state_name: String,
    graph_id: i64,
    graph_code_name: String,
    graph_name: String,
    transition_record_type: String,
    group_id: Option<i64>,
    group_code_name: Option<String>,
    group_name: Option<String>,
}

fn joined_group(
    graph_id: i64,
    id: Option<i64>,
    code_name: Option<String>,
    name: Option<String>,
) -> Option<StateGroup> {
    match (id, code_name) {
        (Some(id), Some(code_name)) => Some(StateGroup {
            id,
            graph_id,
            name: name.unwrap_or_else(|| code_name.clone()),
            code_name,
        }),
        _ => None,
    }
}

impl From<PathRow> for StatePath {
    fn from(row: PathRow) -> Self {
        let graph = WorkflowGraph {
            id: row.graph_id,
            code_name: row.graph_code_name,
            name: row.graph_name,
            transition_record_type: row.transition_record_type,
        };

        let previous_state = State {
            id: row.prev_id,
            code_name: row.prev_code_name,
            name: row.prev_name,
            graph: graph.clone(),
            group: joined_group(
                graph.id,
                row.prev_group_id,
                row.prev_group_code_name,
                row.prev_group_name,
            ),
        };
        let next_state = State {
            id: row.next_id,
            code_name: row.next_code_name,
            name: row.next_name,
            graph: graph.clone(),
            group: joined_group(
                graph.id,
                row.next_group_id,
                row.next_group_code_name,
                row.next_group_name,
            ),
        };

        StatePath {
            id: row.path_id,
            code_name: row.path_code_name,
            name: row.path_name,
            graph,
            previous_state,
            next_state,
            and_mask: row.and_mask,
            or_mask: row.or_mask,
            pre_actions: row.pre_actions.0,
            post_actions: row.post_actions.0,
        }
    }
}

impl From<StateRow> for State {
    fn from(row: StateRow) -> Self {
        let graph = WorkflowGraph {
            id: row.graph_id,
            code_name: row.graph_code_name,
            name: row.graph_name,
            transition_record_type: row.transition_record_type,
        };
        let group = joined_group(graph.id, row.group_id, row.group_code_name, row.group_name);

        State {
            id: row.state_id,
            code_name: row.state_code_name,
            name: row.state_name,
            graph,
            group,
        }
    }
}

/// [`GraphSource`] backed by a PostgreSQL pool
///
/// Code names are unique per graph only; scope the source to a graph when
/// several graphs share code names.
#[derive(Debug, Clone)]
pub struct PgGraphSource {
    pool: PgPool,
    graph_code_name: Option<String>,
}

impl PgGraphSource {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            graph_code_name: None,
        }
    }

    pub fn scoped_to(mut self, graph_code_name: &str) -> Self {
        self.graph_code_name = Some(graph_code_name.to_string());
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl GraphSource for PgGraphSource {
    #[instrument(skip(self), fields(graph = ?self.graph_code_name))]
    async fn load_path(&self, key: &NodeKey) -> PersistenceResult<Option<StatePath>> {
        let row = match key {
            NodeKey::Id(id) => {
                let sql = format!("{PATH_SELECT} WHERE p.id = $1");
                sqlx::query_as::<_, PathRow>(&sql)
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?
            }
            NodeKey::CodeName(code_name) => {
                let sql = format!(
                    "{PATH_SELECT} WHERE p.code_name = $1 \
                     AND ($2::text IS NULL OR g.code_name = $2) ORDER BY p.id LIMIT 1"
                );
                sqlx::query_as::<_, PathRow>(&sql)
                    .bind(code_name)
                    .bind(self.graph_code_name.as_deref())
                    .fetch_optional(&self.pool)
                    .await?
            }
        };

        debug!(found = row.is_some(), "Loaded path row");
        Ok(row.map(StatePath::from))
    }

    #[instrument(skip(self), fields(graph = ?self.graph_code_name))]
    async fn load_state(&self, key: &NodeKey) -> PersistenceResult<Option<State>> {
        let row = match key {
            NodeKey::Id(id) => {
                let sql = format!("{STATE_SELECT} WHERE s.id = $1");
                sqlx::query_as::<_, StateRow>(&sql)
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?
            }
            NodeKey::CodeName(code_name) => {
                let sql = format!(
                    "{STATE_SELECT} WHERE s.code_name = $1 \
                     AND ($2::text IS NULL OR g.code_name = $2) ORDER BY s.id LIMIT 1"
                );
                sqlx::query_as::<_, StateRow>(&sql)
                    .bind(code_name)
                    .bind(self.graph_code_name.as_deref())
                    .fetch_optional(&self.pool)
                    .await?
            }
        };

        Ok(row.map(State::from))
    }
}
