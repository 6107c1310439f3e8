mod memory;
mod models;
mod task_repository;

use crate::config::{StorageConfig, StorageKind};
use crate::core::{
    ApprovalStatus, Continuation, ExecutionRecord, Interaction, InteractionQuery,
    NewExecutionRecord, NewInteraction, StatusChange, Task, TaskFilter, ToolApprovalRequest,
};
use crate::errors::Error;
use diesel::connection::SimpleConnection;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use std::sync::Arc;
use tracing::info;

pub use memory::InMemoryRepository;
pub use task_repository::SqliteRepository;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY NOT NULL,
    title TEXT NOT NULL,
    description TEXT NOT NULL,
    priority TEXT NOT NULL,
    mode TEXT NOT NULL,
    auto_mode BOOLEAN NOT NULL DEFAULT 0,
    assigned_to TEXT,
    additional_tool_names TEXT NOT NULL DEFAULT '[]',
    status TEXT NOT NULL,
    detailed_status TEXT NOT NULL,
    result_json TEXT,
    error_message TEXT,
    continuation TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT
);

CREATE TABLE IF NOT EXISTS task_interactions (
    task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    id BIGINT NOT NULL,
    interaction_type TEXT NOT NULL,
    content TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    requires_response BOOLEAN NOT NULL DEFAULT 0,
    response TEXT,
    created_at TEXT NOT NULL,
    responded_at TEXT,
    PRIMARY KEY (task_id, id)
);

CREATE TABLE IF NOT EXISTS tool_approval_requests (
    id TEXT PRIMARY KEY NOT NULL,
    agent_id TEXT,
    task_id TEXT,
    requested_tools TEXT NOT NULL,
    reason TEXT NOT NULL,
    status TEXT NOT NULL,
    requested_at TEXT NOT NULL,
    responded_at TEXT,
    response_note TEXT
);

CREATE TABLE IF NOT EXISTS execution_logs (
    task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    id BIGINT NOT NULL,
    agent_id TEXT,
    action TEXT NOT NULL,
    status TEXT NOT NULL,
    output_json TEXT,
    error_message TEXT,
    execution_time DOUBLE,
    created_at TEXT NOT NULL,
    PRIMARY KEY (task_id, id)
);

CREATE INDEX IF NOT EXISTS idx_tasks_detailed_status ON tasks(detailed_status);
CREATE INDEX IF NOT EXISTS idx_approvals_status ON tool_approval_requests(status);
"#;

/// Durable storage for tasks, their interaction and execution logs and
/// approval requests
///
/// Every method is atomic with respect to every other method on the same
/// repository. Status changes are compare-and-set on the detailed status,
/// which is what keeps concurrent callers from double-starting or resurrecting
/// a task.
pub trait Repository: Send + Sync {
    /// Stores a freshly created task
    fn insert_task(&self, task: &Task) -> Result<(), Error>;

    /// # Errors
    ///
    /// Returns `Error::TaskNotFound` if no task has this id
    fn get_task(&self, task_id: &str) -> Result<Task, Error>;

    /// Lists tasks matching `filter`, newest first
    fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, Error>;

    /// Deletes an inactive task together with its logs
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidTransition` if the task is running or waiting
    fn delete_task(&self, task_id: &str) -> Result<(), Error>;

    /// Applies `change` only if the task is still in `change.expected`
    ///
    /// # Returns
    ///
    /// The task as stored after the change
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidTransition` naming the actual current state when
    /// the expectation does not hold
    fn transition_status(&self, task_id: &str, change: &StatusChange) -> Result<Task, Error>;

    /// Flips the auto-mode flag and returns the updated task
    fn toggle_auto_mode(&self, task_id: &str) -> Result<Task, Error>;

    /// Adds tools to the task's granted set, ignoring ones already granted
    fn grant_tools(&self, task_id: &str, tools: &[String]) -> Result<Task, Error>;

    fn save_continuation(&self, task_id: &str, continuation: &Continuation) -> Result<(), Error>;

    fn load_continuation(&self, task_id: &str) -> Result<Option<Continuation>, Error>;

    /// Appends an entry and assigns the next per-task sequence number
    fn append_interaction(&self, new: &NewInteraction) -> Result<Interaction, Error>;

    /// Reads a task's log in ascending id order
    fn list_interactions(
        &self,
        task_id: &str,
        query: &InteractionQuery,
    ) -> Result<Vec<Interaction>, Error>;

    fn get_interaction(&self, task_id: &str, interaction_id: i64) -> Result<Interaction, Error>;

    /// Records the single response allowed on a pending question
    ///
    /// # Errors
    ///
    /// * `Error::InteractionNotFound` if the entry does not exist
    /// * `Error::NotAQuestion` if the entry does not take responses
    /// * `Error::AlreadyResponded` if another response won
    fn respond_to_question(
        &self,
        task_id: &str,
        interaction_id: i64,
        response: &str,
    ) -> Result<Interaction, Error>;

    fn insert_approval(&self, request: &ToolApprovalRequest) -> Result<(), Error>;

    fn get_approval(&self, request_id: &str) -> Result<ToolApprovalRequest, Error>;

    /// Lists approval requests, newest first
    fn list_approvals(
        &self,
        status: Option<ApprovalStatus>,
        task_id: Option<&str>,
    ) -> Result<Vec<ToolApprovalRequest>, Error>;

    /// Moves a pending request to approved or rejected exactly once
    ///
    /// # Errors
    ///
    /// Returns `Error::ApprovalAlreadyResolved` if the request is no longer pending
    fn resolve_approval(
        &self,
        request_id: &str,
        approved: bool,
        note: Option<&str>,
    ) -> Result<ToolApprovalRequest, Error>;

    /// Appends a milestone to the task's execution log
    fn append_execution_record(&self, new: &NewExecutionRecord) -> Result<ExecutionRecord, Error>;

    /// Reads a task's execution log in ascending id order
    fn list_execution_records(&self, task_id: &str) -> Result<Vec<ExecutionRecord>, Error>;
}

/// Applies per-connection pragmas as connections enter the pool
#[derive(Debug, Clone, Copy)]
struct ConnectionOptions;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute("PRAGMA busy_timeout = 5000; PRAGMA foreign_keys = ON;")
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

#[derive(Clone, Debug)]
pub struct Database {
    pool: Arc<Pool<ConnectionManager<SqliteConnection>>>,
}

impl Database {
    /// Opens (or creates) the SQLite database at `db_path` and applies the schema
    ///
    /// # Errors
    ///
    /// Returns `Error::RepositoryUnavailable` if the pool cannot be built or
    /// the schema cannot be applied
    pub fn new(db_path: &str) -> Result<Self, Error> {
        let manager = ConnectionManager::<SqliteConnection>::new(db_path);
        let pool = Pool::builder()
            .connection_customizer(Box::new(ConnectionOptions))
            .build(manager)?;

        let database = Database {
            pool: Arc::new(pool),
        };
        database.init_schema()?;
        info!("SQLite database ready at {}", db_path);
        Ok(database)
    }

    pub fn get_conn(&self) -> Result<PooledConnection<ConnectionManager<SqliteConnection>>, Error> {
        Ok(self.pool.get()?)
    }

    fn init_schema(&self) -> Result<(), Error> {
        let mut conn = self.get_conn()?;
        conn.batch_execute("PRAGMA journal_mode = WAL;")?;
        conn.batch_execute(SCHEMA)?;
        Ok(())
    }
}

/// Builds the repository selected by the storage configuration
pub fn open_repository(config: &StorageConfig) -> Result<Arc<dyn Repository>, Error> {
    match config.kind {
        StorageKind::Sqlite => {
            let database = Database::new(&config.path)?;
            Ok(Arc::new(SqliteRepository::new(database)))
        }
        StorageKind::Memory => {
            info!("Using in-memory storage; tasks will not survive a restart");
            Ok(Arc::new(InMemoryRepository::new()))
        }
    }
}
