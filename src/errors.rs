use diesel::result::Error as DieselError;

/// Errors surfaced by the coordinator, the interaction log and the repositories
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Task {0} not found")]
    TaskNotFound(String),
    #[error("Interaction {1} not found for task {0}")]
    InteractionNotFound(String, i64),
    #[error("Approval request {0} not found")]
    ApprovalNotFound(String),
    #[error("Invalid transition: cannot apply '{event}' while task is {from}")]
    InvalidTransition { from: String, event: String },
    #[error("Task {0} already has an active execution context")]
    AlreadyRunning(String),
    #[error("Interaction {0} has already been responded to")]
    AlreadyResponded(i64),
    #[error("Interaction {0} is not a question awaiting a response")]
    NotAQuestion(i64),
    #[error("Approval request {0} has already been resolved")]
    ApprovalAlreadyResolved(String),
    #[error("Tool '{0}' is not permitted for this task")]
    ToolNotPermitted(String),
    #[error("Agent step failed: {0}")]
    AgentStepFailure(String),
    #[error("Repository unavailable: {0}")]
    RepositoryUnavailable(String),
    #[error("Serde error: {0}")]
    SerdeError(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<DieselError> for Error {
    fn from(e: DieselError) -> Self {
        Error::RepositoryUnavailable(e.to_string())
    }
}

impl From<diesel::r2d2::PoolError> for Error {
    fn from(e: diesel::r2d2::PoolError) -> Self {
        Error::RepositoryUnavailable(e.to_string())
    }
}

impl Error {
    /// Builds an `InvalidTransition` from anything printable
    pub fn invalid_transition(from: impl ToString, event: impl ToString) -> Self {
        Error::InvalidTransition {
            from: from.to_string(),
            event: event.to_string(),
        }
    }
}
