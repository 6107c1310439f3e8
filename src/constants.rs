/// Default port of the HTTP API
pub const DEFAULT_SERVER_PORT: u16 = 3000;

/// Default SQLite database file
pub const DEFAULT_DATABASE_PATH: &str = "taskpilot.db";

/// Default upper bound on a single agent step
pub const DEFAULT_STEP_TIMEOUT: &str = "2m";

/// Default upper bound on a single tool invocation
pub const DEFAULT_TOOL_TIMEOUT: &str = "60s";

/// Answer handed to the agent when auto mode skips a question
pub const DEFAULT_AUTO_ANSWER: &str =
    "[auto mode] The question \"{question}\" was skipped. Decide on your own and continue.";

/// Recorded when a user cancels a task
pub const CANCELLED_MESSAGE: &str = "Task was cancelled by user";

/// Capacity of the notification broadcast channel
pub const EVENT_BUS_CAPACITY: usize = 2048;
