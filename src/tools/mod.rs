mod fs_tool;
mod registry;

use crate::core::Task;
use serde_json::Value;

pub use fs_tool::*;
pub use registry::*;

/// Describes one action a tool understands
pub struct ToolAction {
    pub name: String,
    pub arg_names: Vec<String>,
    pub description: String,
}

impl std::fmt::Display for ToolAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}) - {}",
            self.name,
            self.arg_names.join(", "),
            self.description
        )
    }
}

/// A capability an agent can call through the coordinator
#[async_trait::async_trait]
pub trait Tool: std::fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    /// Runs the tool; `Err` carries a message that is shown to the agent
    async fn invoke(&self, args: &Value) -> Result<String, String>;

    fn get_actions(&self) -> Vec<ToolAction>;
}

/// The coordinator's view of tool execution and permissions
#[async_trait::async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Whether `task` may call `name` without an approval
    fn is_allowed(&self, task: &Task, name: &str) -> bool;

    async fn invoke(&self, name: &str, args: &Value) -> Result<String, String>;
}
