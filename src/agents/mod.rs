mod scripted;

pub use scripted::*;

use crate::core::{Continuation, InteractionKind, Task};
use crate::errors::Error;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What the agent wants to do next
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum AgentStep {
    /// Record an observation (thinking, info, ...) and keep going
    Emit {
        kind: InteractionKind,
        content: String,
        #[serde(default)]
        metadata: Value,
    },
    CallTool {
        tool: String,
        #[serde(default)]
        args: Value,
        #[serde(default)]
        reason: Option<String>,
    },
    AskQuestion {
        question: String,
    },
    Finish {
        result: Value,
    },
    Fail {
        reason: String,
    },
}

impl AgentStep {
    pub fn as_condition(&self) -> &str {
        match self {
            AgentStep::Emit { .. } => "emit",
            AgentStep::CallTool { .. } => "call_tool",
            AgentStep::AskQuestion { .. } => "ask_question",
            AgentStep::Finish { .. } => "finish",
            AgentStep::Fail { .. } => "fail",
        }
    }
}

/// Produces the next step of an agent loop from its serialized state
///
/// Implementations wrap whatever drives the agent (a model call, a script).
/// Errors are reported as `Error::AgentStepFailure`.
#[async_trait::async_trait]
pub trait AgentStepProvider: Send + Sync {
    async fn next(&self, task: &Task, state: &Continuation) -> Result<AgentStep, Error>;
}
