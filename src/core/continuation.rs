use super::interaction::InteractionKind;
use super::task::Task;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One exchange in the conversation handed to the agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "turn", rename_all = "snake_case")]
pub enum Turn {
    Task {
        description: String,
    },
    Agent {
        kind: InteractionKind,
        content: String,
    },
    ToolCall {
        tool: String,
        args: Value,
    },
    ToolResult {
        tool: String,
        output: String,
        is_error: bool,
    },
    ToolDenied {
        tool: String,
        note: Option<String>,
    },
    Question {
        question: String,
    },
    /// `skipped` marks a synthesized auto-mode answer
    Answer {
        question: String,
        answer: String,
        skipped: bool,
    },
    UserMessage {
        text: String,
    },
}

/// Where a parked loop must pick up again
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingStep {
    AwaitingAnswer {
        interaction_id: i64,
        question: String,
    },
    AwaitingApproval {
        request_id: String,
        tool: String,
        args: Value,
    },
}

/// Serialized state of an agent loop
///
/// Persisted alongside the task after every step so a parked or interrupted
/// loop can be rebuilt from storage alone.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Continuation {
    pub conversation: Vec<Turn>,
    /// Number of agent steps accepted so far
    pub steps_taken: usize,
    pub pending: Option<PendingStep>,
}

impl Continuation {
    /// Seeds a conversation with the task description
    pub fn start(task: &Task) -> Self {
        Self {
            conversation: vec![Turn::Task {
                description: task.description.clone(),
            }],
            steps_taken: 0,
            pending: None,
        }
    }

    pub fn push(&mut self, turn: Turn) {
        self.conversation.push(turn);
    }

    pub fn last_turn(&self) -> Option<&Turn> {
        self.conversation.last()
    }

    pub fn is_parked(&self) -> bool {
        self.pending.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::NewTask;
    use serde_json::json;

    #[test]
    fn test_parked_continuation_survives_serialization() {
        let task = NewTask::new("Find the config file").into_task();
        let mut continuation = Continuation::start(&task);
        continuation.steps_taken = 2;
        continuation.push(Turn::ToolCall {
            tool: "fs".into(),
            args: json!({ "action": "list_directory", "path": "/etc" }),
        });
        continuation.pending = Some(PendingStep::AwaitingApproval {
            request_id: "req-1".into(),
            tool: "web_search".into(),
            args: json!({ "query": "config" }),
        });

        let stored = serde_json::to_string(&continuation).unwrap();
        let restored: Continuation = serde_json::from_str(&stored).unwrap();

        assert_eq!(restored, continuation);
        assert!(restored.is_parked());
        assert_eq!(
            restored.conversation.first(),
            Some(&Turn::Task {
                description: "Find the config file".into()
            })
        );
    }
}
