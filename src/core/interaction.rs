use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;

/// The closed set of entries that can appear in a task's interaction log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    AgentThinking,
    ToolCall,
    ToolResult,
    Question,
    UserResponse,
    Info,
    Error,
    Result,
}

/// One entry of the append-only interaction log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub task_id: String,
    /// Per-task sequence number, gap-free and strictly increasing
    pub id: i64,
    pub interaction_type: InteractionKind,
    pub content: String,
    pub metadata: Value,
    pub requires_response: bool,
    /// Set at most once, only on questions
    pub response: Option<String>,
    pub created_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
}

impl Interaction {
    /// A question still waiting for its single answer
    pub fn is_pending_question(&self) -> bool {
        self.interaction_type == InteractionKind::Question
            && self.requires_response
            && self.response.is_none()
    }
}

/// Typed payload for each interaction kind
#[derive(Debug, Clone, PartialEq)]
pub enum InteractionBody {
    AgentThinking {
        text: String,
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
    /// Always requires a response
    Question {
        text: String,
    },
    UserResponse {
        text: String,
        question_id: Option<i64>,
        question: Option<String>,
    },
    Info {
        text: String,
        metadata: Value,
    },
    Error {
        text: String,
        metadata: Value,
    },
    Result {
        text: String,
        metadata: Value,
    },
}

/// An interaction about to be appended; the log assigns its sequence id
#[derive(Debug, Clone, PartialEq)]
pub struct NewInteraction {
    pub task_id: String,
    pub interaction_type: InteractionKind,
    pub content: String,
    pub metadata: Value,
    pub requires_response: bool,
}

impl NewInteraction {
    pub fn new(task_id: &str, body: InteractionBody) -> Self {
        let (interaction_type, content, metadata) = match body {
            InteractionBody::AgentThinking { text } => (InteractionKind::AgentThinking, text, json!({})),
            InteractionBody::ToolCall { tool, args } => (
                InteractionKind::ToolCall,
                format!("Calling tool '{}'", tool),
                json!({ "tool_name": tool, "args": args }),
            ),
            InteractionBody::ToolResult {
                tool,
                output,
                is_error,
            } => (
                InteractionKind::ToolResult,
                output,
                json!({ "tool_name": tool, "is_error": is_error }),
            ),
            InteractionBody::Question { text } => (InteractionKind::Question, text, json!({})),
            InteractionBody::UserResponse {
                text,
                question_id,
                question,
            } => {
                let metadata = match question_id {
                    Some(id) => json!({ "question_id": id, "question": question }),
                    None => json!({}),
                };
                (InteractionKind::UserResponse, text, metadata)
            }
            InteractionBody::Info { text, metadata } => (InteractionKind::Info, text, metadata),
            InteractionBody::Error { text, metadata } => (InteractionKind::Error, text, metadata),
            InteractionBody::Result { text, metadata } => (InteractionKind::Result, text, metadata),
        };

        Self {
            task_id: task_id.to_string(),
            requires_response: interaction_type == InteractionKind::Question,
            interaction_type,
            content,
            metadata,
        }
    }

    /// Builds an entry from an agent-emitted kind; only questions require a response
    pub fn emitted(task_id: &str, kind: InteractionKind, content: &str, metadata: Value) -> Self {
        Self {
            task_id: task_id.to_string(),
            interaction_type: kind,
            content: content.to_string(),
            metadata,
            requires_response: kind == InteractionKind::Question,
        }
    }

    pub fn info(task_id: &str, text: &str) -> Self {
        Self::new(
            task_id,
            InteractionBody::Info {
                text: text.to_string(),
                metadata: json!({}),
            },
        )
    }

    pub fn error(task_id: &str, text: &str) -> Self {
        Self::new(
            task_id,
            InteractionBody::Error {
                text: text.to_string(),
                metadata: json!({}),
            },
        )
    }
}

/// Filters accepted when reading a task's log
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct InteractionQuery {
    /// Only entries with an id strictly greater than this cursor
    #[serde(default)]
    pub since: Option<i64>,
    #[serde(default, rename = "type")]
    pub kind: Option<InteractionKind>,
    #[serde(default)]
    pub limit: Option<usize>,
    /// Only questions still waiting for a response
    #[serde(default)]
    pub pending_only: bool,
}

impl InteractionQuery {
    pub fn since(cursor: i64) -> Self {
        Self {
            since: Some(cursor),
            ..Default::default()
        }
    }

    pub fn pending() -> Self {
        Self {
            pending_only: true,
            ..Default::default()
        }
    }

    pub fn matches(&self, interaction: &Interaction) -> bool {
        self.since.map_or(true, |cursor| interaction.id > cursor)
            && self
                .kind
                .map_or(true, |kind| interaction.interaction_type == kind)
            && (!self.pending_only || interaction.is_pending_question())
    }
}

/// Explains why a response could not be recorded on `interaction`
pub fn response_conflict(interaction: &Interaction) -> crate::errors::Error {
    if interaction.interaction_type == InteractionKind::Question && interaction.requires_response {
        crate::errors::Error::AlreadyResponded(interaction.id)
    } else {
        crate::errors::Error::NotAQuestion(interaction.id)
    }
}

impl InteractionKind {
    pub const ALL: [InteractionKind; 8] = [
        InteractionKind::AgentThinking,
        InteractionKind::ToolCall,
        InteractionKind::ToolResult,
        InteractionKind::Question,
        InteractionKind::UserResponse,
        InteractionKind::Info,
        InteractionKind::Error,
        InteractionKind::Result,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionKind::AgentThinking => "agent_thinking",
            InteractionKind::ToolCall => "tool_call",
            InteractionKind::ToolResult => "tool_result",
            InteractionKind::Question => "question",
            InteractionKind::UserResponse => "user_response",
            InteractionKind::Info => "info",
            InteractionKind::Error => "error",
            InteractionKind::Result => "result",
        }
    }
}

impl fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InteractionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InteractionKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown interaction type '{}'", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_questions_require_a_response() {
        let question = NewInteraction::new(
            "t",
            InteractionBody::Question {
                text: "Which file?".into(),
            },
        );
        assert!(question.requires_response);

        let info = NewInteraction::info("t", "hello");
        assert!(!info.requires_response);

        let emitted = NewInteraction::emitted("t", InteractionKind::AgentThinking, "hm", json!({}));
        assert!(!emitted.requires_response);
    }

    #[test]
    fn test_tool_call_metadata_carries_name_and_args() {
        let call = NewInteraction::new(
            "t",
            InteractionBody::ToolCall {
                tool: "web_search".into(),
                args: json!({ "query": "rust" }),
            },
        );
        assert_eq!(call.interaction_type, InteractionKind::ToolCall);
        assert_eq!(call.metadata["tool_name"], "web_search");
        assert_eq!(call.metadata["args"]["query"], "rust");
    }

    #[test]
    fn test_kind_names_match_wire_format() {
        for kind in InteractionKind::ALL {
            let wire = serde_json::to_value(kind).unwrap();
            assert_eq!(wire, Value::String(kind.as_str().to_string()));
            assert_eq!(kind.as_str().parse::<InteractionKind>(), Ok(kind));
        }
    }
}
