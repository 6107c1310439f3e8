use super::task_state::{DetailedStatus, LifecycleEvent, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Maximum length of a title derived from the description
const DERIVED_TITLE_LEN: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

/// How the task was meant to be run when it was created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskMode {
    #[default]
    Manual,
    Auto,
    Team,
}

/// Represents a delegated task with its lifecycle state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Opaque immutable identifier
    pub id: String,
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub mode: TaskMode,
    /// Runtime-toggleable, independent of `mode`
    pub auto_mode: bool,
    /// Agent profile the task is assigned to
    pub assigned_to: Option<String>,
    /// Tools granted to this task on top of the agent's own set
    pub additional_tool_names: Vec<String>,
    pub status: TaskStatus,
    pub detailed_status: DetailedStatus,
    /// Opaque success payload
    pub result: Option<Value>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Payload used to create a task
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewTask {
    #[serde(default)]
    pub title: Option<String>,
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub mode: TaskMode,
    #[serde(default)]
    pub auto_mode: Option<bool>,
    #[serde(default)]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub additional_tool_names: Vec<String>,
}

impl NewTask {
    pub fn new(description: &str) -> Self {
        Self {
            description: description.to_string(),
            ..Default::default()
        }
    }

    /// Materializes a `pending` task with a fresh identifier
    pub fn into_task(self) -> Task {
        let now = Utc::now();
        let title = match self.title {
            Some(title) if !title.trim().is_empty() => title,
            _ => self.description.chars().take(DERIVED_TITLE_LEN).collect(),
        };
        let auto_mode = self.auto_mode.unwrap_or(self.mode == TaskMode::Auto);

        Task {
            id: uuid::Uuid::new_v4().to_string(),
            title,
            description: self.description,
            priority: self.priority,
            mode: self.mode,
            auto_mode,
            assigned_to: self.assigned_to,
            additional_tool_names: self.additional_tool_names,
            status: TaskStatus::Pending,
            detailed_status: DetailedStatus::Pending,
            result: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }
}

/// Filters accepted by task listings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskFilter {
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub detailed_status: Option<DetailedStatus>,
    #[serde(default)]
    pub agent_id: Option<String>,
}

impl TaskFilter {
    pub fn matches(&self, task: &Task) -> bool {
        self.status.map_or(true, |s| task.status == s)
            && self.detailed_status.map_or(true, |s| task.detailed_status == s)
            && self
                .agent_id
                .as_deref()
                .map_or(true, |a| task.assigned_to.as_deref() == Some(a))
    }
}

/// A compare-and-set status change applied atomically by the repository
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    /// State the task must currently be in
    pub expected: DetailedStatus,
    pub event: LifecycleEvent,
    pub next: DetailedStatus,
    pub result: Option<Value>,
    pub error_message: Option<String>,
}

impl StatusChange {
    /// Validates `event` against the lifecycle table
    pub fn new(
        expected: DetailedStatus,
        event: LifecycleEvent,
    ) -> Result<Self, crate::errors::Error> {
        Ok(Self {
            expected,
            event,
            next: expected.apply(event)?,
            result: None,
            error_message: None,
        })
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_error(mut self, message: &str) -> Self {
        self.error_message = Some(message.to_string());
        self
    }

    /// Applies the change to an in-memory task
    pub fn apply_to(&self, task: &mut Task) {
        let now = Utc::now();
        if self.event == LifecycleEvent::Execute {
            task.started_at = Some(now);
            task.completed_at = None;
            task.error_message = None;
        }
        if self.next.is_terminal() {
            task.completed_at = Some(now);
        }
        if let Some(result) = &self.result {
            task.result = Some(result.clone());
        }
        if let Some(message) = &self.error_message {
            task.error_message = Some(message.clone());
        }
        task.detailed_status = self.next;
        task.status = self.next.project();
        task.updated_at = now;
    }
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl TaskMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskMode::Manual => "manual",
            TaskMode::Auto => "auto",
            TaskMode::Team => "team",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for TaskMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            _ => Err(format!("unknown priority '{}'", s)),
        }
    }
}

impl FromStr for TaskMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(TaskMode::Manual),
            "auto" => Ok(TaskMode::Auto),
            "team" => Ok(TaskMode::Team),
            _ => Err(format!("unknown task mode '{}'", s)),
        }
    }
}
