use super::task::Task;
use super::task_state::DetailedStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Lifecycle milestones recorded in a task's execution log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionAction {
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    TaskCancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Started,
    Success,
    Failed,
    Cancelled,
}

/// One entry of a task's execution log
///
/// Unlike the interaction log, which narrates the conversation, this log
/// only tracks when runs started and how they ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Per-task sequence number starting at 1
    pub id: i64,
    pub task_id: String,
    pub agent_id: Option<String>,
    pub action: ExecutionAction,
    pub status: ActionStatus,
    pub output: Option<Value>,
    pub error_message: Option<String>,
    /// Seconds between the start of the run and this entry
    pub execution_time: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// An execution log entry before storage assigns its id
#[derive(Debug, Clone, PartialEq)]
pub struct NewExecutionRecord {
    pub task_id: String,
    pub agent_id: Option<String>,
    pub action: ExecutionAction,
    pub status: ActionStatus,
    pub output: Option<Value>,
    pub error_message: Option<String>,
    pub execution_time: Option<f64>,
}

impl NewExecutionRecord {
    /// Describes the milestone `task` has just reached
    ///
    /// Returns `None` for statuses that are not milestones (pending and the
    /// two waiting states).
    pub fn for_task(task: &Task) -> Option<Self> {
        let (action, status) = match task.detailed_status {
            DetailedStatus::Running => (ExecutionAction::TaskStarted, ActionStatus::Started),
            DetailedStatus::Completed => (ExecutionAction::TaskCompleted, ActionStatus::Success),
            DetailedStatus::Failed => (ExecutionAction::TaskFailed, ActionStatus::Failed),
            DetailedStatus::Cancelled => (ExecutionAction::TaskCancelled, ActionStatus::Cancelled),
            _ => return None,
        };

        let execution_time = match (task.started_at, task.completed_at) {
            (Some(started), Some(completed)) if task.detailed_status.is_terminal() => {
                Some((completed - started).num_microseconds().unwrap_or(0) as f64 / 1e6)
            }
            _ => None,
        };

        Some(Self {
            task_id: task.id.clone(),
            agent_id: task.assigned_to.clone(),
            action,
            status,
            output: match action {
                ExecutionAction::TaskCompleted => task.result.clone(),
                _ => None,
            },
            error_message: match action {
                ExecutionAction::TaskFailed | ExecutionAction::TaskCancelled => {
                    task.error_message.clone()
                }
                _ => None,
            },
            execution_time,
        })
    }

    /// Materializes the entry with the id chosen by storage
    pub fn into_record(self, id: i64, created_at: DateTime<Utc>) -> ExecutionRecord {
        ExecutionRecord {
            id,
            task_id: self.task_id,
            agent_id: self.agent_id,
            action: self.action,
            status: self.status,
            output: self.output,
            error_message: self.error_message,
            execution_time: self.execution_time,
            created_at,
        }
    }
}

impl ExecutionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionAction::TaskStarted => "task_started",
            ExecutionAction::TaskCompleted => "task_completed",
            ExecutionAction::TaskFailed => "task_failed",
            ExecutionAction::TaskCancelled => "task_cancelled",
        }
    }
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Started => "started",
            ActionStatus::Success => "success",
            ActionStatus::Failed => "failed",
            ActionStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ExecutionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task_started" => Ok(ExecutionAction::TaskStarted),
            "task_completed" => Ok(ExecutionAction::TaskCompleted),
            "task_failed" => Ok(ExecutionAction::TaskFailed),
            "task_cancelled" => Ok(ExecutionAction::TaskCancelled),
            _ => Err(format!("unknown execution action '{}'", s)),
        }
    }
}

impl FromStr for ActionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(ActionStatus::Started),
            "success" => Ok(ActionStatus::Success),
            "failed" => Ok(ActionStatus::Failed),
            "cancelled" => Ok(ActionStatus::Cancelled),
            _ => Err(format!("unknown action status '{}'", s)),
        }
    }
}
