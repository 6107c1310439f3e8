use crate::core::{
    ExecutionRecord, Interaction, NewExecutionRecord, NewInteraction, Task, ToolApprovalRequest,
};
use crate::errors::Error;
use crate::schema::{execution_logs, task_interactions, tasks, tool_approval_requests};
use chrono::{DateTime, SecondsFormat, Utc};
use diesel::{Insertable, Queryable, Selectable};
use std::str::FromStr;

/// Row of the `tasks` table
#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = tasks)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TaskRow {
    pub id: String,
    pub title: String,
    pub description: String,
    pub priority: String,
    pub mode: String,
    pub auto_mode: bool,
    pub assigned_to: Option<String>,
    /// JSON array of tool names
    pub additional_tool_names: String,
    pub status: String,
    pub detailed_status: String,
    pub result_json: Option<String>,
    pub error_message: Option<String>,
    /// JSON serialized continuation of the agent loop
    pub continuation: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

/// Row of the `task_interactions` table
#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = task_interactions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct InteractionRow {
    pub task_id: String,
    pub id: i64,
    pub interaction_type: String,
    pub content: String,
    pub metadata: String,
    pub requires_response: bool,
    pub response: Option<String>,
    pub created_at: String,
    pub responded_at: Option<String>,
}

/// Row of the `tool_approval_requests` table
#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = tool_approval_requests)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ApprovalRow {
    pub id: String,
    pub agent_id: Option<String>,
    pub task_id: Option<String>,
    pub requested_tools: String,
    pub reason: String,
    pub status: String,
    pub requested_at: String,
    pub responded_at: Option<String>,
    pub response_note: Option<String>,
}

/// Row of the `execution_logs` table
#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = execution_logs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ExecutionRow {
    pub task_id: String,
    pub id: i64,
    pub agent_id: Option<String>,
    pub action: String,
    pub status: String,
    pub output_json: Option<String>,
    pub error_message: Option<String>,
    pub execution_time: Option<f64>,
    pub created_at: String,
}

fn corrupt(what: &str, detail: impl std::fmt::Display) -> Error {
    Error::RepositoryUnavailable(format!("unreadable {} column: {}", what, detail))
}

fn parse_enum<T: FromStr<Err = String>>(what: &str, value: &str) -> Result<T, Error> {
    value.parse::<T>().map_err(|e| corrupt(what, e))
}

/// Fixed-width UTC timestamps so that text ordering matches time ordering
pub(crate) fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_time(value: &str) -> Result<DateTime<Utc>, Error> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| corrupt("timestamp", e))
}

fn parse_optional_time(value: Option<&str>) -> Result<Option<DateTime<Utc>>, Error> {
    value.map(parse_time).transpose()
}

impl TaskRow {
    pub fn from_task(task: &Task) -> Result<Self, Error> {
        Ok(Self {
            id: task.id.clone(),
            title: task.title.clone(),
            description: task.description.clone(),
            priority: task.priority.to_string(),
            mode: task.mode.to_string(),
            auto_mode: task.auto_mode,
            assigned_to: task.assigned_to.clone(),
            additional_tool_names: serde_json::to_string(&task.additional_tool_names)?,
            status: task.status.to_string(),
            detailed_status: task.detailed_status.to_string(),
            result_json: task.result.as_ref().map(serde_json::to_string).transpose()?,
            error_message: task.error_message.clone(),
            continuation: None,
            created_at: format_time(&task.created_at),
            updated_at: format_time(&task.updated_at),
            started_at: task.started_at.as_ref().map(format_time),
            completed_at: task.completed_at.as_ref().map(format_time),
        })
    }
}

impl TryFrom<TaskRow> for Task {
    type Error = Error;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        Ok(Task {
            priority: parse_enum("priority", &row.priority)?,
            mode: parse_enum("mode", &row.mode)?,
            status: parse_enum("status", &row.status)?,
            detailed_status: parse_enum("detailed_status", &row.detailed_status)?,
            additional_tool_names: serde_json::from_str(&row.additional_tool_names)?,
            result: row
                .result_json
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            created_at: parse_time(&row.created_at)?,
            updated_at: parse_time(&row.updated_at)?,
            started_at: parse_optional_time(row.started_at.as_deref())?,
            completed_at: parse_optional_time(row.completed_at.as_deref())?,
            id: row.id,
            title: row.title,
            description: row.description,
            auto_mode: row.auto_mode,
            assigned_to: row.assigned_to,
            error_message: row.error_message,
        })
    }
}

impl InteractionRow {
    pub fn from_new(new: &NewInteraction, id: i64, created_at: DateTime<Utc>) -> Result<Self, Error> {
        Ok(Self {
            task_id: new.task_id.clone(),
            id,
            interaction_type: new.interaction_type.to_string(),
            content: new.content.clone(),
            metadata: serde_json::to_string(&new.metadata)?,
            requires_response: new.requires_response,
            response: None,
            created_at: format_time(&created_at),
            responded_at: None,
        })
    }
}

impl TryFrom<InteractionRow> for Interaction {
    type Error = Error;

    fn try_from(row: InteractionRow) -> Result<Self, Self::Error> {
        Ok(Interaction {
            interaction_type: parse_enum("interaction_type", &row.interaction_type)?,
            metadata: serde_json::from_str(&row.metadata)?,
            created_at: parse_time(&row.created_at)?,
            responded_at: parse_optional_time(row.responded_at.as_deref())?,
            task_id: row.task_id,
            id: row.id,
            content: row.content,
            requires_response: row.requires_response,
            response: row.response,
        })
    }
}

impl ApprovalRow {
    pub fn from_request(request: &ToolApprovalRequest) -> Result<Self, Error> {
        Ok(Self {
            id: request.id.clone(),
            agent_id: request.agent_id.clone(),
            task_id: request.task_id.clone(),
            requested_tools: serde_json::to_string(&request.requested_tools)?,
            reason: request.reason.clone(),
            status: request.status.to_string(),
            requested_at: format_time(&request.requested_at),
            responded_at: request.responded_at.as_ref().map(format_time),
            response_note: request.response_note.clone(),
        })
    }
}

impl TryFrom<ApprovalRow> for ToolApprovalRequest {
    type Error = Error;

    fn try_from(row: ApprovalRow) -> Result<Self, Self::Error> {
        Ok(ToolApprovalRequest {
            requested_tools: serde_json::from_str(&row.requested_tools)?,
            status: parse_enum("status", &row.status)?,
            requested_at: parse_time(&row.requested_at)?,
            responded_at: parse_optional_time(row.responded_at.as_deref())?,
            id: row.id,
            agent_id: row.agent_id,
            task_id: row.task_id,
            reason: row.reason,
            response_note: row.response_note,
        })
    }
}

impl ExecutionRow {
    pub fn from_new(
        new: &NewExecutionRecord,
        id: i64,
        created_at: DateTime<Utc>,
    ) -> Result<Self, Error> {
        Ok(Self {
            task_id: new.task_id.clone(),
            id,
            agent_id: new.agent_id.clone(),
            action: new.action.to_string(),
            status: new.status.to_string(),
            output_json: new.output.as_ref().map(serde_json::to_string).transpose()?,
            error_message: new.error_message.clone(),
            execution_time: new.execution_time,
            created_at: format_time(&created_at),
        })
    }
}

impl TryFrom<ExecutionRow> for ExecutionRecord {
    type Error = Error;

    fn try_from(row: ExecutionRow) -> Result<Self, Self::Error> {
        Ok(ExecutionRecord {
            action: parse_enum("action", &row.action)?,
            status: parse_enum("status", &row.status)?,
            output: row
                .output_json
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            created_at: parse_time(&row.created_at)?,
            task_id: row.task_id,
            id: row.id,
            agent_id: row.agent_id,
            error_message: row.error_message,
            execution_time: row.execution_time,
        })
    }
}
