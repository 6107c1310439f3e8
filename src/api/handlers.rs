use crate::api::errors::{api_error, ApiError};
use crate::core::{
    ApprovalStatus, ExecutionCoordinator, ExecutionRecord, Interaction, InteractionQuery,
    NewTask, Task, TaskFilter, ToolApprovalRequest,
};
use axum::http::StatusCode;
use axum::{
    extract::{Extension, Path, Query},
    Json,
};
use serde::Deserialize;

/// Request payload answering a pending question
#[derive(Deserialize)]
pub struct RespondRequest {
    pub response: String,
}

/// Request payload for a free-form message
#[derive(Deserialize)]
pub struct SendMessageRequest {
    pub message: String,
}

/// Request payload resolving a tool approval request
#[derive(Deserialize)]
pub struct ResolveApprovalRequest {
    pub approved: bool,
    #[serde(default)]
    pub note: Option<String>,
}

/// Query accepted by the approval listing
#[derive(Deserialize, Default)]
pub struct ApprovalFilter {
    #[serde(default)]
    pub status: Option<ApprovalStatus>,
    #[serde(default)]
    pub task_id: Option<String>,
}

/// Creates a new task in the `pending` state
///
/// # Arguments
/// * `coordinator` - Shared execution coordinator
/// * `payload` - Task description and optional settings
///
/// # Returns
/// * `Result<(StatusCode, Json<Task>), ApiError>` - The created task or an error
pub async fn create_task(
    Extension(coordinator): Extension<ExecutionCoordinator>,
    Json(payload): Json<NewTask>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    if payload.description.trim().is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "Task description must not be empty",
        ));
    }
    let task = coordinator.create_task(payload)?;
    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn list_tasks(
    Extension(coordinator): Extension<ExecutionCoordinator>,
    Query(filter): Query<TaskFilter>,
) -> Result<Json<Vec<Task>>, ApiError> {
    Ok(Json(coordinator.list_tasks(&filter)?))
}

pub async fn get_task(
    Path(id): Path<String>,
    Extension(coordinator): Extension<ExecutionCoordinator>,
) -> Result<Json<Task>, ApiError> {
    Ok(Json(coordinator.get_task(&id)?))
}

pub async fn delete_task(
    Path(id): Path<String>,
    Extension(coordinator): Extension<ExecutionCoordinator>,
) -> Result<StatusCode, ApiError> {
    coordinator.delete_task(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Starts the agent loop of a task
///
/// Returns as soon as the loop is scheduled; progress is observed through
/// the task and its interactions.
pub async fn execute_task(
    Path(id): Path<String>,
    Extension(coordinator): Extension<ExecutionCoordinator>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    let task = coordinator.execute(&id).await?;
    Ok((StatusCode::ACCEPTED, Json(task)))
}

pub async fn cancel_task(
    Path(id): Path<String>,
    Extension(coordinator): Extension<ExecutionCoordinator>,
) -> Result<Json<Task>, ApiError> {
    Ok(Json(coordinator.cancel(&id).await?))
}

pub async fn toggle_auto_mode(
    Path(id): Path<String>,
    Extension(coordinator): Extension<ExecutionCoordinator>,
) -> Result<Json<Task>, ApiError> {
    Ok(Json(coordinator.toggle_auto_mode(&id)?))
}

/// Reads a task's log
///
/// Without `since` this is the full ordered log; with `since` only entries
/// past that cursor are returned.
pub async fn get_interactions(
    Path(id): Path<String>,
    Extension(coordinator): Extension<ExecutionCoordinator>,
    Query(query): Query<InteractionQuery>,
) -> Result<Json<Vec<Interaction>>, ApiError> {
    Ok(Json(coordinator.interactions(&id, &query)?))
}

pub async fn get_pending_interactions(
    Path(id): Path<String>,
    Extension(coordinator): Extension<ExecutionCoordinator>,
) -> Result<Json<Vec<Interaction>>, ApiError> {
    Ok(Json(
        coordinator.interactions(&id, &InteractionQuery::pending())?,
    ))
}

/// Lists when the task's runs started and how they ended
pub async fn get_execution_log(
    Path(id): Path<String>,
    Extension(coordinator): Extension<ExecutionCoordinator>,
) -> Result<Json<Vec<ExecutionRecord>>, ApiError> {
    Ok(Json(coordinator.execution_log(&id)?))
}

/// Answers a pending question and resumes the task
pub async fn respond_to_interaction(
    Path((id, interaction_id)): Path<(String, i64)>,
    Extension(coordinator): Extension<ExecutionCoordinator>,
    Json(payload): Json<RespondRequest>,
) -> Result<Json<Interaction>, ApiError> {
    let answered = coordinator
        .submit_response(&id, interaction_id, &payload.response)
        .await?;
    Ok(Json(answered))
}

pub async fn send_message(
    Path(id): Path<String>,
    Extension(coordinator): Extension<ExecutionCoordinator>,
    Json(payload): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<Interaction>), ApiError> {
    if payload.message.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "Message must not be empty"));
    }
    let echo = coordinator.send_message(&id, &payload.message).await?;
    Ok((StatusCode::CREATED, Json(echo)))
}

pub async fn list_approvals(
    Extension(coordinator): Extension<ExecutionCoordinator>,
    Query(filter): Query<ApprovalFilter>,
) -> Result<Json<Vec<ToolApprovalRequest>>, ApiError> {
    let approvals = coordinator.list_approvals(filter.status, filter.task_id.as_deref())?;
    Ok(Json(approvals))
}

pub async fn get_approval(
    Path(id): Path<String>,
    Extension(coordinator): Extension<ExecutionCoordinator>,
) -> Result<Json<ToolApprovalRequest>, ApiError> {
    Ok(Json(coordinator.get_approval(&id)?))
}

/// Approves or rejects a tool request and resumes the waiting task
pub async fn resolve_approval(
    Path(id): Path<String>,
    Extension(coordinator): Extension<ExecutionCoordinator>,
    Json(payload): Json<ResolveApprovalRequest>,
) -> Result<Json<ToolApprovalRequest>, ApiError> {
    let resolved = coordinator
        .resolve_approval(&id, payload.approved, payload.note.as_deref())
        .await?;
    Ok(Json(resolved))
}
