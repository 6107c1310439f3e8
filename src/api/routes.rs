//! API routes configuration module

use crate::api::handlers::{
    cancel_task, create_task, delete_task, execute_task, get_approval, get_execution_log,
    get_interactions, get_pending_interactions, get_task, list_approvals, list_tasks, resolve_approval,
    respond_to_interaction, send_message, toggle_auto_mode,
};
use crate::core::ExecutionCoordinator;
use axum::{
    routing::{get, post},
    Extension, Router,
};

/// Creates and configures the API router with all routes
///
/// # Arguments
/// * `coordinator` - Execution coordinator shared across handlers
///
/// # Returns
/// * `Router` - Configured router with all API endpoints and middleware
pub fn app(coordinator: ExecutionCoordinator) -> Router {
    Router::new()
        .route("/tasks", post(create_task).get(list_tasks))
        .route("/tasks/:id", get(get_task).delete(delete_task))
        .route("/tasks/:id/execute", post(execute_task))
        .route("/tasks/:id/cancel", post(cancel_task))
        .route("/tasks/:id/auto-mode", post(toggle_auto_mode))
        .route("/tasks/:id/logs", get(get_execution_log))
        .route("/tasks/:id/interactions", get(get_interactions))
        .route(
            "/tasks/:id/interactions/pending",
            get(get_pending_interactions),
        )
        .route(
            "/tasks/:id/interactions/send-message",
            post(send_message),
        )
        .route(
            "/tasks/:id/interactions/:interaction_id/respond",
            post(respond_to_interaction),
        )
        .route("/approvals", get(list_approvals))
        .route("/approvals/:id", get(get_approval))
        .route("/approvals/:id/resolve", post(resolve_approval))
        .layer(Extension(coordinator))
}
