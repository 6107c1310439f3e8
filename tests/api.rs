mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use common::{ask, finish, harness, Harness};
use serde_json::{json, Value};
use taskpilot::api::routes;
use taskpilot::core::DetailedStatus;
use tower::ServiceExt;

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    let request = match body {
        Some(body) => request.body(Body::from(body.to_string())).unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn app(h: &Harness) -> Router {
    routes::app(h.coordinator.clone())
}

#[tokio::test]
async fn test_task_lifecycle_over_http() {
    let h = harness(vec![ask("Which city?"), finish(json!({ "city": "Lyon" }))]);
    let app = app(&h);

    let (status, task) = send(
        &app,
        "POST",
        "/tasks",
        Some(json!({ "description": "Find the weather for a city", "priority": "high" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(task["detailed_status"], "pending");
    assert_eq!(task["priority"], "high");
    assert_eq!(task["title"], "Find the weather for a city");
    let id = task["id"].as_str().unwrap().to_string();

    let (status, started) = send(&app, "POST", &format!("/tasks/{}/execute", id), None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(started["detailed_status"], "running");
    h.wait_for(&id, DetailedStatus::WaitingInput).await;

    let (status, pending) = send(
        &app,
        "GET",
        &format!("/tasks/{}/interactions/pending", id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(pending.as_array().unwrap().len(), 1);
    let question_id = pending[0]["id"].as_i64().unwrap();

    let (status, answered) = send(
        &app,
        "POST",
        &format!("/tasks/{}/interactions/{}/respond", id, question_id),
        Some(json!({ "response": "Lyon" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(answered["response"], "Lyon");

    let (status, _) = send(
        &app,
        "POST",
        &format!("/tasks/{}/interactions/{}/respond", id, question_id),
        Some(json!({ "response": "Paris" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    h.wait_for(&id, DetailedStatus::Completed).await;
    let (_, done) = send(&app, "GET", &format!("/tasks/{}", id), None).await;
    assert_eq!(done["status"], "completed");
    assert_eq!(done["result"]["city"], "Lyon");

    let (_, full) = send(&app, "GET", &format!("/tasks/{}/interactions", id), None).await;
    assert_eq!(full.as_array().unwrap().len(), 3);
    let (_, diff) = send(
        &app,
        "GET",
        &format!("/tasks/{}/interactions?since=1", id),
        None,
    )
    .await;
    let ids: Vec<_> = diff
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![2, 3]);

    let (_, results) = send(
        &app,
        "GET",
        &format!("/tasks/{}/interactions?type=result", id),
        None,
    )
    .await;
    assert_eq!(results.as_array().unwrap().len(), 1);

    let (status, listed) = send(&app, "GET", "/tasks?status=completed", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let (status, logs) = send(&app, "GET", &format!("/tasks/{}/logs", id), None).await;
    assert_eq!(status, StatusCode::OK);
    let actions: Vec<_> = logs
        .as_array()
        .unwrap()
        .iter()
        .map(|l| l["action"].as_str().unwrap())
        .collect();
    assert_eq!(actions, vec!["task_started", "task_completed"]);
    assert_eq!(logs[1]["status"], "success");
    assert_eq!(logs[1]["output"]["city"], "Lyon");
    assert!(logs[1]["execution_time"].is_number());
}

#[tokio::test]
async fn test_error_codes() {
    let h = harness(vec![ask("Anything?")]);
    let app = app(&h);

    let (status, body) = send(&app, "GET", "/tasks/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], 404);
    let (status, _) = send(&app, "GET", "/tasks/missing/logs", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "POST", "/tasks", Some(json!({ "description": "  " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let task = h.create("conflicts");
    let (status, _) = send(&app, "POST", &format!("/tasks/{}/cancel", task.id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    send(&app, "POST", &format!("/tasks/{}/execute", task.id), None).await;
    h.wait_for(&task.id, DetailedStatus::WaitingInput).await;
    let (status, _) = send(&app, "POST", &format!("/tasks/{}/execute", task.id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, toggled) =
        send(&app, "POST", &format!("/tasks/{}/auto-mode", task.id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(toggled["auto_mode"], true);

    let (status, _) = send(&app, "DELETE", &format!("/tasks/{}", task.id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, cancelled) =
        send(&app, "POST", &format!("/tasks/{}/cancel", task.id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["detailed_status"], "cancelled");

    let (status, _) = send(
        &app,
        "POST",
        &format!("/tasks/{}/interactions/send-message", task.id),
        Some(json!({ "message": "still there?" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(&app, "DELETE", &format!("/tasks/{}", task.id), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_approval_endpoints() {
    let h = common::harness_with(
        std::sync::Arc::new(taskpilot::db::InMemoryRepository::new()),
        vec![
            common::call("echo", json!({ "text": "approved" })),
            finish(json!("ok")),
        ],
        common::TestTools::default(),
    );
    let app = app(&h);
    let task = h.create("needs a tool");
    send(&app, "POST", &format!("/tasks/{}/execute", task.id), None).await;
    h.wait_for(&task.id, DetailedStatus::WaitingApproval).await;

    let (status, approvals) = send(&app, "GET", "/approvals?status=pending", None).await;
    assert_eq!(status, StatusCode::OK);
    let request_id = approvals[0]["id"].as_str().unwrap().to_string();

    let (status, fetched) = send(&app, "GET", &format!("/approvals/{}", request_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["requested_tools"], json!(["echo"]));

    let (status, resolved) = send(
        &app,
        "POST",
        &format!("/approvals/{}/resolve", request_id),
        Some(json!({ "approved": true, "note": "go ahead" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resolved["status"], "approved");

    let (status, _) = send(
        &app,
        "POST",
        &format!("/approvals/{}/resolve", request_id),
        Some(json!({ "approved": false })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    h.wait_for(&task.id, DetailedStatus::Completed).await;
}
