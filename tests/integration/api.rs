//! API integration tests.
//!
//! These drive the management router directly with `tower::ServiceExt`
//! and verify the versioned endpoints against live scheduler state.

use relais::api::{ApiState, build_router, create_api_state};
use relais::{InMemoryQueue, InMemoryStorage, LogNotifier, Scheduler, Storage, TaskQueue};

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tower::ServiceExt;

/// Create a test API state over an idle scheduler.
///
/// The returned sender must stay alive for the duration of the test; the
/// engine treats a dropped shutdown sender as a stop signal.
async fn test_state() -> (ApiState, watch::Sender<bool>) {
    let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
    let queue = Arc::new(InMemoryQueue::new());
    queue.ensure_group("tasks", "workers").await.unwrap();

    let scheduler = Scheduler::new(
        storage.clone(),
        queue,
        Arc::new(LogNotifier::new()),
        "tasks",
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (handle, _task) = scheduler.start(shutdown_rx);

    (create_api_state(handle, storage), shutdown_tx)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_empty(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn read_json(response: axum::response::Response) -> Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

/// Test: Health endpoint responds with status ok.
#[tokio::test]
async fn test_health_endpoint() {
    let (state, _shutdown) = test_state().await;
    let router = build_router(state);

    let response = router.oneshot(get("/api/v1/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = read_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

/// Test: Scheduler state endpoint reports the running engine.
#[tokio::test]
async fn test_scheduler_state_endpoint() {
    let (state, _shutdown) = test_state().await;
    let router = build_router(state);

    let response = router
        .oneshot(get("/api/v1/scheduler/state"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = read_json(response).await;
    assert_eq!(json["state"], "running");
    assert_eq!(json["is_running"], true);
    assert_eq!(json["is_paused"], false);
}

/// Test: Pause and resume the scheduler via the API.
#[tokio::test]
async fn test_pause_resume_scheduler() {
    let (state, _shutdown) = test_state().await;
    let router = build_router(state);

    let response = router
        .clone()
        .oneshot(post_empty("/api/v1/scheduler/pause"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .clone()
        .oneshot(get("/api/v1/scheduler/state"))
        .await
        .unwrap();
    let json = read_json(response).await;
    assert_eq!(json["is_paused"], true);

    let response = router
        .clone()
        .oneshot(post_empty("/api/v1/scheduler/resume"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .oneshot(get("/api/v1/scheduler/state"))
        .await
        .unwrap();
    let json = read_json(response).await;
    assert_eq!(json["is_running"], true);
}

/// Test: Create a job, then read it back individually and in the list.
#[tokio::test]
async fn test_create_and_get_job() {
    let (state, _shutdown) = test_state().await;
    let router = build_router(state);

    let body = json!({
        "id": "report",
        "name": "Daily Report",
        "kind": "webhook",
        "payload": {"url": "https://example.com/hook"},
        "timeout_secs": 30
    });
    let response = router
        .clone()
        .oneshot(json_request("POST", "/api/v1/jobs", body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let json = read_json(response).await;
    assert_eq!(json["id"], "report");
    assert_eq!(json["kind"], "webhook");
    assert_eq!(json["timeout_secs"], 30);

    let response = router
        .clone()
        .oneshot(get("/api/v1/jobs/report"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = read_json(response).await;
    assert_eq!(json["name"], "Daily Report");
    assert_eq!(json["payload"]["url"], "https://example.com/hook");

    let response = router.oneshot(get("/api/v1/jobs")).await.unwrap();
    let json = read_json(response).await;
    assert_eq!(json["count"], 1);
    assert_eq!(json["jobs"][0]["id"], "report");
}

/// Test: Invalid job definitions are rejected with 400.
#[tokio::test]
async fn test_create_job_rejects_invalid_definition() {
    let (state, _shutdown) = test_state().await;
    let router = build_router(state);

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/jobs",
            json!({"id": "", "name": "Nameless", "kind": "command"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = router
        .oneshot(json_request(
            "POST",
            "/api/v1/jobs",
            json!({"id": "j", "name": "J", "kind": "command", "timeout_secs": 0}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = read_json(response).await;
    assert_eq!(json["code"], "BAD_REQUEST");
}

/// Test: Creating the same job twice returns 409.
#[tokio::test]
async fn test_duplicate_job_returns_conflict() {
    let (state, _shutdown) = test_state().await;
    let router = build_router(state);

    let body = json!({"id": "once", "name": "Once", "kind": "command"});
    let response = router
        .clone()
        .oneshot(json_request("POST", "/api/v1/jobs", body.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = router
        .oneshot(json_request("POST", "/api/v1/jobs", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

/// Test: Get non-existent job returns 404.
#[tokio::test]
async fn test_get_nonexistent_job_returns_404() {
    let (state, _shutdown) = test_state().await;
    let router = build_router(state);

    let response = router
        .oneshot(get("/api/v1/jobs/nonexistent"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = read_json(response).await;
    assert_eq!(json["code"], "NOT_FOUND");
}

/// Test: PUT replaces the job definition; a mismatched body id is rejected.
#[tokio::test]
async fn test_update_job_replaces_definition() {
    let (state, _shutdown) = test_state().await;
    let router = build_router(state);

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/jobs",
            json!({"id": "tune", "name": "Before", "kind": "command"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = router
        .clone()
        .oneshot(json_request(
            "PUT",
            "/api/v1/jobs/tune",
            json!({"id": "tune", "name": "After", "kind": "command", "timeout_secs": 120}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = read_json(response).await;
    assert_eq!(json["name"], "After");
    assert_eq!(json["timeout_secs"], 120);

    let response = router
        .clone()
        .oneshot(json_request(
            "PUT",
            "/api/v1/jobs/tune",
            json!({"id": "other", "name": "X", "kind": "command"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = router.oneshot(get("/api/v1/jobs/tune")).await.unwrap();
    let json = read_json(response).await;
    assert_eq!(json["name"], "After");
}

/// Test: Deleting a job removes it and its schedules.
#[tokio::test]
async fn test_delete_job_cascades_to_schedules() {
    let (state, _shutdown) = test_state().await;
    let router = build_router(state);

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/jobs",
            json!({"id": "gone", "name": "Gone", "kind": "command"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/schedules",
            json!({"id": "gone-daily", "job_id": "gone", "expression": "@daily"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/v1/jobs/gone")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = router
        .clone()
        .oneshot(get("/api/v1/jobs/gone"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = router.oneshot(get("/api/v1/schedules")).await.unwrap();
    let json = read_json(response).await;
    assert_eq!(json["count"], 0);
}

/// Test: Trigger a job and find the attempt in its history.
#[tokio::test]
async fn test_trigger_job_and_list_history() {
    let (state, _shutdown) = test_state().await;
    let router = build_router(state);

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/jobs",
            json!({"id": "manual", "name": "Manual", "kind": "command"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = router
        .clone()
        .oneshot(post_empty("/api/v1/jobs/manual/trigger"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = read_json(response).await;
    assert_eq!(json["job_id"], "manual");
    assert!(json["history_id"].is_string());
    assert!(json["message"].as_str().unwrap().contains("triggered"));
    let history_id = json["history_id"].as_str().unwrap().to_string();

    // No worker is consuming in this test, so the row stays running.
    let response = router
        .oneshot(get("/api/v1/jobs/manual/history"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = read_json(response).await;
    assert_eq!(json["count"], 1);
    assert_eq!(json["history"][0]["id"], history_id.as_str());
    assert_eq!(json["history"][0]["status"], "running");
    assert_eq!(json["history"][0]["attempt"], 1);
}

/// Test: Triggering an unknown job returns 404.
#[tokio::test]
async fn test_trigger_unknown_job_returns_404() {
    let (state, _shutdown) = test_state().await;
    let router = build_router(state);

    let response = router
        .oneshot(post_empty("/api/v1/jobs/ghost/trigger"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

/// Test: History for an unknown job is 404, not an empty list.
#[tokio::test]
async fn test_history_for_unknown_job_returns_404() {
    let (state, _shutdown) = test_state().await;
    let router = build_router(state);

    let response = router
        .oneshot(get("/api/v1/jobs/ghost/history"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

/// Test: Schedule creation validates the expression and the job reference.
#[tokio::test]
async fn test_create_schedule_validations() {
    let (state, _shutdown) = test_state().await;
    let router = build_router(state);

    // Unknown job reference.
    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/schedules",
            json!({"id": "s1", "job_id": "missing", "expression": "@daily"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = read_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("job not found"));

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/jobs",
            json!({"id": "real", "name": "Real", "kind": "command"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    // Bad cron expression.
    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/schedules",
            json!({"id": "s1", "job_id": "real", "expression": "not cron"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Valid schedule.
    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/schedules",
            json!({"id": "s1", "job_id": "real", "expression": "*/5 * * * *"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = read_json(response).await;
    assert_eq!(json["id"], "s1");
    assert_eq!(json["active"], true);
    assert_eq!(json["timezone"], "UTC");

    let response = router.oneshot(get("/api/v1/schedules/s1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = read_json(response).await;
    assert_eq!(json["job_id"], "real");
}

/// Test: Partial schedule updates change the expression or active flag.
#[tokio::test]
async fn test_update_schedule_expression_and_active() {
    let (state, _shutdown) = test_state().await;
    let router = build_router(state);

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/jobs",
            json!({"id": "j", "name": "J", "kind": "command"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/schedules",
            json!({"id": "s", "job_id": "j", "expression": "@hourly"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = router
        .clone()
        .oneshot(json_request(
            "PUT",
            "/api/v1/schedules/s",
            json!({"expression": "@daily"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = read_json(response).await;
    assert_eq!(json["expression"], "@daily");
    // Replacing the expression resets the next fire time.
    assert!(json["next_execution"].is_null());

    let response = router
        .clone()
        .oneshot(json_request(
            "PUT",
            "/api/v1/schedules/s",
            json!({"active": false}),
        ))
        .await
        .unwrap();
    let json = read_json(response).await;
    assert_eq!(json["active"], false);

    // An invalid replacement expression is rejected and nothing changes.
    let response = router
        .clone()
        .oneshot(json_request(
            "PUT",
            "/api/v1/schedules/s",
            json!({"expression": "garbage"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = router.oneshot(get("/api/v1/schedules/s")).await.unwrap();
    let json = read_json(response).await;
    assert_eq!(json["expression"], "@daily");
}

/// Test: Delete a schedule.
#[tokio::test]
async fn test_delete_schedule() {
    let (state, _shutdown) = test_state().await;
    let router = build_router(state);

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/jobs",
            json!({"id": "j", "name": "J", "kind": "command"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/schedules",
            json!({"id": "s", "job_id": "j", "expression": "@daily"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/v1/schedules/s")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = router.oneshot(get("/api/v1/schedules/s")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
