//! API integration tests

use axum::body::Body;
use axum::Router;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

use vework::{api, AppState};

async fn setup_app(gateway_url: &str) -> (Router, Arc<AppState>) {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    let state = AppState::new(pool, gateway_url);
    (api::router(state.clone()), state)
}

fn post_json(uri: &str, body: serde_json::Value) -> hyper::Request<Body> {
    hyper::Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn patch_json(uri: &str, body: serde_json::Value) -> hyper::Request<Body> {
    hyper::Request::builder()
        .method("PATCH")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> hyper::Request<Body> {
    hyper::Request::builder()
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _state) = setup_app("http://localhost:1").await;

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), hyper::StatusCode::OK);
}

#[tokio::test]
async fn test_create_task_starts_pending() {
    let (app, _state) = setup_app("http://localhost:1").await;
    let customer_id = Uuid::new_v4();

    let response = app
        .oneshot(post_json(
            "/tasks",
            serde_json::json!({
                "customer_id": customer_id,
                "title": "Write the quarterly report",
                "description": "Cover Q3",
                "priority": "high"
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), hyper::StatusCode::CREATED);
    let task = body_json(response).await;
    assert_eq!(task["status"], "pending");
    assert_eq!(task["priority"], "high");
    assert_eq!(task["title"], "Write the quarterly report");
}

#[tokio::test]
async fn test_create_task_blank_title_rejected() {
    let (app, _state) = setup_app("http://localhost:1").await;

    let response = app
        .oneshot(post_json(
            "/tasks",
            serde_json::json!({
                "customer_id": Uuid::new_v4(),
                "title": "   "
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), hyper::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_task_not_found() {
    let (app, _state) = setup_app("http://localhost:1").await;

    let response = app
        .oneshot(get(&format!("/tasks/{}", Uuid::new_v4())))
        .await
        .unwrap();
    assert_eq!(response.status(), hyper::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_tasks_with_status_filter() {
    let (app, state) = setup_app("http://localhost:1").await;
    let customer_id = Uuid::new_v4();

    for title in ["One", "Two"] {
        app.clone()
            .oneshot(post_json(
                "/tasks",
                serde_json::json!({"customer_id": customer_id, "title": title}),
            ))
            .await
            .unwrap();
    }
    // Fail one of them out-of-band
    let tasks = state.store.list_tasks(customer_id, None).await.unwrap();
    state.machine.fail(tasks[0].id, "abandoned").await.unwrap();

    let response = app
        .clone()
        .oneshot(get(&format!(
            "/tasks?customer_id={}&status=pending",
            customer_id
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), hyper::StatusCode::OK);
    let listed = body_json(response).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);

    // Other customers see nothing
    let response = app
        .oneshot(get(&format!("/tasks?customer_id={}", Uuid::new_v4())))
        .await
        .unwrap();
    let listed = body_json(response).await;
    assert!(listed.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_patch_invalid_transition_conflicts() {
    let (app, _state) = setup_app("http://localhost:1").await;

    let response = app
        .clone()
        .oneshot(post_json(
            "/tasks",
            serde_json::json!({"customer_id": Uuid::new_v4(), "title": "T"}),
        ))
        .await
        .unwrap();
    let task = body_json(response).await;
    let task_id = task["id"].as_str().unwrap().to_string();

    // pending -> completed is not in the table
    let response = app
        .oneshot(patch_json(
            &format!("/tasks/{}", task_id),
            serde_json::json!({"status": "completed"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), hyper::StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_comments_roundtrip_and_ordering() {
    let (app, _state) = setup_app("http://localhost:1").await;

    let response = app
        .clone()
        .oneshot(post_json(
            "/tasks",
            serde_json::json!({"customer_id": Uuid::new_v4(), "title": "T"}),
        ))
        .await
        .unwrap();
    let task = body_json(response).await;
    let task_id = task["id"].as_str().unwrap().to_string();

    for content in ["first note", "second note"] {
        let response = app
            .clone()
            .oneshot(post_json(
                &format!("/tasks/{}/comments", task_id),
                serde_json::json!({"content": content}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), hyper::StatusCode::CREATED);
    }

    let response = app
        .oneshot(get(&format!("/tasks/{}/comments", task_id)))
        .await
        .unwrap();
    let comments = body_json(response).await;
    let comments = comments.as_array().unwrap();
    assert_eq!(comments.len(), 2);
    assert_eq!(comments[0]["content"], "first note");
    assert_eq!(comments[1]["content"], "second note");
    assert_eq!(comments[0]["author_type"], "user");
}

#[tokio::test]
async fn test_comments_unknown_task_404() {
    let (app, _state) = setup_app("http://localhost:1").await;

    let response = app
        .oneshot(get(&format!("/tasks/{}/comments", Uuid::new_v4())))
        .await
        .unwrap();
    assert_eq!(response.status(), hyper::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_feedback_outside_waiting_for_input_conflicts() {
    let (app, _state) = setup_app("http://localhost:1").await;

    let response = app
        .clone()
        .oneshot(post_json(
            "/tasks",
            serde_json::json!({"customer_id": Uuid::new_v4(), "title": "T"}),
        ))
        .await
        .unwrap();
    let task = body_json(response).await;
    let task_id = task["id"].as_str().unwrap().to_string();

    let response = app
        .oneshot(post_json(
            &format!("/tasks/{}/feedback", task_id),
            serde_json::json!({"content": "unsolicited advice"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), hyper::StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_plan_endpoints() {
    let (app, state) = setup_app("http://localhost:1").await;
    let customer_id = Uuid::new_v4();
    let agent = state
        .store
        .create_agent(customer_id, "Ada", "researcher")
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(post_json(
            "/tasks",
            serde_json::json!({"customer_id": customer_id, "title": "T"}),
        ))
        .await
        .unwrap();
    let task = body_json(response).await;
    let task_id: Uuid = task["id"].as_str().unwrap().parse().unwrap();

    // No plan yet: 404 is the normal interim answer
    let response = app
        .clone()
        .oneshot(get(&format!("/tasks/{}/plan", task_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), hyper::StatusCode::NOT_FOUND);

    state.machine.begin_planning(task_id, agent.id).await.unwrap();

    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/tasks/{}/plan", task_id),
            serde_json::json!({
                "initial_thought": "Split into research and writing",
                "steps": [
                    {"description": "Research", "output_type": "notes"},
                    {"description": "Write", "output_type": "document"}
                ],
                "timeline": "2 days"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), hyper::StatusCode::CREATED);
    let plan = body_json(response).await;
    assert_eq!(plan["status"], "draft");

    // Approve releases the task into work
    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/tasks/{}/plan/approve", task_id),
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), hyper::StatusCode::OK);
    let plan = body_json(response).await;
    assert_eq!(plan["status"], "approved");

    let task = state.store.get_task(task_id).await.unwrap();
    assert_eq!(task.status.as_str(), "in_progress");

    // Second approval is a no-op with the same answer
    let response = app
        .oneshot(post_json(
            &format!("/tasks/{}/plan/approve", task_id),
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), hyper::StatusCode::OK);
}

#[tokio::test]
async fn test_delegate_missing_customer_id_unprocessable() {
    let (app, _state) = setup_app("http://localhost:1").await;

    let response = app
        .oneshot(post_json(
            "/delegate",
            serde_json::json!({
                "target_agent_id": Uuid::new_v4(),
                "task": "Research the market"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), hyper::StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_create_agent() {
    let (app, _state) = setup_app("http://localhost:1").await;

    let response = app
        .oneshot(post_json(
            "/agents",
            serde_json::json!({
                "customer_id": Uuid::new_v4(),
                "name": "Ada",
                "agent_type": "researcher"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), hyper::StatusCode::CREATED);
    let agent = body_json(response).await;
    assert_eq!(agent["name"], "Ada");
}
