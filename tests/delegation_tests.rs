//! Delegation relay integration tests against a mocked gateway

use axum::body::Body;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use vework::delegate::{DelegationRequest, MAX_DELEGATION_DEPTH};
use vework::error::AppError;
use vework::{api, AppState};

async fn setup_state(gateway_url: &str) -> Arc<AppState> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    AppState::new(pool, gateway_url)
}

fn sse_body(frames: &[&str]) -> String {
    frames
        .iter()
        .map(|f| format!("data: {}\n\n", f))
        .collect::<String>()
}

async fn mock_agent_reply(server: &MockServer, agent_id: Uuid, frames: &[&str]) {
    Mock::given(method("POST"))
        .and(path(format!("/agents/{}/messages", agent_id)))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(sse_body(frames))
                .insert_header("content-type", "text/event-stream"),
        )
        .mount(server)
        .await;
}

fn request(customer_id: Uuid, target: Uuid) -> DelegationRequest {
    DelegationRequest {
        source_agent_id: Some(Uuid::new_v4()),
        customer_id: Some(customer_id),
        target_agent_id: target,
        task: "Research the competitor landscape".to_string(),
        depth: 0,
    }
}

#[tokio::test]
async fn test_successful_delegation_returns_named_response() {
    let mock_server = MockServer::start().await;
    let state = setup_state(&mock_server.uri()).await;

    let customer_id = Uuid::new_v4();
    let target = state
        .store
        .create_agent(customer_id, "Ada", "researcher")
        .await
        .unwrap();

    mock_agent_reply(
        &mock_server,
        target.id,
        &[
            r#"{"type": "message", "content": "Three competitors found, "}"#,
            r#"{"type": "message", "content": "details attached."}"#,
            r#"{"type": "agent_message_saved", "data": {"id": "m-1", "content": ""}}"#,
            "[DONE]",
        ],
    )
    .await;

    let text = state
        .relay
        .delegate(request(customer_id, target.id))
        .await
        .unwrap();

    assert_eq!(
        text,
        "Delegation successful. Ada responded:\n\nThree competitors found, details attached."
    );
}

#[tokio::test]
async fn test_target_error_is_textual_failure() {
    let mock_server = MockServer::start().await;
    let state = setup_state(&mock_server.uri()).await;

    let customer_id = Uuid::new_v4();
    let target = state
        .store
        .create_agent(customer_id, "Ada", "researcher")
        .await
        .unwrap();

    mock_agent_reply(
        &mock_server,
        target.id,
        &[r#"{"type": "error", "content": "runtime unavailable"}"#],
    )
    .await;

    let text = state
        .relay
        .delegate(request(customer_id, target.id))
        .await
        .unwrap();
    assert_eq!(text, "Delegation failed: runtime unavailable");
}

#[tokio::test]
async fn test_gateway_rejection_body_surfaces_in_failure_text() {
    let mock_server = MockServer::start().await;
    let state = setup_state(&mock_server.uri()).await;

    let customer_id = Uuid::new_v4();
    let target = state
        .store
        .create_agent(customer_id, "Ada", "researcher")
        .await
        .unwrap();

    Mock::given(method("POST"))
        .and(path(format!("/agents/{}/messages", target.id)))
        .respond_with(ResponseTemplate::new(503).set_body_string("agent runtime is down"))
        .mount(&mock_server)
        .await;

    let text = state
        .relay
        .delegate(request(customer_id, target.id))
        .await
        .unwrap();
    assert!(text.starts_with("Delegation failed:"));
    assert!(text.contains("agent runtime is down"));
}

#[tokio::test]
async fn test_missing_customer_id_is_hard_error() {
    let mock_server = MockServer::start().await;
    let state = setup_state(&mock_server.uri()).await;

    let mut req = request(Uuid::new_v4(), Uuid::new_v4());
    req.customer_id = None;
    let result = state.relay.delegate(req).await;
    assert!(matches!(result.unwrap_err(), AppError::InvalidArgument(_)));

    // Fail-fast: nothing reached the gateway
    assert!(mock_server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_depth_limit_stops_chains_without_network() {
    let mock_server = MockServer::start().await;
    let state = setup_state(&mock_server.uri()).await;

    let customer_id = Uuid::new_v4();
    let target = state
        .store
        .create_agent(customer_id, "Ada", "researcher")
        .await
        .unwrap();

    let mut req = request(customer_id, target.id);
    req.depth = MAX_DELEGATION_DEPTH;
    let text = state.relay.delegate(req).await.unwrap();

    assert!(text.starts_with("Delegation failed:"));
    assert!(text.contains("depth"));
    assert!(mock_server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delegate_endpoint_returns_name_and_response() {
    let mock_server = MockServer::start().await;
    let state = setup_state(&mock_server.uri()).await;
    let app = api::router(state.clone());

    let customer_id = Uuid::new_v4();
    let target = state
        .store
        .create_agent(customer_id, "Ada", "researcher")
        .await
        .unwrap();

    mock_agent_reply(
        &mock_server,
        target.id,
        &[
            r#"{"type": "message", "content": "On it."}"#,
            r#"{"type": "agent_message_saved", "data": {"id": "m-1", "content": ""}}"#,
            "[DONE]",
        ],
    )
    .await;

    let response = app
        .oneshot(
            hyper::Request::builder()
                .method("POST")
                .uri("/delegate")
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::json!({
                        "customer_id": customer_id,
                        "target_agent_id": target.id,
                        "task": "Cover for me"
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), hyper::StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let reply: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(reply["target_agent_name"], "Ada");
    assert_eq!(
        reply["response"],
        "Delegation successful. Ada responded:\n\nOn it."
    );
}
