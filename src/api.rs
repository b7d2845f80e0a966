//! HTTP surface: tasks, comments, plans, chat streaming and delegation

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::gateway::{ChatRequest, DelegationReply};
use crate::models::{
    Agent, Comment, ContentRequest, CreateTaskRequest, Plan, PlanDraft, Task, UpdateTaskRequest,
};
use crate::notify::{ChangeKind, ChangeNotifier};
use crate::session::{idle_timeout, ConversationSession};
use crate::stream::{encode_frame, StreamEvent};
use crate::task::TaskStatus;
use crate::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/agents", post(create_agent))
        .route("/agents/:id/chat", post(chat))
        .route("/tasks", post(create_task).get(list_tasks))
        .route("/tasks/:id", get(get_task).patch(update_task))
        .route("/tasks/:id/comments", get(list_comments).post(add_comment))
        .route("/tasks/:id/feedback", post(feedback))
        .route("/tasks/:id/plan", get(get_plan).post(submit_plan))
        .route("/tasks/:id/plan/approve", post(approve_plan))
        .route("/delegate", post(delegate))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
struct CreateAgentRequest {
    customer_id: Uuid,
    name: String,
    agent_type: String,
}

async fn create_agent(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateAgentRequest>,
) -> Result<(StatusCode, Json<Agent>)> {
    let agent = state
        .store
        .create_agent(req.customer_id, &req.name, &req.agent_type)
        .await?;
    Ok((StatusCode::CREATED, Json(agent)))
}

async fn create_task(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<Task>)> {
    let task = state.machine.create_task(req).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

#[derive(Debug, Deserialize)]
struct ListTasksQuery {
    customer_id: Uuid,
    status: Option<TaskStatus>,
}

async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListTasksQuery>,
) -> Result<Json<Vec<Task>>> {
    let tasks = state
        .store
        .list_tasks(query.customer_id, query.status)
        .await?;
    Ok(Json(tasks))
}

async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Task>> {
    Ok(Json(state.store.get_task(id).await?))
}

async fn update_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateTaskRequest>,
) -> Result<Json<Task>> {
    Ok(Json(state.machine.move_status(id, req.status).await?))
}

async fn list_comments(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Comment>>> {
    // 404 for unknown tasks rather than an empty list
    state.store.get_task(id).await?;
    Ok(Json(state.store.list_comments(id).await?))
}

async fn add_comment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ContentRequest>,
) -> Result<(StatusCode, Json<Comment>)> {
    state.store.get_task(id).await?;
    let comment = state
        .store
        .add_comment(id, crate::models::AuthorType::User, &req.content)
        .await?;
    state.notifier.publish(
        ChangeNotifier::task_comments_topic(id),
        ChangeKind::Insert,
    );
    Ok((StatusCode::CREATED, Json(comment)))
}

async fn feedback(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ContentRequest>,
) -> Result<Json<Task>> {
    Ok(Json(state.machine.provide_feedback(id, &req.content).await?))
}

async fn get_plan(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Plan>> {
    Ok(Json(state.plan_gate.get_plan(id).await?))
}

async fn submit_plan(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(draft): Json<PlanDraft>,
) -> Result<(StatusCode, Json<Plan>)> {
    let plan = state.plan_gate.submit_plan(id, draft).await?;
    Ok((StatusCode::CREATED, Json(plan)))
}

async fn approve_plan(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Plan>> {
    Ok(Json(state.plan_gate.approve_plan(id).await?))
}

#[derive(Debug, Deserialize)]
struct ChatBody {
    content: String,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    correlation_id: Option<String>,
    #[serde(default)]
    task_id: Option<Uuid>,
}

/// Stream one exchange with an agent back to the caller as SSE.
///
/// Upstream events are folded into a server-side session while being
/// re-emitted downstream; when a task id is supplied, the final exchange
/// is appended to that task's activity log.
async fn chat(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<Uuid>,
    Json(body): Json<ChatBody>,
) -> Result<Response> {
    let agent = state.store.get_agent(agent_id).await?;

    let mut session = ConversationSession::new();
    match &body.correlation_id {
        Some(cid) => session.send_with_correlation(cid, &body.content),
        None => {
            session.send(&body.content);
        }
    }
    let correlation_id = session.transcript()[0].correlation_id.clone();

    let mut upstream = state
        .gateway
        .send_message(
            agent.id,
            ChatRequest {
                content: body.content.clone(),
                subject: body.subject.clone(),
                correlation_id: Some(correlation_id),
            },
        )
        .await?;

    let store = state.store.clone();
    let notifier = state.notifier.clone();
    let task_id = body.task_id;
    let user_content = body.content.clone();
    let idle = idle_timeout();

    let frames = async_stream::stream! {
        while !session.is_finished() {
            let event = match tokio::time::timeout(idle, upstream.next()).await {
                Ok(Some(event)) => event,
                Ok(None) => StreamEvent::Error {
                    content: "Stream ended unexpectedly".to_string(),
                },
                Err(_) => StreamEvent::Error {
                    content: format!("No activity for {} seconds", idle.as_secs()),
                },
            };

            session.apply(event.clone());

            match event {
                // A single terminator is emitted below
                StreamEvent::Done => {}
                // Side-channel and noise stay server-side
                StreamEvent::Thought { .. } | StreamEvent::Unknown { .. } => {}
                event => {
                    yield Ok::<_, std::convert::Infallible>(Bytes::from(encode_frame(&event)));
                }
            }
        }

        yield Ok(Bytes::from("data: [DONE]\n\n"));

        if let Some(task_id) = task_id {
            record_exchange(&store, &notifier, task_id, &user_content, &session).await;
        }
    };

    let response = Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(frames))
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(response)
}

/// Append the finished exchange to the task's activity log
async fn record_exchange(
    store: &crate::store::Store,
    notifier: &ChangeNotifier,
    task_id: Uuid,
    user_content: &str,
    session: &ConversationSession,
) {
    use crate::models::AuthorType;

    let reply = match (session.final_reply(), session.failure()) {
        (Some(reply), _) => reply.to_string(),
        (None, Some(reason)) => format!("Error: {}", reason),
        (None, None) => return,
    };

    if let Err(e) = store.add_comment(task_id, AuthorType::User, user_content).await {
        tracing::warn!(task_id = %task_id, "Failed to record user message: {}", e);
        return;
    }
    if let Err(e) = store.add_comment(task_id, AuthorType::Ve, &reply).await {
        tracing::warn!(task_id = %task_id, "Failed to record agent reply: {}", e);
        return;
    }
    notifier.publish(
        ChangeNotifier::task_comments_topic(task_id),
        ChangeKind::Insert,
    );
}

#[derive(Debug, Deserialize)]
struct DelegateBody {
    #[serde(default)]
    customer_id: Option<Uuid>,
    target_agent_id: Uuid,
    task: String,
    #[serde(default)]
    source_agent_id: Option<Uuid>,
    #[serde(default)]
    depth: usize,
}

async fn delegate(
    State(state): State<Arc<AppState>>,
    Json(body): Json<DelegateBody>,
) -> Result<Json<DelegationReply>> {
    let target_agent_name = state
        .store
        .get_agent(body.target_agent_id)
        .await
        .map(|a| a.name)
        .unwrap_or_default();

    let response = state
        .relay
        .delegate(crate::delegate::DelegationRequest {
            source_agent_id: body.source_agent_id,
            customer_id: body.customer_id,
            target_agent_id: body.target_agent_id,
            task: body.task,
            depth: body.depth,
        })
        .await?;

    Ok(Json(DelegationReply {
        target_agent_name,
        response,
    }))
}
