//! Task state machine
//!
//! All writes to a task's `status` and `current_phase` flow through here.
//! Every transition appends a system comment to the activity log and
//! publishes change notifications for the task, its comments and the
//! owning customer's board.

use chrono::Utc;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{AuthorType, CreateTaskRequest, Task};
use crate::notify::{ChangeKind, ChangeNotifier};
use crate::store::Store;
use crate::task::TaskStatus;

const RESULT_COMMENT_MAX_CHARS: usize = 500;

#[derive(Clone)]
pub struct TaskStateMachine {
    store: Store,
    notifier: ChangeNotifier,
}

impl TaskStateMachine {
    pub fn new(store: Store, notifier: ChangeNotifier) -> Self {
        Self { store, notifier }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn notifier(&self) -> &ChangeNotifier {
        &self.notifier
    }

    /// Create a task in `pending`
    pub async fn create_task(&self, req: CreateTaskRequest) -> Result<Task> {
        if req.title.trim().is_empty() {
            return Err(AppError::BadRequest("Task title is required".to_string()));
        }

        let task = self
            .store
            .create_task(
                req.customer_id,
                &req.title,
                &req.description,
                req.priority.unwrap_or_default(),
                req.due_date,
                req.assigned_agent_id,
            )
            .await?;

        self.notifier.publish(
            ChangeNotifier::customer_tasks_topic(req.customer_id),
            ChangeKind::Insert,
        );

        Ok(task)
    }

    /// Assign an agent and move `pending -> planning`
    pub async fn begin_planning(&self, task_id: Uuid, agent_id: Uuid) -> Result<Task> {
        let task = self.store.get_task(task_id).await?;
        let agent = self.store.get_agent(agent_id).await?;

        if agent.customer_id != task.customer_id {
            return Err(AppError::InvalidArgument(format!(
                "Agent {} does not belong to the task's customer",
                agent_id
            )));
        }

        self.store.assign_agent(task_id, agent_id).await?;
        let task = self.store.get_task(task_id).await?;
        self.transition(
            &task,
            TaskStatus::Planning,
            Some("planning"),
            format!("Planning started with {}", agent.name),
        )
        .await
    }

    /// Pause `in_progress -> waiting_for_input` with a question for the principal
    pub async fn request_input(&self, task_id: Uuid, prompt: &str) -> Result<Task> {
        let task = self.store.get_task(task_id).await?;

        if task.status != TaskStatus::InProgress {
            return Err(AppError::InvalidState(format!(
                "Task {} is {}, input can only be requested while in_progress",
                task_id,
                task.status.as_str()
            )));
        }

        let mut metadata = task.metadata.clone();
        metadata.last_progress_message = Some(prompt.to_string());
        metadata.last_progress_timestamp = Some(Utc::now());
        self.store.update_task_metadata(task_id, &metadata).await?;

        self.transition(
            &task,
            TaskStatus::WaitingForInput,
            task.current_phase.as_deref(),
            format!("**QUESTION:** {}", prompt),
        )
        .await
    }

    /// Answer an outstanding question: append the principal's comment and
    /// resume `waiting_for_input -> in_progress`. Rejected in any other status.
    pub async fn provide_feedback(&self, task_id: Uuid, content: &str) -> Result<Task> {
        let task = self.store.get_task(task_id).await?;

        if task.status != TaskStatus::WaitingForInput {
            return Err(AppError::InvalidState(format!(
                "Task {} is {} and is not waiting for input",
                task_id,
                task.status.as_str()
            )));
        }

        self.store
            .add_comment(task_id, AuthorType::User, content)
            .await?;
        self.notifier.publish(
            ChangeNotifier::task_comments_topic(task_id),
            ChangeKind::Insert,
        );

        self.transition(
            &task,
            TaskStatus::InProgress,
            task.current_phase.as_deref(),
            "Feedback received, resuming work".to_string(),
        )
        .await
    }

    /// Finish the task with its result summary
    pub async fn complete(&self, task_id: Uuid, result: &str) -> Result<Task> {
        let task = self.store.get_task(task_id).await?;
        let summary = truncate_chars(result, RESULT_COMMENT_MAX_CHARS);
        self.transition(
            &task,
            TaskStatus::Completed,
            None,
            format!("Task completed. Result: {}", summary),
        )
        .await
    }

    /// Fail the task, recording the reason
    pub async fn fail(&self, task_id: Uuid, reason: &str) -> Result<Task> {
        let task = self.store.get_task(task_id).await?;
        let summary = truncate_chars(reason, RESULT_COMMENT_MAX_CHARS);
        self.transition(
            &task,
            TaskStatus::Failed,
            None,
            format!("Task failed. Result: {}", summary),
        )
        .await
    }

    /// Human board move, validated by the same transition table.
    /// `planning -> in_progress` additionally requires an approved plan.
    pub async fn move_status(&self, task_id: Uuid, to: TaskStatus) -> Result<Task> {
        let task = self.store.get_task(task_id).await?;

        if task.status == TaskStatus::Planning && to == TaskStatus::InProgress {
            let plan = self.store.get_plan(task_id).await.map_err(|e| match e {
                AppError::NotFound(_) => {
                    AppError::InvalidState("Task has no plan to approve".to_string())
                }
                other => other,
            })?;
            if plan.status != crate::models::PlanStatus::Approved {
                return Err(AppError::InvalidState(
                    "Plan must be approved before work starts".to_string(),
                ));
            }
        }

        let phase = if to == TaskStatus::Planning {
            Some("planning")
        } else {
            task.current_phase.as_deref()
        };
        let comment = format!(
            "Status changed from {} to {}",
            task.status.as_str(),
            to.as_str()
        );
        self.transition(&task, to, phase, comment).await
    }

    /// Metadata-only progress heartbeat; no status change
    pub async fn update_progress(&self, task_id: Uuid, message: &str) -> Result<Task> {
        let task = self.store.get_task(task_id).await?;

        let mut metadata = task.metadata.clone();
        metadata.last_progress_message = Some(message.to_string());
        metadata.last_progress_timestamp = Some(Utc::now());
        self.store.update_task_metadata(task_id, &metadata).await?;

        self.notifier
            .publish(ChangeNotifier::task_topic(task_id), ChangeKind::Update);

        self.store.get_task(task_id).await
    }

    /// Record that the task entered its planning phase without a status move
    pub(crate) async fn set_phase(&self, task_id: Uuid, phase: &str) -> Result<()> {
        let task = self.store.get_task(task_id).await?;
        self.store
            .set_task_status(task_id, task.status, Some(phase), task.completed_at)
            .await?;
        self.notifier
            .publish(ChangeNotifier::task_topic(task_id), ChangeKind::Update);
        Ok(())
    }

    async fn transition(
        &self,
        task: &Task,
        to: TaskStatus,
        phase: Option<&str>,
        comment: String,
    ) -> Result<Task> {
        task.status
            .validate_transition(to)
            .map_err(AppError::InvalidState)?;

        if to.requires_agent() && task.assigned_agent_id.is_none() {
            return Err(AppError::InvalidState(format!(
                "Task {} has no assigned agent",
                task.id
            )));
        }

        let completed_at = if to == TaskStatus::Completed {
            Some(Utc::now())
        } else {
            task.completed_at
        };

        self.store
            .set_task_status(task.id, to, phase, completed_at)
            .await?;
        self.store
            .add_comment(task.id, AuthorType::System, &comment)
            .await?;

        tracing::info!(task_id = %task.id, from = task.status.as_str(), to = to.as_str(), "Task transition");

        self.notifier
            .publish(ChangeNotifier::task_topic(task.id), ChangeKind::Update);
        self.notifier.publish(
            ChangeNotifier::task_comments_topic(task.id),
            ChangeKind::Insert,
        );
        self.notifier.publish(
            ChangeNotifier::customer_tasks_topic(task.customer_id),
            ChangeKind::Update,
        );

        self.store.get_task(task.id).await
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}
