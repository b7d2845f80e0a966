//! Database store for agents, tasks, comments and plans

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{
    Agent, AuthorType, Comment, Plan, PlanDraft, PlanStatus, Priority, Task, TaskMetadata,
};
use crate::task::TaskStatus;

/// Database store
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // Agent operations

    pub async fn create_agent(
        &self,
        customer_id: Uuid,
        name: &str,
        agent_type: &str,
    ) -> Result<Agent> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO agents (id, customer_id, name, agent_type, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(customer_id.to_string())
        .bind(name)
        .bind(agent_type)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(Agent {
            id,
            customer_id,
            name: name.to_string(),
            agent_type: agent_type.to_string(),
            created_at: now,
        })
    }

    pub async fn get_agent(&self, id: Uuid) -> Result<Agent> {
        let row = sqlx::query_as::<_, AgentRow>(
            r#"
            SELECT id, customer_id, name, agent_type, created_at
            FROM agents
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Agent {} not found", id)))?;

        row.try_into()
    }

    // Task operations

    pub async fn create_task(
        &self,
        customer_id: Uuid,
        title: &str,
        description: &str,
        priority: Priority,
        due_date: Option<DateTime<Utc>>,
        assigned_agent_id: Option<Uuid>,
    ) -> Result<Task> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let metadata = TaskMetadata::default();

        sqlx::query(
            r#"
            INSERT INTO tasks (id, customer_id, title, description, status, priority,
                               due_date, assigned_agent_id, metadata, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(customer_id.to_string())
        .bind(title)
        .bind(description)
        .bind(TaskStatus::Pending.as_str())
        .bind(priority.as_str())
        .bind(due_date)
        .bind(assigned_agent_id.map(|u| u.to_string()))
        .bind(encode_metadata(&metadata)?)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(Task {
            id,
            customer_id,
            title: title.to_string(),
            description: description.to_string(),
            status: TaskStatus::Pending,
            current_phase: None,
            priority,
            due_date,
            assigned_agent_id,
            metadata,
            created_at: now,
            updated_at: now,
            completed_at: None,
        })
    }

    pub async fn get_task(&self, id: Uuid) -> Result<Task> {
        let row = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT id, customer_id, title, description, status, current_phase, priority,
                   due_date, assigned_agent_id, metadata, created_at, updated_at, completed_at
            FROM tasks
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Task {} not found", id)))?;

        row.try_into()
    }

    pub async fn list_tasks(
        &self,
        customer_id: Uuid,
        status: Option<TaskStatus>,
    ) -> Result<Vec<Task>> {
        let rows = match status {
            Some(status) => {
                sqlx::query_as::<_, TaskRow>(
                    r#"
                    SELECT id, customer_id, title, description, status, current_phase, priority,
                           due_date, assigned_agent_id, metadata, created_at, updated_at, completed_at
                    FROM tasks
                    WHERE customer_id = ? AND status = ?
                    ORDER BY created_at DESC
                    "#,
                )
                .bind(customer_id.to_string())
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, TaskRow>(
                    r#"
                    SELECT id, customer_id, title, description, status, current_phase, priority,
                           due_date, assigned_agent_id, metadata, created_at, updated_at, completed_at
                    FROM tasks
                    WHERE customer_id = ?
                    ORDER BY created_at DESC
                    "#,
                )
                .bind(customer_id.to_string())
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    /// Raw status write. Lifecycle validation lives in the state machine,
    /// which is the only caller outside tests.
    pub(crate) async fn set_task_status(
        &self,
        id: Uuid,
        status: TaskStatus,
        current_phase: Option<&str>,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let now = Utc::now();

        sqlx::query(
            r#"
            UPDATE tasks
            SET status = ?, current_phase = ?, completed_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(current_phase)
        .bind(completed_at)
        .bind(now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub(crate) async fn assign_agent(&self, task_id: Uuid, agent_id: Uuid) -> Result<()> {
        let now = Utc::now();

        sqlx::query(
            r#"
            UPDATE tasks SET assigned_agent_id = ?, updated_at = ? WHERE id = ?
            "#,
        )
        .bind(agent_id.to_string())
        .bind(now)
        .bind(task_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn update_task_metadata(&self, id: Uuid, metadata: &TaskMetadata) -> Result<()> {
        let now = Utc::now();

        sqlx::query(
            r#"
            UPDATE tasks SET metadata = ?, updated_at = ? WHERE id = ?
            "#,
        )
        .bind(encode_metadata(metadata)?)
        .bind(now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // Comment operations

    pub async fn add_comment(
        &self,
        task_id: Uuid,
        author_type: AuthorType,
        content: &str,
    ) -> Result<Comment> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO task_comments (id, task_id, author_type, content, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(task_id.to_string())
        .bind(author_type.as_str())
        .bind(content)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(Comment {
            id,
            task_id,
            author_type,
            content: content.to_string(),
            created_at: now,
        })
    }

    /// Comments in insertion order; rowid breaks same-timestamp ties
    pub async fn list_comments(&self, task_id: Uuid) -> Result<Vec<Comment>> {
        let rows = sqlx::query_as::<_, CommentRow>(
            r#"
            SELECT id, task_id, author_type, content, created_at
            FROM task_comments
            WHERE task_id = ?
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(task_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    // Plan operations

    /// Create or replace the task's plan; a new submission supersedes any
    /// existing draft and resets approval.
    pub async fn upsert_plan(&self, task_id: Uuid, draft: &PlanDraft) -> Result<Plan> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let steps = serde_json::to_string(&draft.steps)
            .map_err(|e| AppError::Internal(format!("Failed to encode plan steps: {}", e)))?;
        let resources = serde_json::to_string(&draft.resources)
            .map_err(|e| AppError::Internal(format!("Failed to encode plan resources: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO task_plans (id, task_id, initial_thought, steps, timeline, resources, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, 'draft', ?)
            ON CONFLICT(task_id) DO UPDATE SET
                id = excluded.id,
                initial_thought = excluded.initial_thought,
                steps = excluded.steps,
                timeline = excluded.timeline,
                resources = excluded.resources,
                status = 'draft',
                created_at = excluded.created_at
            "#,
        )
        .bind(id.to_string())
        .bind(task_id.to_string())
        .bind(&draft.initial_thought)
        .bind(steps)
        .bind(&draft.timeline)
        .bind(resources)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(Plan {
            id,
            task_id,
            initial_thought: draft.initial_thought.clone(),
            steps: draft.steps.clone(),
            timeline: draft.timeline.clone(),
            resources: draft.resources.clone(),
            status: PlanStatus::Draft,
            created_at: now,
        })
    }

    pub async fn get_plan(&self, task_id: Uuid) -> Result<Plan> {
        let row = sqlx::query_as::<_, PlanRow>(
            r#"
            SELECT id, task_id, initial_thought, steps, timeline, resources, status, created_at
            FROM task_plans
            WHERE task_id = ?
            "#,
        )
        .bind(task_id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No plan for task {}", task_id)))?;

        row.try_into()
    }

    pub(crate) async fn set_plan_status(&self, task_id: Uuid, status: PlanStatus) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE task_plans SET status = ? WHERE task_id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(task_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn encode_metadata(metadata: &TaskMetadata) -> Result<String> {
    serde_json::to_string(metadata)
        .map_err(|e| AppError::Internal(format!("Failed to encode metadata: {}", e)))
}

// Internal row types for sqlx

#[derive(sqlx::FromRow)]
struct AgentRow {
    id: String,
    customer_id: String,
    name: String,
    agent_type: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<AgentRow> for Agent {
    type Error = AppError;

    fn try_from(row: AgentRow) -> Result<Self> {
        Ok(Agent {
            id: parse_uuid(&row.id)?,
            customer_id: parse_uuid(&row.customer_id)?,
            name: row.name,
            agent_type: row.agent_type,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    customer_id: String,
    title: String,
    description: String,
    status: String,
    current_phase: Option<String>,
    priority: String,
    due_date: Option<DateTime<Utc>>,
    assigned_agent_id: Option<String>,
    metadata: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<TaskRow> for Task {
    type Error = AppError;

    fn try_from(row: TaskRow) -> Result<Self> {
        let assigned_agent_id = row
            .assigned_agent_id
            .map(|s| Uuid::parse_str(&s))
            .transpose()
            .map_err(|e| AppError::Internal(format!("Invalid assigned_agent_id UUID: {}", e)))?;

        Ok(Task {
            id: parse_uuid(&row.id)?,
            customer_id: parse_uuid(&row.customer_id)?,
            title: row.title,
            description: row.description,
            status: row
                .status
                .parse()
                .map_err(|e| AppError::Internal(format!("Invalid status: {}", e)))?,
            current_phase: row.current_phase,
            priority: row
                .priority
                .parse()
                .map_err(|e| AppError::Internal(format!("Invalid priority: {}", e)))?,
            due_date: row.due_date,
            assigned_agent_id,
            metadata: serde_json::from_str(&row.metadata)
                .map_err(|e| AppError::Internal(format!("Invalid metadata: {}", e)))?,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CommentRow {
    id: String,
    task_id: String,
    author_type: String,
    content: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<CommentRow> for Comment {
    type Error = AppError;

    fn try_from(row: CommentRow) -> Result<Self> {
        Ok(Comment {
            id: parse_uuid(&row.id)?,
            task_id: parse_uuid(&row.task_id)?,
            author_type: row
                .author_type
                .parse()
                .map_err(|e| AppError::Internal(format!("Invalid author type: {}", e)))?,
            content: row.content,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PlanRow {
    id: String,
    task_id: String,
    initial_thought: String,
    steps: String,
    timeline: String,
    resources: String,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<PlanRow> for Plan {
    type Error = AppError;

    fn try_from(row: PlanRow) -> Result<Self> {
        Ok(Plan {
            id: parse_uuid(&row.id)?,
            task_id: parse_uuid(&row.task_id)?,
            initial_thought: row.initial_thought,
            steps: serde_json::from_str(&row.steps)
                .map_err(|e| AppError::Internal(format!("Invalid plan steps: {}", e)))?,
            timeline: row.timeline,
            resources: serde_json::from_str(&row.resources)
                .map_err(|e| AppError::Internal(format!("Invalid plan resources: {}", e)))?,
            status: row
                .status
                .parse()
                .map_err(|e| AppError::Internal(format!("Invalid plan status: {}", e)))?,
            created_at: row.created_at,
        })
    }
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| AppError::Internal(format!("Invalid UUID: {}", e)))
}
