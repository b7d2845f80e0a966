//! Plan approval gate
//!
//! Agents propose a structured plan during the planning phase; a human
//! approves it before any work starts. Approval is idempotent and is the
//! only path from `planning` to `in_progress`.

use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{Plan, PlanDraft, PlanStatus};
use crate::task::{TaskStateMachine, TaskStatus};

#[derive(Clone)]
pub struct PlanGate {
    machine: TaskStateMachine,
}

impl PlanGate {
    pub fn new(machine: TaskStateMachine) -> Self {
        Self { machine }
    }

    /// Create or replace the task's plan as a fresh draft. A resubmission
    /// supersedes the previous plan and voids any prior approval.
    pub async fn submit_plan(&self, task_id: Uuid, draft: PlanDraft) -> Result<Plan> {
        let task = self.machine.store().get_task(task_id).await?;

        if task.status.is_terminal() {
            return Err(AppError::InvalidState(format!(
                "Task {} is {} and no longer accepts plans",
                task_id,
                task.status.as_str()
            )));
        }

        let plan = self.machine.store().upsert_plan(task_id, &draft).await?;
        self.machine.set_phase(task_id, "planning").await?;
        self.machine
            .update_progress(
                task_id,
                &format!("Drafted execution plan: {}", draft.initial_thought),
            )
            .await?;

        Ok(plan)
    }

    /// Approve the outstanding draft and release the task into work.
    /// Approving an already-approved plan is a no-op returning the plan.
    pub async fn approve_plan(&self, task_id: Uuid) -> Result<Plan> {
        let plan = self.machine.store().get_plan(task_id).await?;

        if plan.status == PlanStatus::Approved {
            return Ok(plan);
        }

        let task = self.machine.store().get_task(task_id).await?;
        if task.status != TaskStatus::Planning {
            return Err(AppError::InvalidState(format!(
                "Task {} is {}, a plan can only be approved during planning",
                task_id,
                task.status.as_str()
            )));
        }

        self.machine
            .store()
            .set_plan_status(task_id, PlanStatus::Approved)
            .await?;
        self.machine
            .move_status(task_id, TaskStatus::InProgress)
            .await?;

        self.machine.store().get_plan(task_id).await
    }

    /// Absence of a plan is a normal interim state; callers map NotFound
    /// accordingly rather than treating it as a fault.
    pub async fn get_plan(&self, task_id: Uuid) -> Result<Plan> {
        self.machine.store().get_plan(task_id).await
    }
}
