//! Task status enum and the transition table

use serde::{Deserialize, Serialize};

/// Lifecycle status of a task; doubles as its board column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Planning,
    InProgress,
    WaitingForInput,
    Review,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Planning => "planning",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::WaitingForInput => "waiting_for_input",
            TaskStatus::Review => "review",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    /// Terminal statuses admit no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Statuses in which an agent must be assigned to the task
    pub fn requires_agent(&self) -> bool {
        matches!(
            self,
            TaskStatus::Planning | TaskStatus::InProgress | TaskStatus::WaitingForInput
        )
    }

    /// Whether `self -> to` is a legal lifecycle transition
    pub fn can_transition_to(&self, to: TaskStatus) -> bool {
        use TaskStatus::*;

        if self.is_terminal() {
            return false;
        }
        // Failure is reachable from every non-terminal status
        if to == Failed {
            return true;
        }

        matches!(
            (self, to),
            (Pending, Planning)
                | (Pending, InProgress)
                | (Planning, InProgress)
                | (InProgress, WaitingForInput)
                | (InProgress, Review)
                | (InProgress, Completed)
                | (WaitingForInput, InProgress)
                | (Review, InProgress)
                | (Review, Completed)
        )
    }

    pub fn validate_transition(&self, to: TaskStatus) -> Result<(), String> {
        if self.can_transition_to(to) {
            Ok(())
        } else {
            Err(format!(
                "Cannot transition from {} to {}",
                self.as_str(),
                to.as_str()
            ))
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "planning" => Ok(TaskStatus::Planning),
            "in_progress" => Ok(TaskStatus::InProgress),
            "waiting_for_input" => Ok(TaskStatus::WaitingForInput),
            "review" => Ok(TaskStatus::Review),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            _ => Err(format!("Invalid task status: {}", s)),
        }
    }
}
