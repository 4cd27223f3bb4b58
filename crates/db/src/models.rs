//! Row structs that map 1-to-1 onto database tables.
//!
//! These are *persistence* models.  Step lists, step results and task
//! payloads are stored as opaque JSON; their typed views live in the
//! `engine` and `queue` crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::UnknownStatus;

// ---------------------------------------------------------------------------
// workflows
// ---------------------------------------------------------------------------

/// A persisted workflow definition row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowRow {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    /// Ordered JSON array of `{name, type, config}` step objects.
    pub steps: Value,
    /// `manual`, `scheduled` or `webhook`.
    pub trigger_type: String,
    pub trigger_config: Value,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// workflow_executions
// ---------------------------------------------------------------------------

/// Possible statuses for a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    /// Parked on a long `delay` step until `resume_at`.
    Delayed,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Delayed => "delayed",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = UnknownStatus;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running"   => Ok(Self::Running),
            "delayed"   => Ok(Self::Delayed),
            "completed" => Ok(Self::Completed),
            "failed"    => Ok(Self::Failed),
            other       => Err(UnknownStatus(other.to_owned())),
        }
    }
}

impl TryFrom<String> for ExecutionStatus {
    type Error = UnknownStatus;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// A persisted workflow execution row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowExecutionRow {
    pub id: Uuid,
    pub workflow_id: Uuid,
    #[sqlx(try_from = "String")]
    pub status: ExecutionStatus,
    pub input_data: Value,
    /// Only present once the execution completed successfully.
    pub output_data: Option<Value>,
    /// JSON array of step results, in execution order.
    pub step_results: Value,
    pub error_message: Option<String>,
    /// Resume state while `status = delayed`.
    pub checkpoint: Option<Value>,
    /// Mirrors the checkpoint's resume time so due executions can be queried.
    pub resume_at: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// agent_tasks
// ---------------------------------------------------------------------------

/// Lifecycle of a queued agent task.
///
/// `pending → running → completed | failed`; only an explicit resubmission
/// moves a `failed` task back to `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending   => "pending",
            Self::Running   => "running",
            Self::Completed => "completed",
            Self::Failed    => "failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = UnknownStatus;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending"   => Ok(Self::Pending),
            "running"   => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed"    => Ok(Self::Failed),
            other       => Err(UnknownStatus(other.to_owned())),
        }
    }
}

impl TryFrom<String> for TaskStatus {
    type Error = UnknownStatus;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// A persisted agent task row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AgentTaskRow {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub task_type: String,
    #[sqlx(try_from = "String")]
    pub task_status: TaskStatus,
    pub task_data: Value,
    pub result_data: Option<Value>,
    pub error_message: Option<String>,
    /// The task is not due before this instant (`None` = due immediately).
    pub scheduled_for: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl AgentTaskRow {
    /// A fresh `pending` task.
    pub fn pending(
        owner_id: Uuid,
        task_type: impl Into<String>,
        task_data: Value,
        scheduled_for: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            task_type: task_type.into(),
            task_status: TaskStatus::Pending,
            task_data,
            result_data: None,
            error_message: None,
            scheduled_for,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Whether the task may be picked up at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_for.map_or(true, |at| at <= now)
    }
}

/// Terminal write for a task that finished processing.
#[derive(Debug, Clone)]
pub struct TaskCompletion {
    pub status: TaskStatus,
    pub result_data: Option<Value>,
    pub error_message: Option<String>,
    pub completed_at: DateTime<Utc>,
}

/// Filter for listing a user's tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub owner_id: Option<Uuid>,
    pub status: Option<TaskStatus>,
    pub task_type: Option<String>,
}
