//! The storage contract used by the engine, the task queue and the API.
//!
//! Two implementations ship with this crate: [`crate::PgStore`] for
//! production and [`crate::MemoryStore`] for tests and local runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{AgentTaskRow, TaskCompletion, TaskFilter, WorkflowExecutionRow, WorkflowRow};
use crate::DbError;

#[async_trait]
pub trait Store: Send + Sync {
    // ------ workflows ------

    async fn insert_workflow(&self, row: &WorkflowRow) -> Result<(), DbError>;

    /// Fetch a workflow regardless of owner (used by scheduled triggers).
    async fn get_workflow(&self, id: Uuid) -> Result<WorkflowRow, DbError>;

    /// Fetch a workflow only if `owner_id` owns it; otherwise `NotFound`.
    async fn get_workflow_for_owner(&self, id: Uuid, owner_id: Uuid) -> Result<WorkflowRow, DbError>;

    /// All workflows of one owner, newest first.
    async fn list_workflows(&self, owner_id: Uuid) -> Result<Vec<WorkflowRow>, DbError>;

    // ------ workflow_executions ------

    async fn insert_execution(&self, row: &WorkflowExecutionRow) -> Result<(), DbError>;

    /// Unconditional, last-write-wins update of every mutable column.
    async fn update_execution(&self, row: &WorkflowExecutionRow) -> Result<(), DbError>;

    async fn get_execution(&self, id: Uuid) -> Result<WorkflowExecutionRow, DbError>;

    /// Move a `delayed` execution whose `resume_at` is at or before `now` to
    /// `running`.  Returns `false` when the execution is no longer delayed
    /// (someone else resumed it) or is not yet due.
    async fn claim_delayed_execution(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, DbError>;

    /// Delayed executions whose `resume_at` is at or before `now`.
    async fn list_due_delayed_executions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<WorkflowExecutionRow>, DbError>;

    // ------ agent_tasks ------

    async fn insert_task(&self, row: &AgentTaskRow) -> Result<(), DbError>;

    async fn get_task(&self, id: Uuid) -> Result<AgentTaskRow, DbError>;

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<AgentTaskRow>, DbError>;

    /// `pending` tasks of `task_type` that are due at `now`, oldest first.
    async fn list_pending_tasks(
        &self,
        task_type: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<AgentTaskRow>, DbError>;

    /// Conditionally move a task from `pending` to `running`, stamping
    /// `started_at`.  Exactly one caller wins; losers get `false`.
    async fn claim_task(&self, id: Uuid, started_at: DateTime<Utc>) -> Result<bool, DbError>;

    /// Terminal write for a claimed task.
    async fn finish_task(&self, id: Uuid, completion: &TaskCompletion) -> Result<(), DbError>;

    /// Reset a `failed` task to `pending` for the next drain cycle.
    ///
    /// Returns `NotFound` for unknown ids and `Conflict` when the task is not
    /// `failed`.
    async fn resubmit_task(&self, id: Uuid) -> Result<AgentTaskRow, DbError>;
}
