//! [`Store`] backed by Postgres through the repository functions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{AgentTaskRow, TaskCompletion, TaskFilter, WorkflowExecutionRow, WorkflowRow};
use crate::repository::{executions, tasks, workflows};
use crate::{DbError, DbPool, Store};

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_workflow(&self, row: &WorkflowRow) -> Result<(), DbError> {
        workflows::create_workflow(&self.pool, row).await
    }

    async fn get_workflow(&self, id: Uuid) -> Result<WorkflowRow, DbError> {
        workflows::get_workflow(&self.pool, id).await
    }

    async fn get_workflow_for_owner(&self, id: Uuid, owner_id: Uuid) -> Result<WorkflowRow, DbError> {
        workflows::get_workflow_for_owner(&self.pool, id, owner_id).await
    }

    async fn list_workflows(&self, owner_id: Uuid) -> Result<Vec<WorkflowRow>, DbError> {
        workflows::list_workflows(&self.pool, owner_id).await
    }

    async fn insert_execution(&self, row: &WorkflowExecutionRow) -> Result<(), DbError> {
        executions::create_execution(&self.pool, row).await
    }

    async fn update_execution(&self, row: &WorkflowExecutionRow) -> Result<(), DbError> {
        executions::update_execution(&self.pool, row).await
    }

    async fn get_execution(&self, id: Uuid) -> Result<WorkflowExecutionRow, DbError> {
        executions::get_execution(&self.pool, id).await
    }

    async fn claim_delayed_execution(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, DbError> {
        executions::claim_delayed_execution(&self.pool, id, now).await
    }

    async fn list_due_delayed_executions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<WorkflowExecutionRow>, DbError> {
        executions::list_due_delayed_executions(&self.pool, now).await
    }

    async fn insert_task(&self, row: &AgentTaskRow) -> Result<(), DbError> {
        tasks::enqueue_task(&self.pool, row).await
    }

    async fn get_task(&self, id: Uuid) -> Result<AgentTaskRow, DbError> {
        tasks::get_task(&self.pool, id).await
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<AgentTaskRow>, DbError> {
        tasks::list_tasks(&self.pool, filter).await
    }

    async fn list_pending_tasks(
        &self,
        task_type: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<AgentTaskRow>, DbError> {
        tasks::list_pending_tasks(&self.pool, task_type, now).await
    }

    async fn claim_task(&self, id: Uuid, started_at: DateTime<Utc>) -> Result<bool, DbError> {
        tasks::claim_task(&self.pool, id, started_at).await
    }

    async fn finish_task(&self, id: Uuid, completion: &TaskCompletion) -> Result<(), DbError> {
        tasks::finish_task(&self.pool, id, completion).await
    }

    async fn resubmit_task(&self, id: Uuid) -> Result<AgentTaskRow, DbError> {
        tasks::resubmit_task(&self.pool, id).await
    }
}
