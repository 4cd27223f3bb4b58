//! In-process [`Store`] used by tests and by `serve --in-memory`.
//!
//! All state sits behind one mutex; every trait method takes the lock once,
//! so conditional updates (claims) are atomic with respect to each other.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    AgentTaskRow, ExecutionStatus, TaskCompletion, TaskFilter, TaskStatus, WorkflowExecutionRow,
    WorkflowRow,
};
use crate::{DbError, Store};

#[derive(Default)]
struct State {
    workflows: HashMap<Uuid, WorkflowRow>,
    executions: HashMap<Uuid, WorkflowExecutionRow>,
    tasks: HashMap<Uuid, AgentTaskRow>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    reject_execution_updates: AtomicBool,
    failing_task_finishes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `update_execution` fail, to exercise the
    /// finalization error path.
    pub fn reject_execution_updates(&self, reject: bool) {
        self.reject_execution_updates.store(reject, Ordering::SeqCst);
    }

    /// Make the next `count` calls to `finish_task` fail without writing.
    pub fn fail_next_task_finishes(&self, count: usize) {
        self.failing_task_finishes.store(count, Ordering::SeqCst);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A poisoned lock only means a test panicked mid-write; the maps are
        // still structurally valid.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_workflow(&self, row: &WorkflowRow) -> Result<(), DbError> {
        self.lock().workflows.insert(row.id, row.clone());
        Ok(())
    }

    async fn get_workflow(&self, id: Uuid) -> Result<WorkflowRow, DbError> {
        self.lock().workflows.get(&id).cloned().ok_or(DbError::NotFound)
    }

    async fn get_workflow_for_owner(&self, id: Uuid, owner_id: Uuid) -> Result<WorkflowRow, DbError> {
        self.lock()
            .workflows
            .get(&id)
            .filter(|w| w.owner_id == owner_id)
            .cloned()
            .ok_or(DbError::NotFound)
    }

    async fn list_workflows(&self, owner_id: Uuid) -> Result<Vec<WorkflowRow>, DbError> {
        let mut rows: Vec<WorkflowRow> = self
            .lock()
            .workflows
            .values()
            .filter(|w| w.owner_id == owner_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn insert_execution(&self, row: &WorkflowExecutionRow) -> Result<(), DbError> {
        self.lock().executions.insert(row.id, row.clone());
        Ok(())
    }

    async fn update_execution(&self, row: &WorkflowExecutionRow) -> Result<(), DbError> {
        if self.reject_execution_updates.load(Ordering::SeqCst) {
            return Err(DbError::Conflict("execution updates are disabled".into()));
        }
        let mut state = self.lock();
        match state.executions.get_mut(&row.id) {
            Some(existing) => {
                *existing = row.clone();
                Ok(())
            }
            None => Err(DbError::NotFound),
        }
    }

    async fn get_execution(&self, id: Uuid) -> Result<WorkflowExecutionRow, DbError> {
        self.lock().executions.get(&id).cloned().ok_or(DbError::NotFound)
    }

    async fn claim_delayed_execution(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, DbError> {
        let mut state = self.lock();
        let exec = state.executions.get_mut(&id).ok_or(DbError::NotFound)?;
        if exec.status != ExecutionStatus::Delayed || !exec.resume_at.is_some_and(|at| at <= now) {
            return Ok(false);
        }
        exec.status = ExecutionStatus::Running;
        Ok(true)
    }

    async fn list_due_delayed_executions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<WorkflowExecutionRow>, DbError> {
        let mut rows: Vec<WorkflowExecutionRow> = self
            .lock()
            .executions
            .values()
            .filter(|e| e.status == ExecutionStatus::Delayed)
            .filter(|e| e.resume_at.is_some_and(|at| at <= now))
            .cloned()
            .collect();
        rows.sort_by_key(|e| e.resume_at);
        Ok(rows)
    }

    async fn insert_task(&self, row: &AgentTaskRow) -> Result<(), DbError> {
        self.lock().tasks.insert(row.id, row.clone());
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> Result<AgentTaskRow, DbError> {
        self.lock().tasks.get(&id).cloned().ok_or(DbError::NotFound)
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<AgentTaskRow>, DbError> {
        let mut rows: Vec<AgentTaskRow> = self
            .lock()
            .tasks
            .values()
            .filter(|t| filter.owner_id.map_or(true, |o| t.owner_id == o))
            .filter(|t| filter.status.map_or(true, |s| t.task_status == s))
            .filter(|t| filter.task_type.as_deref().map_or(true, |ty| t.task_type == ty))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn list_pending_tasks(
        &self,
        task_type: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<AgentTaskRow>, DbError> {
        let mut rows: Vec<AgentTaskRow> = self
            .lock()
            .tasks
            .values()
            .filter(|t| t.task_status == TaskStatus::Pending && t.task_type == task_type)
            .filter(|t| t.is_due(now))
            .cloned()
            .collect();
        rows.sort_by_key(|t| t.created_at);
        Ok(rows)
    }

    async fn claim_task(&self, id: Uuid, started_at: DateTime<Utc>) -> Result<bool, DbError> {
        let mut state = self.lock();
        let task = state.tasks.get_mut(&id).ok_or(DbError::NotFound)?;
        if task.task_status != TaskStatus::Pending {
            return Ok(false);
        }
        task.task_status = TaskStatus::Running;
        task.started_at = Some(started_at);
        Ok(true)
    }

    async fn finish_task(&self, id: Uuid, completion: &TaskCompletion) -> Result<(), DbError> {
        let injected = self
            .failing_task_finishes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(DbError::Conflict("task finishes are disabled".into()));
        }
        let mut state = self.lock();
        let task = state.tasks.get_mut(&id).ok_or(DbError::NotFound)?;
        task.task_status = completion.status;
        task.result_data = completion.result_data.clone();
        task.error_message = completion.error_message.clone();
        task.completed_at = Some(completion.completed_at);
        Ok(())
    }

    async fn resubmit_task(&self, id: Uuid) -> Result<AgentTaskRow, DbError> {
        let mut state = self.lock();
        let task = state.tasks.get_mut(&id).ok_or(DbError::NotFound)?;
        if task.task_status != TaskStatus::Failed {
            return Err(DbError::Conflict(format!(
                "task {id} is {} and cannot be resubmitted",
                task.task_status
            )));
        }
        task.task_status = TaskStatus::Pending;
        task.result_data = None;
        task.error_message = None;
        task.started_at = None;
        task.completed_at = None;
        Ok(task.clone())
    }
}
