//! Task queue processor.
//!
//! Per task: `pending --claim--> running --handler ok--> completed`
//! or `running --handler error / all channels failed--> failed`.
//! Every task is processed inside its own error boundary; only the initial
//! fetch can fail a drain.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};
use uuid::Uuid;

use db::models::{AgentTaskRow, TaskCompletion, TaskStatus};
use db::{DbError, Store};

use crate::{HandlerRegistry, QueueError, TaskHandler};

/// Result of processing one task during a drain.
#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub error_message: Option<String>,
}

pub struct TaskQueueProcessor {
    store: Arc<dyn Store>,
    handlers: HandlerRegistry,
}

impl TaskQueueProcessor {
    pub fn new(store: Arc<dyn Store>, handlers: HandlerRegistry) -> Self {
        Self { store, handlers }
    }

    /// Task types this processor can drain.
    pub fn task_types(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Process every due `pending` task of `task_type`.
    ///
    /// Tasks another processor claims first are skipped and do not appear
    /// in the returned outcomes.
    ///
    /// # Errors
    /// [`QueueError::NoHandler`] for an unregistered type, or a database
    /// error while fetching the pending tasks.
    #[instrument(skip(self))]
    pub async fn drain(&self, task_type: &str) -> Result<Vec<TaskOutcome>, QueueError> {
        self.drain_matching(task_type, None).await
    }

    /// Like [`drain`](Self::drain), restricted to the tasks of one owner.
    #[instrument(skip(self))]
    pub async fn drain_owned(
        &self,
        task_type: &str,
        owner_id: Uuid,
    ) -> Result<Vec<TaskOutcome>, QueueError> {
        self.drain_matching(task_type, Some(owner_id)).await
    }

    async fn drain_matching(
        &self,
        task_type: &str,
        owner_id: Option<Uuid>,
    ) -> Result<Vec<TaskOutcome>, QueueError> {
        let handler = self
            .handlers
            .get(task_type)
            .cloned()
            .ok_or_else(|| QueueError::NoHandler(task_type.to_owned()))?;

        let mut pending = self.store.list_pending_tasks(task_type, Utc::now()).await?;
        if let Some(owner_id) = owner_id {
            pending.retain(|task| task.owner_id == owner_id);
        }
        if pending.is_empty() {
            debug!("no pending tasks");
            return Ok(Vec::new());
        }
        info!(count = pending.len(), "draining pending tasks");

        let mut outcomes = Vec::with_capacity(pending.len());
        for task in &pending {
            let span = info_span!("task", task_id = %task.id);
            if let Some(outcome) = self.process(task, handler.as_ref()).instrument(span).await {
                outcomes.push(outcome);
            }
        }

        let failed = outcomes.iter().filter(|o| o.status == TaskStatus::Failed).count();
        info!(processed = outcomes.len(), failed, "drain finished");
        Ok(outcomes)
    }

    async fn process(&self, task: &AgentTaskRow, handler: &dyn TaskHandler) -> Option<TaskOutcome> {
        match self.store.claim_task(task.id, Utc::now()).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("task already claimed by another processor");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "could not claim task; leaving it pending");
                return None;
            }
        }

        let completion = match handler.handle(task).await {
            Ok(report) => TaskCompletion {
                status: if report.succeeded { TaskStatus::Completed } else { TaskStatus::Failed },
                result_data: Some(Value::Object(report.result_data)),
                error_message: report.error_message,
                completed_at: Utc::now(),
            },
            Err(e) => TaskCompletion {
                status: TaskStatus::Failed,
                result_data: None,
                error_message: Some(e.to_string()),
                completed_at: Utc::now(),
            },
        };

        match completion.status {
            TaskStatus::Completed => info!("task completed"),
            _ => warn!(error = ?completion.error_message, "task failed"),
        }

        match self.store.finish_task(task.id, &completion).await {
            Ok(()) => Some(TaskOutcome {
                task_id: task.id,
                status: completion.status,
                error_message: completion.error_message,
            }),
            Err(e) => Some(self.record_failure(task.id, e).await),
        }
    }

    /// Fallback after the terminal write failed: mark the task `failed` with
    /// no result so it can be resubmitted. The outcome reports what the store
    /// now holds.
    async fn record_failure(&self, task_id: Uuid, cause: DbError) -> TaskOutcome {
        error!(error = %cause, "could not record task result");
        let fallback = TaskCompletion {
            status: TaskStatus::Failed,
            result_data: None,
            error_message: Some(format!("could not record result: {cause}")),
            completed_at: Utc::now(),
        };

        match self.store.finish_task(task_id, &fallback).await {
            Ok(()) => TaskOutcome {
                task_id,
                status: TaskStatus::Failed,
                error_message: fallback.error_message,
            },
            Err(e) => {
                error!(error = %e, "could not mark task failed; it stays running");
                TaskOutcome {
                    task_id,
                    status: TaskStatus::Running,
                    error_message: Some(format!("could not record result: {cause}; {e}")),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use db::MemoryStore;
    use effects::DataMap;
    use serde_json::json;

    use crate::TaskReport;

    /// Fails every task whose `task_data.fail` is true.
    struct ScriptedHandler;

    #[async_trait]
    impl TaskHandler for ScriptedHandler {
        async fn handle(&self, task: &AgentTaskRow) -> Result<TaskReport, QueueError> {
            if task.task_data["fail"] == json!(true) {
                return Err(QueueError::Handler("side effect exploded".into()));
            }
            let mut result = DataMap::new();
            result.insert("ok".into(), json!(true));
            Ok(TaskReport { succeeded: true, result_data: result, error_message: None })
        }
    }

    fn processor(store: Arc<MemoryStore>) -> TaskQueueProcessor {
        let mut handlers = HandlerRegistry::new();
        handlers.insert("scripted".into(), Arc::new(ScriptedHandler) as Arc<dyn TaskHandler>);
        TaskQueueProcessor::new(store, handlers)
    }

    #[tokio::test]
    async fn one_failing_task_does_not_stop_the_batch() {
        let store = Arc::new(MemoryStore::new());
        let owner = Uuid::new_v4();
        let bad = AgentTaskRow::pending(owner, "scripted", json!({ "fail": true }), None);
        let good = AgentTaskRow::pending(owner, "scripted", json!({}), None);
        store.insert_task(&bad).await.unwrap();
        store.insert_task(&good).await.unwrap();

        let outcomes = processor(store.clone()).drain("scripted").await.unwrap();
        assert_eq!(outcomes.len(), 2);

        let bad = store.get_task(bad.id).await.unwrap();
        assert_eq!(bad.task_status, TaskStatus::Failed);
        assert_eq!(bad.error_message.as_deref(), Some("side effect exploded"));
        assert!(bad.result_data.is_none());
        assert!(bad.completed_at.is_some());

        let good = store.get_task(good.id).await.unwrap();
        assert_eq!(good.task_status, TaskStatus::Completed);
        assert_eq!(good.result_data, Some(json!({ "ok": true })));
        assert!(good.completed_at.is_some());
        assert!(good.started_at.is_some());
    }

    #[tokio::test]
    async fn claimed_tasks_are_skipped() {
        let store = Arc::new(MemoryStore::new());
        let task = AgentTaskRow::pending(Uuid::new_v4(), "scripted", json!({}), None);
        store.insert_task(&task).await.unwrap();
        // Another processor wins the race between the fetch and our claim.
        store.claim_task(task.id, Utc::now()).await.unwrap();

        let outcomes = processor(store.clone()).drain("scripted").await.unwrap();
        assert!(outcomes.is_empty());
        assert_eq!(store.get_task(task.id).await.unwrap().task_status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn failed_tasks_are_not_retried_until_resubmitted() {
        let store = Arc::new(MemoryStore::new());
        let task = AgentTaskRow::pending(Uuid::new_v4(), "scripted", json!({ "fail": true }), None);
        store.insert_task(&task).await.unwrap();
        let processor = processor(store.clone());

        assert_eq!(processor.drain("scripted").await.unwrap().len(), 1);
        assert!(processor.drain("scripted").await.unwrap().is_empty());

        store.resubmit_task(task.id).await.unwrap();
        assert_eq!(processor.drain("scripted").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_result_write_still_marks_the_task_failed() {
        let store = Arc::new(MemoryStore::new());
        let task = AgentTaskRow::pending(Uuid::new_v4(), "scripted", json!({}), None);
        store.insert_task(&task).await.unwrap();
        store.fail_next_task_finishes(1);

        let outcomes = processor(store.clone()).drain("scripted").await.unwrap();
        assert_eq!(outcomes[0].status, TaskStatus::Failed);
        let message = outcomes[0].error_message.clone().unwrap();
        assert!(message.contains("could not record result"), "{message}");

        let stored = store.get_task(task.id).await.unwrap();
        assert_eq!(stored.task_status, TaskStatus::Failed);
        assert_eq!(stored.error_message.as_deref(), Some(message.as_str()));
        assert!(stored.result_data.is_none());
        assert!(stored.completed_at.is_some());

        // Failed, so it can go round again.
        store.resubmit_task(task.id).await.unwrap();
        let outcomes = processor(store.clone()).drain("scripted").await.unwrap();
        assert_eq!(outcomes[0].status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn outcome_reports_running_when_nothing_could_be_written() {
        let store = Arc::new(MemoryStore::new());
        let task = AgentTaskRow::pending(Uuid::new_v4(), "scripted", json!({}), None);
        store.insert_task(&task).await.unwrap();
        store.fail_next_task_finishes(2);

        let outcomes = processor(store.clone()).drain("scripted").await.unwrap();
        assert_eq!(outcomes[0].status, TaskStatus::Running);
        assert_eq!(store.get_task(task.id).await.unwrap().task_status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn owned_drain_leaves_other_owners_pending() {
        let store = Arc::new(MemoryStore::new());
        let (me, other) = (Uuid::new_v4(), Uuid::new_v4());
        let mine = AgentTaskRow::pending(me, "scripted", json!({}), None);
        let theirs = AgentTaskRow::pending(other, "scripted", json!({}), None);
        store.insert_task(&mine).await.unwrap();
        store.insert_task(&theirs).await.unwrap();

        let outcomes = processor(store.clone()).drain_owned("scripted", me).await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].task_id, mine.id);
        assert_eq!(store.get_task(theirs.id).await.unwrap().task_status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn unknown_task_type_is_an_error() {
        let store = Arc::new(MemoryStore::new());
        assert!(matches!(
            processor(store).drain("nope").await,
            Err(QueueError::NoHandler(t)) if t == "nope"
        ));
    }
}
