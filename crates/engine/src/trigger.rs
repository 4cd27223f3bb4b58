//! Recurring workflow runs driven by `workflow_trigger` tasks.
//!
//! Scheduling a workflow queues one trigger task due at the next run time.
//! When the queue processor drains it, [`WorkflowTriggerHandler`] runs the
//! workflow and queues the following trigger, so the schedule keeps itself
//! alive for as long as the workflow stays active.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use db::models::{AgentTaskRow, ExecutionStatus};
use db::{DbError, Store};
use effects::DataMap;
use queue::{QueueError, TaskHandler, TaskReport};

use crate::{schedule, EngineError, Workflow, WorkflowExecutor};

/// Task type drained by [`WorkflowTriggerHandler`].
pub const WORKFLOW_TRIGGER: &str = "workflow_trigger";

/// `task_data` of a trigger task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerRequest {
    pub workflow_id: Uuid,
    pub schedule_type: String,
    #[serde(default)]
    pub schedule_config: DataMap,
    #[serde(default)]
    pub input_data: DataMap,
}

/// Queue the next trigger for `request`, due at its next run after `now`.
pub async fn schedule_trigger(
    store: &dyn Store,
    owner_id: Uuid,
    request: &TriggerRequest,
    now: DateTime<Utc>,
) -> Result<AgentTaskRow, EngineError> {
    let scheduled_for = schedule::next_run(&request.schedule_type, &request.schedule_config, now);
    let task = AgentTaskRow::pending(
        owner_id,
        WORKFLOW_TRIGGER,
        serde_json::to_value(request)?,
        Some(scheduled_for),
    );
    store.insert_task(&task).await?;
    info!(
        workflow_id = %request.workflow_id,
        task_id = %task.id,
        %scheduled_for,
        "workflow trigger scheduled"
    );
    Ok(task)
}

pub struct WorkflowTriggerHandler {
    store: Arc<dyn Store>,
    executor: Arc<WorkflowExecutor>,
}

impl WorkflowTriggerHandler {
    pub fn new(store: Arc<dyn Store>, executor: Arc<WorkflowExecutor>) -> Self {
        Self { store, executor }
    }
}

fn handler_error(e: EngineError) -> QueueError {
    QueueError::Handler(e.to_string())
}

#[async_trait]
impl TaskHandler for WorkflowTriggerHandler {
    async fn handle(&self, task: &AgentTaskRow) -> Result<TaskReport, QueueError> {
        let request: TriggerRequest = serde_json::from_value(task.task_data.clone())
            .map_err(|e| QueueError::InvalidTaskData(e.to_string()))?;

        let row = match self.store.get_workflow_for_owner(request.workflow_id, task.owner_id).await {
            Ok(row) => row,
            Err(DbError::NotFound) => {
                return Err(handler_error(EngineError::WorkflowNotFound(request.workflow_id)))
            }
            Err(e) => return Err(e.into()),
        };
        let workflow = Workflow::try_from(row).map_err(handler_error)?;
        if !workflow.is_active {
            return Err(QueueError::Handler(format!(
                "workflow {} is inactive; schedule stopped",
                workflow.id
            )));
        }

        let run = self.executor.run(&workflow, request.input_data.clone()).await;
        let next = schedule_trigger(self.store.as_ref(), task.owner_id, &request, Utc::now())
            .await
            .map_err(handler_error)?;
        let execution = run.map_err(handler_error)?;

        let mut result_data = DataMap::new();
        result_data.insert("execution_id".into(), json!(execution.id));
        result_data.insert("execution_status".into(), json!(execution.status));
        result_data.insert("next_task_id".into(), json!(next.id));
        result_data.insert("next_run".into(), json!(next.scheduled_for));

        Ok(TaskReport {
            succeeded: execution.status != ExecutionStatus::Failed,
            result_data,
            error_message: execution.error_message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use db::models::{TaskFilter, TaskStatus};
    use db::MemoryStore;
    use effects::mock::{MockBehaviour, MockDispatcher};
    use queue::{HandlerRegistry, TaskQueueProcessor};
    use serde_json::Value;

    use crate::{ExecutorConfig, WorkflowStep};

    struct Harness {
        store: Arc<MemoryStore>,
        processor: TaskQueueProcessor,
    }

    fn harness(dispatcher: MockDispatcher) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let executor = Arc::new(WorkflowExecutor::new(
            store.clone(),
            Arc::new(dispatcher),
            ExecutorConfig::default(),
        ));
        let mut handlers = HandlerRegistry::new();
        handlers.insert(
            WORKFLOW_TRIGGER.into(),
            Arc::new(WorkflowTriggerHandler::new(store.clone(), executor)) as Arc<dyn TaskHandler>,
        );
        Harness { processor: TaskQueueProcessor::new(store.clone(), handlers), store }
    }

    async fn saved_workflow(store: &MemoryStore, active: bool) -> Workflow {
        let mut wf = Workflow::new(
            Uuid::new_v4(),
            "birthday reminders",
            vec![WorkflowStep::new("check", "birthday_check", json!({}))],
        );
        wf.is_active = active;
        store.insert_workflow(&wf.to_row().unwrap()).await.unwrap();
        wf
    }

    fn request(workflow: &Workflow) -> TriggerRequest {
        TriggerRequest {
            workflow_id: workflow.id,
            schedule_type: "interval".into(),
            schedule_config: json!({ "interval_minutes": 30 }).as_object().cloned().unwrap(),
            input_data: DataMap::new(),
        }
    }

    /// Queue a trigger that is already due.
    async fn due_trigger(store: &MemoryStore, workflow: &Workflow) -> AgentTaskRow {
        let task = AgentTaskRow::pending(
            workflow.owner_id,
            WORKFLOW_TRIGGER,
            serde_json::to_value(request(workflow)).unwrap(),
            None,
        );
        store.insert_task(&task).await.unwrap();
        task
    }

    #[tokio::test]
    async fn scheduling_uses_the_next_run_time() {
        let store = MemoryStore::new();
        let wf = saved_workflow(&store, true).await;
        let now = Utc::now();

        let task = schedule_trigger(&store, wf.owner_id, &request(&wf), now).await.unwrap();

        assert_eq!(task.task_type, WORKFLOW_TRIGGER);
        assert_eq!(task.scheduled_for, Some(now + chrono::Duration::minutes(30)));
        assert!(store.list_pending_tasks(WORKFLOW_TRIGGER, now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn trigger_runs_workflow_and_reschedules() {
        let h = harness(MockDispatcher::new());
        let wf = saved_workflow(&h.store, true).await;
        let task = due_trigger(&h.store, &wf).await;

        let outcomes = h.processor.drain(WORKFLOW_TRIGGER).await.unwrap();
        assert_eq!(outcomes.len(), 1);

        let done = h.store.get_task(task.id).await.unwrap();
        assert_eq!(done.task_status, TaskStatus::Completed);
        let result = done.result_data.unwrap();
        assert_eq!(result["execution_status"], json!("completed"));

        let execution_id: Uuid = serde_json::from_value(result["execution_id"].clone()).unwrap();
        assert_eq!(
            h.store.get_execution(execution_id).await.unwrap().status,
            ExecutionStatus::Completed
        );

        let pending = h
            .store
            .list_tasks(&TaskFilter { status: Some(TaskStatus::Pending), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(json!(pending[0].id), result["next_task_id"]);
        assert!(pending[0].scheduled_for.is_some());
    }

    #[tokio::test]
    async fn failed_run_fails_the_task_but_keeps_the_schedule() {
        let h = harness(
            MockDispatcher::new().with_birthdays(MockBehaviour::Fail("contacts api down".into())),
        );
        let wf = saved_workflow(&h.store, true).await;
        let task = due_trigger(&h.store, &wf).await;

        h.processor.drain(WORKFLOW_TRIGGER).await.unwrap();

        let done = h.store.get_task(task.id).await.unwrap();
        assert_eq!(done.task_status, TaskStatus::Failed);
        assert_eq!(
            done.error_message.as_deref(),
            Some("Step check failed: contacts api down")
        );
        let filter = TaskFilter { status: Some(TaskStatus::Pending), ..Default::default() };
        assert_eq!(h.store.list_tasks(&filter).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn inactive_workflow_stops_the_schedule() {
        let h = harness(MockDispatcher::new());
        let wf = saved_workflow(&h.store, false).await;
        let task = due_trigger(&h.store, &wf).await;

        h.processor.drain(WORKFLOW_TRIGGER).await.unwrap();

        let done = h.store.get_task(task.id).await.unwrap();
        assert_eq!(done.task_status, TaskStatus::Failed);
        assert!(done.error_message.unwrap().contains("inactive"));
        let filter = TaskFilter { status: Some(TaskStatus::Pending), ..Default::default() };
        assert!(h.store.list_tasks(&filter).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_trigger_data_fails_the_task() {
        let h = harness(MockDispatcher::new());
        let task = AgentTaskRow::pending(Uuid::new_v4(), WORKFLOW_TRIGGER, Value::Null, None);
        h.store.insert_task(&task).await.unwrap();

        h.processor.drain(WORKFLOW_TRIGGER).await.unwrap();

        let done = h.store.get_task(task.id).await.unwrap();
        assert_eq!(done.task_status, TaskStatus::Failed);
        assert!(done.error_message.unwrap().starts_with("invalid task data"));
    }
}
