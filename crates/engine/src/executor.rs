//! Workflow execution engine.
//!
//! `WorkflowExecutor` is the central orchestrator:
//! 1. Persists a `running` execution record.
//! 2. Runs the steps in their stored order through [`StepExecutor`].
//! 3. Merges each step's output into the data context handed to the next.
//! 4. Stops at the first failed step; there is no per-step retry.
//! 5. Parks long delays as a `delayed` execution with a checkpoint that
//!    [`WorkflowExecutor::resume`] picks up later.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use db::models::ExecutionStatus;
use db::{DbError, Store};
use effects::{DataMap, EffectDispatcher};

use crate::models::{
    delay_output, Checkpoint, StepAction, StepResult, StepStatus, Workflow, WorkflowExecution,
    WorkflowStep,
};
use crate::step::StepExecutor;
use crate::EngineError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Upper bound on every effect dispatcher call; `None` waits forever.
    pub effect_timeout: Option<Duration>,
    /// Longer delays suspend the execution instead of sleeping in-process.
    pub inline_delay_limit: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            effect_timeout: None,
            inline_delay_limit: Duration::from_secs(60),
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowExecutor
// ---------------------------------------------------------------------------

/// Runs workflow executions against a store and an effect dispatcher.
///
/// Construct one executor per process and share it behind an `Arc`.
pub struct WorkflowExecutor {
    store: Arc<dyn Store>,
    dispatcher: Arc<dyn EffectDispatcher>,
    steps: StepExecutor,
    config: ExecutorConfig,
}

impl WorkflowExecutor {
    pub fn new(
        store: Arc<dyn Store>,
        dispatcher: Arc<dyn EffectDispatcher>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            store,
            dispatcher,
            steps: StepExecutor::new(config.effect_timeout),
            config,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run `workflow` from its first step.
    ///
    /// Step failures are reported through the returned execution's status.
    ///
    /// # Errors
    /// Only storage errors on the initial insert or the final write.
    #[instrument(skip(self, workflow, input_data), fields(workflow_id = %workflow.id))]
    pub async fn run(
        &self,
        workflow: &Workflow,
        input_data: DataMap,
    ) -> Result<WorkflowExecution, EngineError> {
        let execution = WorkflowExecution::start(workflow.id, input_data.clone());
        self.store.insert_execution(&execution.to_row()?).await?;
        info!(execution_id = %execution.id, steps = workflow.steps.len(), "execution started");

        self.drive(workflow, execution, 0, input_data).await
    }

    /// Continue a `delayed` execution from its checkpoint once its delay has
    /// elapsed.
    ///
    /// # Errors
    /// [`EngineError::NotResumable`] if the execution is not delayed (or
    /// another worker claimed it first), [`EngineError::NotYetDue`] before
    /// its `resume_at`, plus lookup and storage errors.
    pub async fn resume(&self, execution_id: Uuid) -> Result<WorkflowExecution, EngineError> {
        self.resume_as_of(execution_id, Utc::now()).await
    }

    #[instrument(skip(self))]
    async fn resume_as_of(
        &self,
        execution_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<WorkflowExecution, EngineError> {
        let row = self.store.get_execution(execution_id).await.map_err(|e| match e {
            DbError::NotFound => EngineError::ExecutionNotFound(execution_id),
            other => other.into(),
        })?;
        let mut execution = WorkflowExecution::try_from(row)?;

        let not_resumable = |status| EngineError::NotResumable { execution_id, status };
        if execution.status != ExecutionStatus::Delayed {
            return Err(not_resumable(execution.status));
        }
        let checkpoint = execution
            .checkpoint
            .take()
            .ok_or_else(|| not_resumable(execution.status))?;
        if checkpoint.resume_at > now {
            return Err(EngineError::NotYetDue { execution_id, resume_at: checkpoint.resume_at });
        }

        let workflow_id = execution.workflow_id;
        let row = self.store.get_workflow(workflow_id).await.map_err(|e| match e {
            DbError::NotFound => EngineError::WorkflowNotFound(workflow_id),
            other => other.into(),
        })?;
        let workflow = Workflow::try_from(row)?;

        if !self.store.claim_delayed_execution(execution_id, now).await? {
            return Err(not_resumable(ExecutionStatus::Running));
        }
        execution.status = ExecutionStatus::Running;

        info!(next_step = checkpoint.next_step, "resuming delayed execution");
        self.drive(&workflow, execution, checkpoint.next_step, checkpoint.data).await
    }

    /// Resume every delayed execution whose `resume_at` has passed.
    ///
    /// Each execution is resumed independently; one failing resume is
    /// logged and does not stop the others.
    pub async fn resume_due(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<WorkflowExecution>, EngineError> {
        let due = self.store.list_due_delayed_executions(now).await?;
        let mut resumed = Vec::with_capacity(due.len());
        for row in due {
            match self.resume_as_of(row.id, now).await {
                Ok(execution) => resumed.push(execution),
                Err(EngineError::NotResumable { .. } | EngineError::NotYetDue { .. }) => {
                    debug!(execution_id = %row.id, "execution already claimed");
                }
                Err(e) => error!(execution_id = %row.id, error = %e, "could not resume execution"),
            }
        }
        Ok(resumed)
    }

    // -----------------------------------------------------------------------
    // Internal: run steps from `start` until done, failed or suspended.
    // -----------------------------------------------------------------------

    async fn drive(
        &self,
        workflow: &Workflow,
        mut execution: WorkflowExecution,
        start: usize,
        mut data: DataMap,
    ) -> Result<WorkflowExecution, EngineError> {
        for (index, step) in workflow.steps.iter().enumerate().skip(start) {
            if let Ok(StepAction::Delay { duration }) = step.action() {
                if duration > self.config.inline_delay_limit {
                    return self.suspend(execution, step, index, duration, data).await;
                }
            }

            let result = self.steps.run(step, &data, self.dispatcher.as_ref()).await;
            debug!(step = %step.name, step_type = %step.step_type, status = ?result.status, "step finished");

            match result.status {
                StepStatus::Failed => {
                    let message = format!(
                        "Step {} failed: {}",
                        step.name,
                        result.error.as_deref().unwrap_or("unknown error")
                    );
                    warn!(step = %step.name, "{message}");
                    execution.step_results.push(result);
                    return self.finish(execution, Err(message)).await;
                }
                StepStatus::Skipped => execution.step_results.push(result),
                StepStatus::Completed | StepStatus::Running => {
                    data = merge(data, &result.output);
                    execution.step_results.push(result);
                }
            }
        }

        self.finish(execution, Ok(data)).await
    }

    /// Record the delay step, park the execution and return it.
    async fn suspend(
        &self,
        mut execution: WorkflowExecution,
        step: &WorkflowStep,
        index: usize,
        duration: Duration,
        data: DataMap,
    ) -> Result<WorkflowExecution, EngineError> {
        let now = Utc::now();
        let mut result = StepResult {
            step_name: step.name.clone(),
            step_type: step.step_type.clone(),
            status: StepStatus::Completed,
            output: delay_output(duration),
            error: None,
            started_at: now,
            completed_at: Some(now),
        };

        let resume_at = chrono::Duration::from_std(duration)
            .ok()
            .and_then(|d| now.checked_add_signed(d));
        let Some(resume_at) = resume_at else {
            let error = format!("delay of {duration:?} is out of range");
            let message = format!("Step {} failed: {error}", step.name);
            result.status = StepStatus::Failed;
            result.output = DataMap::new();
            result.error = Some(error);
            execution.step_results.push(result);
            return self.finish(execution, Err(message)).await;
        };

        result.output.insert("resume_at".into(), json!(resume_at));
        let data = merge(data, &result.output);
        execution.step_results.push(result);
        execution.status = ExecutionStatus::Delayed;
        execution.checkpoint = Some(Checkpoint { next_step: index + 1, resume_at, data });

        self.store.update_execution(&execution.to_row()?).await?;
        info!(execution_id = %execution.id, %resume_at, "execution delayed");
        Ok(execution)
    }

    /// The single terminal write of an execution.
    async fn finish(
        &self,
        mut execution: WorkflowExecution,
        outcome: Result<DataMap, String>,
    ) -> Result<WorkflowExecution, EngineError> {
        match outcome {
            Ok(output) => {
                execution.status = ExecutionStatus::Completed;
                execution.output_data = Some(output);
            }
            Err(message) => {
                execution.status = ExecutionStatus::Failed;
                execution.error_message = Some(message);
            }
        }
        execution.checkpoint = None;
        execution.completed_at = Some(Utc::now());

        self.store.update_execution(&execution.to_row()?).await?;
        info!(
            execution_id = %execution.id,
            status = %execution.status,
            steps_run = execution.step_results.len(),
            "execution finished"
        );
        Ok(execution)
    }
}

/// Shallow union; keys from `output` win.
fn merge(mut data: DataMap, output: &DataMap) -> DataMap {
    for (key, value) in output {
        data.insert(key.clone(), value.clone());
    }
    data
}
