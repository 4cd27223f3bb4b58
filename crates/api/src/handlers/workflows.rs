use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use db::models::ExecutionStatus;
use effects::DataMap;
use engine::{schedule_trigger, TriggerRequest, TriggerType, Workflow, WorkflowStep};

use crate::error::ApiError;
use crate::extract::Caller;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateWorkflowDto {
    pub name: String,
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
    pub trigger_type: Option<TriggerType>,
    #[serde(default)]
    pub trigger_config: DataMap,
    pub is_active: Option<bool>,
}

#[derive(Deserialize)]
pub struct ExecuteWorkflowDto {
    #[serde(default)]
    pub input_data: DataMap,
}

#[derive(Deserialize)]
pub struct ScheduleWorkflowDto {
    pub schedule_type: String,
    #[serde(default)]
    pub schedule_config: DataMap,
    #[serde(default)]
    pub input_data: DataMap,
}

#[derive(Serialize)]
pub struct ScheduledDto {
    pub task_id: Uuid,
    pub scheduled_for: Option<DateTime<Utc>>,
}

async fn owned_workflow(state: &AppState, id: Uuid, caller: Caller) -> Result<Workflow, ApiError> {
    let row = state.store.get_workflow_for_owner(id, caller.0).await.map_err(|e| match e {
        db::DbError::NotFound => ApiError::NotFound(format!("workflow {id} not found")),
        other => other.into(),
    })?;
    Ok(Workflow::try_from(row)?)
}

pub async fn list(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<Vec<Workflow>>, ApiError> {
    let workflows = state
        .store
        .list_workflows(caller.0)
        .await?
        .into_iter()
        .map(Workflow::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(workflows))
}

pub async fn get(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<Workflow>, ApiError> {
    Ok(Json(owned_workflow(&state, id, caller).await?))
}

pub async fn create(
    State(state): State<AppState>,
    caller: Caller,
    Json(payload): Json<CreateWorkflowDto>,
) -> Result<(StatusCode, Json<Workflow>), ApiError> {
    let mut workflow = Workflow::new(caller.0, payload.name, payload.steps);
    workflow.trigger_type = payload.trigger_type.unwrap_or(TriggerType::Manual);
    workflow.trigger_config = payload.trigger_config;
    workflow.is_active = payload.is_active.unwrap_or(true);
    workflow.validate()?;

    state.store.insert_workflow(&workflow.to_row()?).await?;
    tracing::info!(workflow_id = %workflow.id, steps = workflow.steps.len(), "workflow created");
    Ok((StatusCode::CREATED, Json(workflow)))
}

/// Run the workflow synchronously and report the outcome.
pub async fn execute(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    caller: Caller,
    Json(payload): Json<ExecuteWorkflowDto>,
) -> Result<Response, ApiError> {
    let workflow = owned_workflow(&state, id, caller).await?;
    if !workflow.is_active {
        return Err(ApiError::BadRequest(format!("workflow {id} is inactive")));
    }

    let execution = state.executor.run(&workflow, payload.input_data).await?;

    let response = match execution.status {
        ExecutionStatus::Failed => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "execution_id": execution.id,
                "status": execution.status,
                "error": execution.error_message,
                "results": execution.step_results,
            })),
        ),
        status => (
            if status == ExecutionStatus::Delayed { StatusCode::ACCEPTED } else { StatusCode::OK },
            Json(json!({
                "execution_id": execution.id,
                "status": status,
                "results": execution.step_results,
                "output_data": execution.output_data,
            })),
        ),
    };
    Ok(response.into_response())
}

/// Register the workflow for recurrence by queueing its first trigger.
pub async fn schedule(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    caller: Caller,
    Json(payload): Json<ScheduleWorkflowDto>,
) -> Result<(StatusCode, Json<ScheduledDto>), ApiError> {
    let workflow = owned_workflow(&state, id, caller).await?;
    let request = TriggerRequest {
        workflow_id: workflow.id,
        schedule_type: payload.schedule_type,
        schedule_config: payload.schedule_config,
        input_data: payload.input_data,
    };

    let task = schedule_trigger(state.store.as_ref(), caller.0, &request, Utc::now()).await?;
    Ok((
        StatusCode::CREATED,
        Json(ScheduledDto { task_id: task.id, scheduled_for: task.scheduled_for }),
    ))
}
