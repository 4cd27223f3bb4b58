use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use db::models::{AgentTaskRow, TaskFilter, TaskStatus};
use db::DbError;
use queue::TaskOutcome;

use crate::error::ApiError;
use crate::extract::Caller;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateTaskDto {
    pub task_type: String,
    #[serde(default = "empty_object")]
    pub task_data: Value,
    pub scheduled_for: Option<DateTime<Utc>>,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

#[derive(Deserialize)]
pub struct TaskQuery {
    pub status: Option<TaskStatus>,
    pub task_type: Option<String>,
}

#[derive(Serialize)]
pub struct DrainDto {
    pub outcomes: Vec<TaskOutcome>,
}

pub async fn create(
    State(state): State<AppState>,
    caller: Caller,
    Json(payload): Json<CreateTaskDto>,
) -> Result<(StatusCode, Json<AgentTaskRow>), ApiError> {
    if payload.task_type.trim().is_empty() {
        return Err(ApiError::BadRequest("task_type must not be empty".into()));
    }
    if !payload.task_data.is_object() {
        return Err(ApiError::BadRequest("task_data must be a JSON object".into()));
    }

    let task = AgentTaskRow::pending(caller.0, payload.task_type, payload.task_data, payload.scheduled_for);
    state.store.insert_task(&task).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn list(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<TaskQuery>,
) -> Result<Json<Vec<AgentTaskRow>>, ApiError> {
    let filter = TaskFilter {
        owner_id: Some(caller.0),
        status: query.status,
        task_type: query.task_type,
    };
    Ok(Json(state.store.list_tasks(&filter).await?))
}

/// Process the caller's due tasks of one type now, instead of waiting for
/// the worker.
pub async fn drain(
    Path(task_type): Path<String>,
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<DrainDto>, ApiError> {
    let outcomes = state.processor.drain_owned(&task_type, caller.0).await?;
    Ok(Json(DrainDto { outcomes }))
}

/// Move one of the caller's failed tasks back to `pending`.
pub async fn resubmit(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<AgentTaskRow>, ApiError> {
    let not_found = || ApiError::NotFound(format!("task {id} not found"));

    let task = state.store.get_task(id).await.map_err(|e| match e {
        DbError::NotFound => not_found(),
        other => other.into(),
    })?;
    if task.owner_id != caller.0 {
        return Err(not_found());
    }

    let task = state.store.resubmit_task(id).await?;
    tracing::info!(task_id = %id, "task resubmitted");
    Ok(Json(task))
}
