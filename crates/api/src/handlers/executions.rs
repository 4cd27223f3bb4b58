use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use db::DbError;
use engine::WorkflowExecution;

use crate::error::ApiError;
use crate::extract::Caller;
use crate::state::AppState;

/// An execution is visible to the owner of its workflow only.
pub async fn get(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<WorkflowExecution>, ApiError> {
    let not_found = || ApiError::NotFound(format!("execution {id} not found"));

    let row = state.store.get_execution(id).await.map_err(|e| match e {
        DbError::NotFound => not_found(),
        other => other.into(),
    })?;
    state
        .store
        .get_workflow_for_owner(row.workflow_id, caller.0)
        .await
        .map_err(|e| match e {
            DbError::NotFound => not_found(),
            other => other.into(),
        })?;

    Ok(Json(WorkflowExecution::try_from(row)?))
}
