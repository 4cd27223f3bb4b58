//! Workflow execution repository functions.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    DbError,
    models::{ExecutionStatus, WorkflowExecutionRow},
};

const COLUMNS: &str = "id, workflow_id, status, input_data, output_data, step_results, \
                       error_message, checkpoint, resume_at, started_at, completed_at";

/// Insert the initial execution record.
pub async fn create_execution(pool: &PgPool, row: &WorkflowExecutionRow) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO workflow_executions
            (id, workflow_id, status, input_data, output_data, step_results,
             error_message, checkpoint, resume_at, started_at, completed_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(row.id)
    .bind(row.workflow_id)
    .bind(row.status.as_str())
    .bind(&row.input_data)
    .bind(&row.output_data)
    .bind(&row.step_results)
    .bind(&row.error_message)
    .bind(&row.checkpoint)
    .bind(row.resume_at)
    .bind(row.started_at)
    .bind(row.completed_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Overwrite the mutable columns of an execution.
pub async fn update_execution(pool: &PgPool, row: &WorkflowExecutionRow) -> Result<(), DbError> {
    let result = sqlx::query(
        r#"
        UPDATE workflow_executions
        SET status = $1, output_data = $2, step_results = $3, error_message = $4,
            checkpoint = $5, resume_at = $6, completed_at = $7
        WHERE id = $8
        "#,
    )
    .bind(row.status.as_str())
    .bind(&row.output_data)
    .bind(&row.step_results)
    .bind(&row.error_message)
    .bind(&row.checkpoint)
    .bind(row.resume_at)
    .bind(row.completed_at)
    .bind(row.id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }

    Ok(())
}

pub async fn get_execution(pool: &PgPool, id: Uuid) -> Result<WorkflowExecutionRow, DbError> {
    let row = sqlx::query_as::<_, WorkflowExecutionRow>(&format!(
        "SELECT {COLUMNS} FROM workflow_executions WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    Ok(row)
}

/// `delayed → running`, only if the row is still delayed and due at `now`.
pub async fn claim_delayed_execution(
    pool: &PgPool,
    id: Uuid,
    now: DateTime<Utc>,
) -> Result<bool, DbError> {
    let result = sqlx::query(
        "UPDATE workflow_executions SET status = $1 \
         WHERE id = $2 AND status = $3 AND resume_at <= $4",
    )
    .bind(ExecutionStatus::Running.as_str())
    .bind(id)
    .bind(ExecutionStatus::Delayed.as_str())
    .bind(now)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn list_due_delayed_executions(
    pool: &PgPool,
    now: DateTime<Utc>,
) -> Result<Vec<WorkflowExecutionRow>, DbError> {
    let rows = sqlx::query_as::<_, WorkflowExecutionRow>(&format!(
        "SELECT {COLUMNS} FROM workflow_executions \
         WHERE status = $1 AND resume_at <= $2 ORDER BY resume_at ASC"
    ))
    .bind(ExecutionStatus::Delayed.as_str())
    .bind(now)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
