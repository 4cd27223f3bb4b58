//! Agent task queue repository functions.
//!
//! The queue is backed by the `agent_tasks` table.  Claims are conditional
//! updates (`WHERE task_status = 'pending'`), so several processors can poll
//! the same table and each task is still owned by exactly one of them.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
    DbError,
    models::{AgentTaskRow, TaskCompletion, TaskFilter, TaskStatus},
};

const COLUMNS: &str = "id, owner_id, task_type, task_status, task_data, result_data, \
                       error_message, scheduled_for, created_at, started_at, completed_at";

pub async fn enqueue_task(pool: &PgPool, row: &AgentTaskRow) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO agent_tasks
            (id, owner_id, task_type, task_status, task_data, result_data,
             error_message, scheduled_for, created_at, started_at, completed_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(row.id)
    .bind(row.owner_id)
    .bind(&row.task_type)
    .bind(row.task_status.as_str())
    .bind(&row.task_data)
    .bind(&row.result_data)
    .bind(&row.error_message)
    .bind(row.scheduled_for)
    .bind(row.created_at)
    .bind(row.started_at)
    .bind(row.completed_at)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_task(pool: &PgPool, id: Uuid) -> Result<AgentTaskRow, DbError> {
    let row = sqlx::query_as::<_, AgentTaskRow>(&format!(
        "SELECT {COLUMNS} FROM agent_tasks WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    Ok(row)
}

/// List tasks matching every set field of `filter`, newest first.
pub async fn list_tasks(pool: &PgPool, filter: &TaskFilter) -> Result<Vec<AgentTaskRow>, DbError> {
    let mut query: QueryBuilder<Postgres> =
        QueryBuilder::new(format!("SELECT {COLUMNS} FROM agent_tasks WHERE TRUE"));

    if let Some(owner_id) = filter.owner_id {
        query.push(" AND owner_id = ").push_bind(owner_id);
    }
    if let Some(status) = filter.status {
        query.push(" AND task_status = ").push_bind(status.as_str());
    }
    if let Some(task_type) = &filter.task_type {
        query.push(" AND task_type = ").push_bind(task_type.clone());
    }
    query.push(" ORDER BY created_at DESC");

    let rows = query.build_query_as::<AgentTaskRow>().fetch_all(pool).await?;
    Ok(rows)
}

/// Pending tasks of one type that are due at `now`, oldest first.
pub async fn list_pending_tasks(
    pool: &PgPool,
    task_type: &str,
    now: DateTime<Utc>,
) -> Result<Vec<AgentTaskRow>, DbError> {
    let rows = sqlx::query_as::<_, AgentTaskRow>(&format!(
        "SELECT {COLUMNS} FROM agent_tasks \
         WHERE task_status = $1 AND task_type = $2 \
           AND (scheduled_for IS NULL OR scheduled_for <= $3) \
         ORDER BY created_at ASC"
    ))
    .bind(TaskStatus::Pending.as_str())
    .bind(task_type)
    .bind(now)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Atomically claim a pending task.  Returns `false` if another processor
/// got there first.
pub async fn claim_task(
    pool: &PgPool,
    id: Uuid,
    started_at: DateTime<Utc>,
) -> Result<bool, DbError> {
    let result = sqlx::query(
        r#"
        UPDATE agent_tasks
        SET task_status = $1, started_at = $2
        WHERE id = $3 AND task_status = $4
        "#,
    )
    .bind(TaskStatus::Running.as_str())
    .bind(started_at)
    .bind(id)
    .bind(TaskStatus::Pending.as_str())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Record the terminal state of a claimed task.
pub async fn finish_task(
    pool: &PgPool,
    id: Uuid,
    completion: &TaskCompletion,
) -> Result<(), DbError> {
    let result = sqlx::query(
        r#"
        UPDATE agent_tasks
        SET task_status = $1, result_data = $2, error_message = $3, completed_at = $4
        WHERE id = $5
        "#,
    )
    .bind(completion.status.as_str())
    .bind(&completion.result_data)
    .bind(&completion.error_message)
    .bind(completion.completed_at)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}

/// Move a failed task back to `pending`, clearing the previous attempt.
pub async fn resubmit_task(pool: &PgPool, id: Uuid) -> Result<AgentTaskRow, DbError> {
    let row = sqlx::query_as::<_, AgentTaskRow>(&format!(
        r#"
        UPDATE agent_tasks
        SET task_status = $1, result_data = NULL, error_message = NULL,
            started_at = NULL, completed_at = NULL
        WHERE id = $2 AND task_status = $3
        RETURNING {COLUMNS}
        "#
    ))
    .bind(TaskStatus::Pending.as_str())
    .bind(id)
    .bind(TaskStatus::Failed.as_str())
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => Ok(row),
        None => {
            // Distinguish "no such task" from "task is not failed".
            let existing = get_task(pool, id).await?;
            Err(DbError::Conflict(format!(
                "task {id} is {} and cannot be resubmitted",
                existing.task_status
            )))
        }
    }
}
