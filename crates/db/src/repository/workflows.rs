//! Workflow CRUD operations.

use sqlx::PgPool;
use uuid::Uuid;

use crate::{DbError, models::WorkflowRow};

const COLUMNS: &str =
    "id, owner_id, name, steps, trigger_type, trigger_config, is_active, created_at";

/// Insert a new workflow into the database.
///
/// `row.steps` must be the JSON array produced by serialising the domain
/// step list from the `engine` crate.
pub async fn create_workflow(pool: &PgPool, row: &WorkflowRow) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO workflows
            (id, owner_id, name, steps, trigger_type, trigger_config, is_active, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(row.id)
    .bind(row.owner_id)
    .bind(&row.name)
    .bind(&row.steps)
    .bind(&row.trigger_type)
    .bind(&row.trigger_config)
    .bind(row.is_active)
    .bind(row.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Fetch a single workflow by its primary key.
pub async fn get_workflow(pool: &PgPool, id: Uuid) -> Result<WorkflowRow, DbError> {
    let row = sqlx::query_as::<_, WorkflowRow>(&format!(
        "SELECT {COLUMNS} FROM workflows WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    Ok(row)
}

/// Fetch a workflow, scoped to its owner.
pub async fn get_workflow_for_owner(
    pool: &PgPool,
    id: Uuid,
    owner_id: Uuid,
) -> Result<WorkflowRow, DbError> {
    let row = sqlx::query_as::<_, WorkflowRow>(&format!(
        "SELECT {COLUMNS} FROM workflows WHERE id = $1 AND owner_id = $2"
    ))
    .bind(id)
    .bind(owner_id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    Ok(row)
}

/// Return an owner's workflows ordered by creation time (newest first).
pub async fn list_workflows(pool: &PgPool, owner_id: Uuid) -> Result<Vec<WorkflowRow>, DbError> {
    let rows = sqlx::query_as::<_, WorkflowRow>(&format!(
        "SELECT {COLUMNS} FROM workflows WHERE owner_id = $1 ORDER BY created_at DESC"
    ))
    .bind(owner_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
