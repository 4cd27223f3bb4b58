//! Postgres pool construction and the embedded schema migrations.

use std::time::Duration;

use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::DbError;

pub type DbPool = PgPool;

/// Schema files under `migrations/` at the workspace root, compiled in.
static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

/// How long a request waits for a free connection before failing.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, DbError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(database_url)
        .await?;
    info!(max_connections, "database pool ready");
    Ok(pool)
}

/// Bring the schema up to date. Already-applied migrations are skipped.
pub async fn run_migrations(pool: &DbPool) -> Result<(), DbError> {
    MIGRATOR.run(pool).await?;
    info!(known = MIGRATOR.iter().count(), "database schema up to date");
    Ok(())
}
