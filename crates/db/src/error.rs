//! Typed error type for the db crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("row not found")]
    NotFound,

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A conditional state change was refused because the row is not in the
    /// expected state.
    #[error("conflict: {0}")]
    Conflict(String),
}

/// A status column held a value no status enum knows about.
#[derive(Debug, Error)]
#[error("unknown status '{0}'")]
pub struct UnknownStatus(pub String);
