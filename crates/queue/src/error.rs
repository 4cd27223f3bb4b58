//! Queue-level error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    /// Persistence error from the db crate.
    #[error("database error: {0}")]
    Database(#[from] db::DbError),

    /// `drain` was asked for a task type nobody handles.
    #[error("no handler registered for task type '{0}'")]
    NoHandler(String),

    /// The task's `task_data` does not have the shape its handler needs.
    #[error("invalid task data: {0}")]
    InvalidTaskData(String),

    /// The handler failed outright.
    #[error("{0}")]
    Handler(String),
}
