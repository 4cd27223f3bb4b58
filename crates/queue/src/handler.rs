//! The `TaskHandler` trait — the contract every task type must fulfil.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use db::models::AgentTaskRow;
use effects::DataMap;

use crate::QueueError;

/// What a handler reports back for one task.
#[derive(Debug, Clone)]
pub struct TaskReport {
    /// `true` → `completed`, `false` → `failed`.
    pub succeeded: bool,
    pub result_data: DataMap,
    pub error_message: Option<String>,
}

/// Executes the side effect of one task type.
///
/// Returning `Err` marks the task `failed` with the error's message and no
/// `result_data`.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &AgentTaskRow) -> Result<TaskReport, QueueError>;
}

/// Maps `task_type` strings to handler implementations.
pub type HandlerRegistry = HashMap<String, Arc<dyn TaskHandler>>;
