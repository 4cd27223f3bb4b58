//! Engine-level error types.

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use db::models::ExecutionStatus;
use effects::EffectError;

/// Errors produced by the workflow engine (validation + execution).
///
/// Step failures are *not* engine errors: they end up as a `failed`
/// [`crate::StepResult`] inside a `failed` execution.  An `EngineError`
/// means the run itself could not be carried out or recorded.
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Validation errors ------

    /// The workflow definition is malformed.
    #[error("invalid workflow: {0}")]
    InvalidWorkflow(String),

    // ------ Execution errors ------

    #[error("workflow {0} not found")]
    WorkflowNotFound(Uuid),

    #[error("execution {0} not found")]
    ExecutionNotFound(Uuid),

    /// `resume` was called for an execution that is not parked on a delay.
    #[error("execution {execution_id} is {status} and cannot be resumed")]
    NotResumable {
        execution_id: Uuid,
        status: ExecutionStatus,
    },

    /// The execution is parked on a delay that has not elapsed yet.
    #[error("execution {execution_id} is delayed until {resume_at}")]
    NotYetDue {
        execution_id: Uuid,
        resume_at: DateTime<Utc>,
    },

    /// A stored JSON column could not be (de)serialised.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Persistence error from the db crate.
    #[error("database error: {0}")]
    Database(#[from] db::DbError),
}

/// Why a single step failed.  Always converted into a `failed` step result.
#[derive(Debug, Error)]
pub enum StepError {
    /// Upstream data the step needs is absent or empty.
    #[error("missing required input '{0}'")]
    MissingInput(&'static str),

    /// `step.type` is not one of the supported step types.
    #[error("unknown step type '{0}'")]
    UnknownStepType(String),

    /// The step's `config` has a value of the wrong shape.
    #[error("invalid {step_type} config: {message}")]
    InvalidConfig {
        step_type: &'static str,
        message: String,
    },

    /// The effect dispatcher reported a failure.
    #[error(transparent)]
    Effect(#[from] EffectError),
}
