//! `engine` crate — workflow domain models and the execution engine.
//!
//! A workflow is an ordered list of typed steps.  [`WorkflowExecutor`] runs
//! them one after another through [`StepExecutor`], threading each step's
//! output into the next step's input, and persists the aggregate
//! [`WorkflowExecution`].  [`condition`] evaluates conditional steps and
//! [`schedule`] computes when a recurring workflow fires next.

pub mod models;
pub mod error;
pub mod condition;
pub mod schedule;
pub mod step;
pub mod executor;
pub mod trigger;
mod value;

pub use models::{
    Checkpoint, StepAction, StepResult, StepStatus, TriggerType, Workflow, WorkflowExecution,
    WorkflowStep,
};
pub use error::{EngineError, StepError};
pub use schedule::{next_run, ScheduleType};
pub use step::StepExecutor;
pub use executor::{ExecutorConfig, WorkflowExecutor};
pub use trigger::{schedule_trigger, TriggerRequest, WorkflowTriggerHandler, WORKFLOW_TRIGGER};
