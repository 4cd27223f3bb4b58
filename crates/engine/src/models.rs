//! Core domain models for the workflow engine.
//!
//! These types are the typed view of the JSON columns stored by the `db`
//! crate.  Conversions to and from the row structs live here so the rest
//! of the engine never touches raw `serde_json::Value` step lists.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use db::models::{ExecutionStatus, WorkflowExecutionRow, WorkflowRow};
use effects::DataMap;

use crate::error::{EngineError, StepError};
use crate::value;

/// Delay used when a `delay` step has no `delay_seconds`.
pub const DEFAULT_DELAY_SECONDS: f64 = 5.0;

// ---------------------------------------------------------------------------
// Trigger
// ---------------------------------------------------------------------------

/// How a workflow is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// Triggered explicitly via the REST API or CLI.
    Manual,
    /// Triggered by a queued `workflow_trigger` task.
    Scheduled,
    /// Triggered by an inbound HTTP call.
    Webhook,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Scheduled => "scheduled",
            Self::Webhook => "webhook",
        }
    }
}

impl std::str::FromStr for TriggerType {
    type Err = EngineError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(Self::Manual),
            "scheduled" => Ok(Self::Scheduled),
            "webhook" => Ok(Self::Webhook),
            other => Err(EngineError::InvalidWorkflow(format!(
                "unknown trigger type '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// A single step in a workflow, exactly as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub name: String,
    #[serde(rename = "type")]
    pub step_type: String,
    #[serde(default)]
    pub config: DataMap,
}

impl WorkflowStep {
    /// Convenience constructor for testing.  Non-object configs become `{}`.
    pub fn new(name: impl Into<String>, step_type: impl Into<String>, config: Value) -> Self {
        Self {
            name: name.into(),
            step_type: step_type.into(),
            config: match config {
                Value::Object(map) => map,
                _ => DataMap::new(),
            },
        }
    }

    /// Interpret `step_type` + `config`.
    pub fn action(&self) -> Result<StepAction, StepError> {
        match self.step_type.as_str() {
            "birthday_check" => Ok(StepAction::BirthdayCheck),
            "sentiment_analysis" => Ok(StepAction::SentimentAnalysis),
            "send_notifications" => Ok(StepAction::SendNotifications),
            "delay" => delay_from_config(&self.config).map(|duration| StepAction::Delay { duration }),
            "conditional" => conditional_from_config(&self.config),
            other => Err(StepError::UnknownStepType(other.to_owned())),
        }
    }
}

/// The typed meaning of a step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepAction {
    BirthdayCheck,
    SentimentAnalysis,
    SendNotifications,
    Delay { duration: Duration },
    Conditional { condition: String, skip_on_false: bool },
}

fn delay_from_config(config: &DataMap) -> Result<Duration, StepError> {
    let seconds = match config.get("delay_seconds") {
        None | Some(Value::Null) => DEFAULT_DELAY_SECONDS,
        Some(_) => value::number(config, "delay_seconds").ok_or_else(|| StepError::InvalidConfig {
            step_type: "delay",
            message: "delay_seconds must be a number".into(),
        })?,
    };
    Duration::try_from_secs_f64(seconds).map_err(|_| StepError::InvalidConfig {
        step_type: "delay",
        message: format!("delay_seconds must be non-negative, got {seconds}"),
    })
}

fn conditional_from_config(config: &DataMap) -> Result<StepAction, StepError> {
    let condition = match config.get("condition") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(_) => {
            return Err(StepError::InvalidConfig {
                step_type: "conditional",
                message: "condition must be a string".into(),
            })
        }
    };
    let skip_on_false = match config.get("skip_on_false") {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(_) => {
            return Err(StepError::InvalidConfig {
                step_type: "conditional",
                message: "skip_on_false must be a boolean".into(),
            })
        }
    };
    Ok(StepAction::Conditional { condition, skip_on_false })
}

/// Outcome of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Running,
    Completed,
    Failed,
    Skipped,
}

/// Per-step record appended to an execution's `step_results`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_name: String,
    pub step_type: String,
    pub status: StepStatus,
    #[serde(default)]
    pub output: DataMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// A complete workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub steps: Vec<WorkflowStep>,
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub trigger_config: DataMap,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Workflow {
    /// A new active, manually-triggered workflow.
    pub fn new(owner_id: Uuid, name: impl Into<String>, steps: Vec<WorkflowStep>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            name: name.into(),
            steps,
            trigger_type: TriggerType::Manual,
            trigger_config: DataMap::new(),
            is_active: true,
            created_at: Utc::now(),
        }
    }

    /// Reject definitions that could never run: a blank name, unnamed steps
    /// or a step whose type/config does not parse.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.name.trim().is_empty() {
            return Err(EngineError::InvalidWorkflow("workflow name must not be empty".into()));
        }
        for (index, step) in self.steps.iter().enumerate() {
            if step.name.trim().is_empty() {
                return Err(EngineError::InvalidWorkflow(format!(
                    "step {index} has an empty name"
                )));
            }
            step.action().map_err(|e| {
                EngineError::InvalidWorkflow(format!("step '{}': {e}", step.name))
            })?;
        }
        Ok(())
    }

    pub fn to_row(&self) -> Result<WorkflowRow, EngineError> {
        Ok(WorkflowRow {
            id: self.id,
            owner_id: self.owner_id,
            name: self.name.clone(),
            steps: serde_json::to_value(&self.steps)?,
            trigger_type: self.trigger_type.as_str().to_owned(),
            trigger_config: Value::Object(self.trigger_config.clone()),
            is_active: self.is_active,
            created_at: self.created_at,
        })
    }
}

impl TryFrom<WorkflowRow> for Workflow {
    type Error = EngineError;

    fn try_from(row: WorkflowRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            owner_id: row.owner_id,
            name: row.name,
            steps: serde_json::from_value(row.steps)?,
            trigger_type: row.trigger_type.parse()?,
            trigger_config: object_or_empty(row.trigger_config),
            is_active: row.is_active,
            created_at: row.created_at,
        })
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Where a delayed execution picks up again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Index of the first step still to run.
    pub next_step: usize,
    pub resume_at: DateTime<Utc>,
    /// Accumulated data at the moment of suspension.
    pub data: DataMap,
}

/// One run of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub status: ExecutionStatus,
    pub input_data: DataMap,
    pub output_data: Option<DataMap>,
    pub step_results: Vec<StepResult>,
    pub error_message: Option<String>,
    pub checkpoint: Option<Checkpoint>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowExecution {
    /// A fresh `running` execution with no step results.
    pub fn start(workflow_id: Uuid, input_data: DataMap) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            status: ExecutionStatus::Running,
            input_data,
            output_data: None,
            step_results: Vec::new(),
            error_message: None,
            checkpoint: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn to_row(&self) -> Result<WorkflowExecutionRow, EngineError> {
        Ok(WorkflowExecutionRow {
            id: self.id,
            workflow_id: self.workflow_id,
            status: self.status,
            input_data: Value::Object(self.input_data.clone()),
            output_data: self.output_data.clone().map(Value::Object),
            step_results: serde_json::to_value(&self.step_results)?,
            error_message: self.error_message.clone(),
            checkpoint: self.checkpoint.as_ref().map(serde_json::to_value).transpose()?,
            resume_at: self.checkpoint.as_ref().map(|c| c.resume_at),
            started_at: self.started_at,
            completed_at: self.completed_at,
        })
    }
}

impl TryFrom<WorkflowExecutionRow> for WorkflowExecution {
    type Error = EngineError;

    fn try_from(row: WorkflowExecutionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            workflow_id: row.workflow_id,
            status: row.status,
            input_data: object_or_empty(row.input_data),
            output_data: row.output_data.map(object_or_empty),
            step_results: serde_json::from_value(row.step_results)?,
            error_message: row.error_message,
            checkpoint: row.checkpoint.map(serde_json::from_value).transpose()?,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

fn object_or_empty(value: Value) -> DataMap {
    match value {
        Value::Object(map) => map,
        Value::Null => DataMap::new(),
        other => {
            let mut map = DataMap::new();
            map.insert("value".into(), other);
            map
        }
    }
}

/// Output recorded for a `delay` step.
pub(crate) fn delay_output(duration: Duration) -> DataMap {
    let mut output = DataMap::new();
    output.insert("delayed_for".into(), json!(duration.as_millis() as u64));
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_type_is_serialised_as_type() {
        let step = WorkflowStep::new("wait", "delay", json!({ "delay_seconds": 1 }));
        let v = serde_json::to_value(&step).unwrap();
        assert_eq!(v, json!({ "name": "wait", "type": "delay", "config": { "delay_seconds": 1 } }));

        let back: WorkflowStep = serde_json::from_value(json!({ "name": "b", "type": "birthday_check" })).unwrap();
        assert!(back.config.is_empty());
    }

    #[test]
    fn delay_defaults_and_validation() {
        let d = WorkflowStep::new("d", "delay", json!({})).action().unwrap();
        assert_eq!(d, StepAction::Delay { duration: Duration::from_secs(5) });

        let d = WorkflowStep::new("d", "delay", json!({ "delay_seconds": "0.5" })).action().unwrap();
        assert_eq!(d, StepAction::Delay { duration: Duration::from_millis(500) });

        assert!(matches!(
            WorkflowStep::new("d", "delay", json!({ "delay_seconds": -1 })).action(),
            Err(StepError::InvalidConfig { .. })
        ));
        assert!(matches!(
            WorkflowStep::new("d", "delay", json!({ "delay_seconds": [1] })).action(),
            Err(StepError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn conditional_config() {
        let c = WorkflowStep::new("c", "conditional", json!({ "condition": "data.x", "skip_on_false": true }))
            .action()
            .unwrap();
        assert_eq!(c, StepAction::Conditional { condition: "data.x".into(), skip_on_false: true });

        let c = WorkflowStep::new("c", "conditional", json!({})).action().unwrap();
        assert_eq!(c, StepAction::Conditional { condition: String::new(), skip_on_false: false });

        assert!(WorkflowStep::new("c", "conditional", json!({ "skip_on_false": "yes" })).action().is_err());
    }

    #[test]
    fn unknown_step_type() {
        assert!(matches!(
            WorkflowStep::new("x", "teleport", json!({})).action(),
            Err(StepError::UnknownStepType(t)) if t == "teleport"
        ));
    }

    #[test]
    fn validate_rejects_bad_definitions() {
        let owner = Uuid::new_v4();
        assert!(Workflow::new(owner, "ok", vec![WorkflowStep::new("b", "birthday_check", json!({}))])
            .validate()
            .is_ok());
        assert!(Workflow::new(owner, "ok", vec![]).validate().is_ok());
        assert!(Workflow::new(owner, "  ", vec![]).validate().is_err());
        assert!(Workflow::new(owner, "wf", vec![WorkflowStep::new("", "delay", json!({}))])
            .validate()
            .is_err());

        let err = Workflow::new(owner, "wf", vec![WorkflowStep::new("x", "teleport", json!({}))])
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("teleport"), "{err}");
    }

    #[test]
    fn workflow_row_conversion_keeps_steps() {
        let mut wf = Workflow::new(
            Uuid::new_v4(),
            "reminders",
            vec![
                WorkflowStep::new("b", "birthday_check", json!({})),
                WorkflowStep::new("n", "send_notifications", json!({ "channel": "email" })),
            ],
        );
        wf.trigger_type = TriggerType::Scheduled;

        let row = wf.to_row().unwrap();
        assert_eq!(row.trigger_type, "scheduled");
        let back = Workflow::try_from(row).unwrap();
        assert_eq!(back.steps, wf.steps);
        assert_eq!(back.trigger_type, TriggerType::Scheduled);
    }

    #[test]
    fn checkpoint_mirrors_resume_at_on_row() {
        let mut exec = WorkflowExecution::start(Uuid::new_v4(), DataMap::new());
        let resume_at = Utc::now();
        exec.status = ExecutionStatus::Delayed;
        exec.checkpoint = Some(Checkpoint { next_step: 2, resume_at, data: DataMap::new() });

        let row = exec.to_row().unwrap();
        assert_eq!(row.resume_at, Some(resume_at));
        let back = WorkflowExecution::try_from(row).unwrap();
        assert_eq!(back.checkpoint.unwrap().next_step, 2);
    }
}
