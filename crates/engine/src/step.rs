//! Single-step execution.
//!
//! [`StepExecutor::run`] never fails: every error is folded into a `failed`
//! [`StepResult`] with an empty output.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;

use effects::{DataMap, EffectDispatcher, EffectError};

use crate::condition;
use crate::error::StepError;
use crate::models::{delay_output, StepAction, StepResult, StepStatus, WorkflowStep};
use crate::value;

/// Runs one step against the current data context.
#[derive(Debug, Clone, Default)]
pub struct StepExecutor {
    effect_timeout: Option<Duration>,
}

/// What a successful step produced.
struct StepOutcome {
    status: StepStatus,
    output: DataMap,
}

impl StepOutcome {
    fn completed(output: DataMap) -> Self {
        Self { status: StepStatus::Completed, output }
    }
}

impl StepExecutor {
    /// `effect_timeout` bounds every dispatcher call.
    pub fn new(effect_timeout: Option<Duration>) -> Self {
        Self { effect_timeout }
    }

    pub async fn run(
        &self,
        step: &WorkflowStep,
        input: &DataMap,
        dispatcher: &dyn EffectDispatcher,
    ) -> StepResult {
        let started_at = Utc::now();
        let outcome = self.execute(step, input, dispatcher).await;
        let completed_at = Some(Utc::now());

        match outcome {
            Ok(StepOutcome { status, output }) => StepResult {
                step_name: step.name.clone(),
                step_type: step.step_type.clone(),
                status,
                output,
                error: None,
                started_at,
                completed_at,
            },
            Err(e) => StepResult {
                step_name: step.name.clone(),
                step_type: step.step_type.clone(),
                status: StepStatus::Failed,
                output: DataMap::new(),
                error: Some(e.to_string()),
                started_at,
                completed_at,
            },
        }
    }

    async fn execute(
        &self,
        step: &WorkflowStep,
        input: &DataMap,
        dispatcher: &dyn EffectDispatcher,
    ) -> Result<StepOutcome, StepError> {
        match step.action()? {
            StepAction::BirthdayCheck => {
                let output = self.effect(dispatcher.check_birthdays()).await?;
                Ok(StepOutcome::completed(output))
            }
            StepAction::SentimentAnalysis => {
                let content = value::string(input, "email_content")
                    .ok_or(StepError::MissingInput("email_content"))?;
                let subject = input.get("subject").and_then(|v| v.as_str()).unwrap_or_default();
                let sender = input.get("sender").and_then(|v| v.as_str()).unwrap_or_default();
                let output = self
                    .effect(dispatcher.analyze_sentiment(content, subject, sender))
                    .await?;
                Ok(StepOutcome::completed(output))
            }
            StepAction::SendNotifications => {
                let output = self.effect(dispatcher.send_pending_notifications()).await?;
                Ok(StepOutcome::completed(output))
            }
            StepAction::Delay { duration } => {
                tokio::time::sleep(duration).await;
                Ok(StepOutcome::completed(delay_output(duration)))
            }
            StepAction::Conditional { condition, skip_on_false } => {
                let met = condition::evaluate(&condition, input);
                let mut output = DataMap::new();
                output.insert("condition_met".into(), json!(met));
                let status = if !met && skip_on_false {
                    StepStatus::Skipped
                } else {
                    StepStatus::Completed
                };
                Ok(StepOutcome { status, output })
            }
        }
    }

    async fn effect<F>(&self, call: F) -> Result<DataMap, StepError>
    where
        F: Future<Output = Result<DataMap, EffectError>>,
    {
        let result = match self.effect_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| EffectError::Timeout(limit))?,
            None => call.await,
        };
        Ok(result?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use effects::mock::{MockBehaviour, MockCall, MockDispatcher};
    use serde_json::Value;

    fn ctx(v: Value) -> DataMap {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn birthday_check_returns_dispatcher_output() {
        let dispatcher = MockDispatcher::new()
            .with_birthdays(MockBehaviour::ReturnValue(json!({ "birthdays_found": 3 })));
        let step = WorkflowStep::new("b", "birthday_check", json!({}));

        let result = StepExecutor::default().run(&step, &DataMap::new(), &dispatcher).await;

        assert_eq!(result.status, StepStatus::Completed);
        assert_eq!(result.output["birthdays_found"], json!(3));
        assert!(result.completed_at.unwrap() >= result.started_at);
    }

    #[tokio::test]
    async fn sentiment_requires_email_content() {
        let dispatcher = MockDispatcher::new();
        let step = WorkflowStep::new("s", "sentiment_analysis", json!({}));

        let result = StepExecutor::default()
            .run(&step, &ctx(json!({ "email_content": "   " })), &dispatcher)
            .await;

        assert_eq!(result.status, StepStatus::Failed);
        assert!(result.output.is_empty());
        assert!(result.error.unwrap().contains("email_content"));
        assert_eq!(dispatcher.call_count(), 0);
    }

    #[tokio::test]
    async fn sentiment_forwards_subject_and_sender() {
        let dispatcher = MockDispatcher::new();
        let step = WorkflowStep::new("s", "sentiment_analysis", json!({}));
        let input = ctx(json!({ "email_content": "I am upset", "subject": "Re: order" }));

        let result = StepExecutor::default().run(&step, &input, &dispatcher).await;

        assert_eq!(result.status, StepStatus::Completed);
        assert_eq!(
            dispatcher.recorded(),
            vec![MockCall::AnalyzeSentiment {
                content: "I am upset".into(),
                subject: "Re: order".into(),
                sender: String::new(),
            }]
        );
    }

    #[tokio::test]
    async fn dispatcher_errors_become_failed_results() {
        let dispatcher = MockDispatcher::new()
            .with_notifications(MockBehaviour::Fail("relay unreachable".into()));
        let step = WorkflowStep::new("n", "send_notifications", json!({}));

        let result = StepExecutor::default().run(&step, &DataMap::new(), &dispatcher).await;

        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("relay unreachable"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_effects_time_out() {
        let dispatcher = MockDispatcher::new()
            .with_birthdays(MockBehaviour::Stall(Duration::from_secs(120)));
        let step = WorkflowStep::new("b", "birthday_check", json!({}));

        let result = StepExecutor::new(Some(Duration::from_secs(5)))
            .run(&step, &DataMap::new(), &dispatcher)
            .await;

        assert_eq!(result.status, StepStatus::Failed);
        assert!(result.error.unwrap().contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn delay_sleeps_and_reports_milliseconds() {
        let step = WorkflowStep::new("d", "delay", json!({ "delay_seconds": 2 }));
        let before = tokio::time::Instant::now();

        let result = StepExecutor::default().run(&step, &DataMap::new(), &MockDispatcher::new()).await;

        assert!(before.elapsed() >= Duration::from_secs(2));
        assert_eq!(result.output["delayed_for"], json!(2000));
    }

    #[tokio::test]
    async fn conditional_skips_only_when_asked() {
        let input = ctx(json!({ "birthdays_found": 0 }));
        let dispatcher = MockDispatcher::new();

        let skip = WorkflowStep::new(
            "c",
            "conditional",
            json!({ "condition": "data.birthdays_found > 0", "skip_on_false": true }),
        );
        let result = StepExecutor::default().run(&skip, &input, &dispatcher).await;
        assert_eq!(result.status, StepStatus::Skipped);
        assert_eq!(result.output["condition_met"], json!(false));

        let keep = WorkflowStep::new("c", "conditional", json!({ "condition": "data.birthdays_found > 0" }));
        let result = StepExecutor::default().run(&keep, &input, &dispatcher).await;
        assert_eq!(result.status, StepStatus::Completed);
        assert_eq!(result.output["condition_met"], json!(false));
    }

    #[tokio::test]
    async fn unknown_step_type_fails() {
        let step = WorkflowStep::new("x", "teleport", json!({}));
        let result = StepExecutor::default().run(&step, &DataMap::new(), &MockDispatcher::new()).await;
        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("unknown step type 'teleport'"));
        assert_eq!(result.step_type, "teleport");
    }
}
