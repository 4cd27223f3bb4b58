//! Handler for `send_notification` tasks.
//!
//! The task's `notification_preference` selects the channels.  With `both`,
//! email and WhatsApp are attempted independently; the task completes if at
//! least one channel delivered.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, warn};

use db::models::AgentTaskRow;
use effects::{DataMap, EffectError, NotificationChannel};

use crate::{QueueError, TaskHandler, TaskReport};

/// Task type drained by [`NotificationHandler`].
pub const SEND_NOTIFICATION: &str = "send_notification";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationPreference {
    Email,
    Whatsapp,
    Both,
}

impl NotificationPreference {
    /// Read the preference from task data; absent means email.
    pub fn from_task_data(data: &DataMap) -> Result<Self, QueueError> {
        match data.get("notification_preference") {
            None | Some(Value::Null) => Ok(Self::Email),
            Some(Value::String(s)) => match s.as_str() {
                "email" => Ok(Self::Email),
                "whatsapp" => Ok(Self::Whatsapp),
                "both" => Ok(Self::Both),
                other => Err(QueueError::InvalidTaskData(format!(
                    "unknown notification preference '{other}'"
                ))),
            },
            Some(other) => Err(QueueError::InvalidTaskData(format!(
                "notification preference must be a string, got {other}"
            ))),
        }
    }

    fn methods(self) -> &'static [&'static str] {
        match self {
            Self::Email => &["email"],
            Self::Whatsapp => &["whatsapp"],
            Self::Both => &["email", "whatsapp"],
        }
    }
}

/// Delivers notification tasks through the configured channels.
///
/// A channel left as `None` counts as an attempted-and-failed delivery.
pub struct NotificationHandler {
    email: Option<Arc<dyn NotificationChannel>>,
    whatsapp: Option<Arc<dyn NotificationChannel>>,
}

impl NotificationHandler {
    pub fn new(
        email: Option<Arc<dyn NotificationChannel>>,
        whatsapp: Option<Arc<dyn NotificationChannel>>,
    ) -> Self {
        Self { email, whatsapp }
    }

    fn channel(&self, method: &str) -> Option<&Arc<dyn NotificationChannel>> {
        match method {
            "email" => self.email.as_ref(),
            "whatsapp" => self.whatsapp.as_ref(),
            _ => None,
        }
    }

    async fn send_via(&self, method: &'static str, payload: &DataMap) -> Result<(), EffectError> {
        let channel = self
            .channel(method)
            .ok_or(EffectError::NotConfigured(match method {
                "email" => "email channel",
                _ => "whatsapp channel",
            }))?;
        debug!(method, channel = channel.name(), "sending notification");
        channel.send(payload).await.map(|_| ())
    }
}

#[async_trait]
impl TaskHandler for NotificationHandler {
    async fn handle(&self, task: &AgentTaskRow) -> Result<TaskReport, QueueError> {
        let payload = task
            .task_data
            .as_object()
            .ok_or_else(|| QueueError::InvalidTaskData("task_data must be an object".into()))?;
        let preference = NotificationPreference::from_task_data(payload)?;

        let mut attempted = Vec::new();
        let mut sent = Vec::new();
        let mut failures = Vec::new();

        for &method in preference.methods() {
            attempted.push(method);
            match self.send_via(method, payload).await {
                Ok(()) => sent.push(method),
                Err(e) => {
                    warn!(method, error = %e, "notification channel failed");
                    failures.push(format!("{method}: {e}"));
                }
            }
        }

        let mut result_data = DataMap::new();
        result_data.insert("methods_attempted".into(), json!(attempted));
        result_data.insert("methods_sent".into(), json!(sent));
        result_data.insert("processed_at".into(), json!(Utc::now().to_rfc3339()));

        Ok(TaskReport {
            succeeded: !sent.is_empty(),
            result_data,
            error_message: (!failures.is_empty()).then(|| failures.join("; ")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use db::models::TaskStatus;
    use db::{MemoryStore, Store};
    use effects::mock::MockChannel;
    use uuid::Uuid;

    use crate::{HandlerRegistry, TaskQueueProcessor};

    fn handler(email: MockChannel, whatsapp: MockChannel) -> NotificationHandler {
        NotificationHandler::new(
            Some(Arc::new(email) as Arc<dyn NotificationChannel>),
            Some(Arc::new(whatsapp) as Arc<dyn NotificationChannel>),
        )
    }

    fn task(data: Value) -> AgentTaskRow {
        AgentTaskRow::pending(Uuid::new_v4(), SEND_NOTIFICATION, data, None)
    }

    #[tokio::test]
    async fn both_completes_when_one_channel_delivers() {
        let report = handler(
            MockChannel::succeeding("email"),
            MockChannel::failing("whatsapp", "number not on whatsapp"),
        )
        .handle(&task(json!({ "notification_preference": "both", "message": "hi" })))
        .await
        .unwrap();

        assert!(report.succeeded);
        assert_eq!(report.result_data["methods_attempted"], json!(["email", "whatsapp"]));
        assert_eq!(report.result_data["methods_sent"], json!(["email"]));
        assert!(report.result_data.contains_key("processed_at"));
        let err = report.error_message.unwrap();
        assert!(err.contains("whatsapp"), "{err}");
        assert!(err.contains("number not on whatsapp"), "{err}");
    }

    #[tokio::test]
    async fn both_fails_only_when_every_channel_fails() {
        let report = handler(
            MockChannel::failing("email", "smtp down"),
            MockChannel::failing("whatsapp", "gateway down"),
        )
        .handle(&task(json!({ "notification_preference": "both" })))
        .await
        .unwrap();

        assert!(!report.succeeded);
        assert_eq!(report.result_data["methods_sent"], json!([]));
        assert_eq!(
            report.error_message.as_deref(),
            Some("email: smtp down; whatsapp: gateway down")
        );
    }

    #[tokio::test]
    async fn payload_is_forwarded_unchanged() {
        let email = Arc::new(MockChannel::succeeding("email"));
        let handler =
            NotificationHandler::new(Some(email.clone() as Arc<dyn NotificationChannel>), None);
        let data = json!({ "recipient_email": "a@b.c", "custom": { "nested": [1, 2] } });

        handler.handle(&task(data.clone())).await.unwrap();

        let sent = email.sent.lock().unwrap();
        assert_eq!(Value::Object(sent[0].clone()), data);
    }

    #[tokio::test]
    async fn missing_channel_counts_as_failure() {
        let handler = NotificationHandler::new(None, None);
        let report = handler
            .handle(&task(json!({ "notification_preference": "whatsapp" })))
            .await
            .unwrap();
        assert!(!report.succeeded);
        assert_eq!(
            report.error_message.as_deref(),
            Some("whatsapp: whatsapp channel is not configured")
        );
    }

    #[tokio::test]
    async fn unknown_preference_is_rejected() {
        let err = handler(MockChannel::succeeding("email"), MockChannel::succeeding("whatsapp"))
            .handle(&task(json!({ "notification_preference": "pigeon" })))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::InvalidTaskData(_)));
    }

    #[tokio::test]
    async fn drain_marks_mixed_delivery_completed() {
        let store = Arc::new(MemoryStore::new());
        let t = task(json!({ "notification_preference": "both" }));
        store.insert_task(&t).await.unwrap();

        let mut handlers = HandlerRegistry::new();
        handlers.insert(
            SEND_NOTIFICATION.into(),
            Arc::new(handler(
                MockChannel::succeeding("email"),
                MockChannel::failing("whatsapp", "rate limited"),
            )) as Arc<dyn TaskHandler>,
        );
        TaskQueueProcessor::new(store.clone(), handlers)
            .drain(SEND_NOTIFICATION)
            .await
            .unwrap();

        let stored = store.get_task(t.id).await.unwrap();
        assert_eq!(stored.task_status, TaskStatus::Completed);
        assert_eq!(stored.result_data.unwrap()["methods_sent"], json!(["email"]));
        assert!(stored.error_message.unwrap().contains("whatsapp: rate limited"));
    }
}
