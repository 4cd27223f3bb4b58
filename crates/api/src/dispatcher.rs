//! Production [`EffectDispatcher`].
//!
//! Analysis capabilities go to the HTTP services; "send pending
//! notifications" drains the `send_notification` queue in-process.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use db::models::TaskStatus;
use effects::http::HttpEffects;
use effects::{DataMap, EffectDispatcher, EffectError};
use queue::{TaskOutcome, TaskQueueProcessor, SEND_NOTIFICATION};

pub struct ServiceDispatcher {
    services: HttpEffects,
    outbox: Arc<TaskQueueProcessor>,
}

impl ServiceDispatcher {
    /// `outbox` must have a handler registered for `send_notification`.
    pub fn new(services: HttpEffects, outbox: Arc<TaskQueueProcessor>) -> Self {
        Self { services, outbox }
    }
}

#[async_trait]
impl EffectDispatcher for ServiceDispatcher {
    async fn check_birthdays(&self) -> Result<DataMap, EffectError> {
        self.services.check_birthdays().await
    }

    async fn analyze_sentiment(
        &self,
        content: &str,
        subject: &str,
        sender: &str,
    ) -> Result<DataMap, EffectError> {
        self.services.analyze_sentiment(content, subject, sender).await
    }

    async fn send_pending_notifications(&self) -> Result<DataMap, EffectError> {
        let outcomes = self
            .outbox
            .drain(SEND_NOTIFICATION)
            .await
            .map_err(|e| EffectError::Failed(e.to_string()))?;
        summarize(&outcomes)
    }
}

fn summarize(outcomes: &[TaskOutcome]) -> Result<DataMap, EffectError> {
    let completed = outcomes.iter().filter(|o| o.status == TaskStatus::Completed).count();
    let mut summary = DataMap::new();
    summary.insert("processed".into(), json!(outcomes.len()));
    summary.insert("completed".into(), json!(completed));
    summary.insert("failed".into(), json!(outcomes.len() - completed));
    summary.insert(
        "outcomes".into(),
        serde_json::to_value(outcomes).map_err(|e| EffectError::Failed(e.to_string()))?,
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use db::models::AgentTaskRow;
    use db::{MemoryStore, Store};
    use effects::http::build_client;
    use effects::mock::MockChannel;
    use effects::NotificationChannel;
    use queue::{HandlerRegistry, NotificationHandler, TaskHandler};
    use uuid::Uuid;

    fn dispatcher(store: Arc<MemoryStore>, email: MockChannel) -> ServiceDispatcher {
        let handler = NotificationHandler::new(
            Some(Arc::new(email) as Arc<dyn NotificationChannel>),
            None,
        );
        let mut handlers = HandlerRegistry::new();
        handlers.insert(SEND_NOTIFICATION.into(), Arc::new(handler) as Arc<dyn TaskHandler>);
        ServiceDispatcher::new(
            HttpEffects::new(build_client(None).unwrap(), None, None),
            Arc::new(TaskQueueProcessor::new(store, handlers)),
        )
    }

    #[tokio::test]
    async fn notifications_drain_the_outbox() {
        let store = Arc::new(MemoryStore::new());
        let owner = Uuid::new_v4();
        for preference in ["email", "whatsapp"] {
            let task = AgentTaskRow::pending(
                owner,
                SEND_NOTIFICATION,
                json!({ "notification_preference": preference }),
                None,
            );
            store.insert_task(&task).await.unwrap();
        }

        let summary = dispatcher(store, MockChannel::succeeding("email"))
            .send_pending_notifications()
            .await
            .unwrap();

        assert_eq!(summary["processed"], json!(2));
        assert_eq!(summary["completed"], json!(1));
        assert_eq!(summary["failed"], json!(1));
        assert_eq!(summary["outcomes"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unconfigured_services_report_it() {
        let store = Arc::new(MemoryStore::new());
        let err = dispatcher(store, MockChannel::succeeding("email"))
            .check_birthdays()
            .await
            .unwrap_err();
        assert_eq!(err, EffectError::NotConfigured("birthday service"));
    }
}
