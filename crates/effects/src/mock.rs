//! Test doubles for [`EffectDispatcher`] and [`NotificationChannel`].
//!
//! Both mocks record every call they receive and answer with a
//! programmer-specified result, so engine and queue tests run without any
//! real collaborator.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::traits::into_map;
use crate::{DataMap, EffectDispatcher, EffectError, NotificationChannel};

/// Behaviour injected into a mock at construction time.
#[derive(Debug, Clone)]
pub enum MockBehaviour {
    /// Succeed with the given JSON value (objects become the output map,
    /// anything else is wrapped as `{"result": value}`).
    ReturnValue(Value),
    /// Fail with [`EffectError::Failed`].
    Fail(String),
    /// Sleep for the duration, then succeed with an empty map.
    Stall(Duration),
}

impl MockBehaviour {
    async fn play(&self) -> Result<DataMap, EffectError> {
        match self {
            Self::ReturnValue(v) => Ok(into_map(v.clone())),
            Self::Fail(msg) => Err(EffectError::Failed(msg.clone())),
            Self::Stall(d) => {
                tokio::time::sleep(*d).await;
                Ok(DataMap::new())
            }
        }
    }
}

/// One recorded dispatcher call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    CheckBirthdays,
    AnalyzeSentiment {
        content: String,
        subject: String,
        sender: String,
    },
    SendPendingNotifications,
}

/// A dispatcher whose three capabilities are scripted independently.
pub struct MockDispatcher {
    birthdays: MockBehaviour,
    sentiment: MockBehaviour,
    notifications: MockBehaviour,
    /// All calls seen by this dispatcher (in call order).
    pub calls: Arc<Mutex<Vec<MockCall>>>,
}

impl Default for MockDispatcher {
    fn default() -> Self {
        Self {
            birthdays: MockBehaviour::ReturnValue(json!({ "birthdays_found": 0 })),
            sentiment: MockBehaviour::ReturnValue(json!({ "sentiment": "neutral" })),
            notifications: MockBehaviour::ReturnValue(json!({ "processed": 0 })),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl MockDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_birthdays(mut self, behaviour: MockBehaviour) -> Self {
        self.birthdays = behaviour;
        self
    }

    pub fn with_sentiment(mut self, behaviour: MockBehaviour) -> Self {
        self.sentiment = behaviour;
        self
    }

    pub fn with_notifications(mut self, behaviour: MockBehaviour) -> Self {
        self.notifications = behaviour;
        self
    }

    /// Number of calls received across all capabilities.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Snapshot of the recorded calls.
    pub fn recorded(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: MockCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl EffectDispatcher for MockDispatcher {
    async fn check_birthdays(&self) -> Result<DataMap, EffectError> {
        self.record(MockCall::CheckBirthdays);
        self.birthdays.play().await
    }

    async fn analyze_sentiment(
        &self,
        content: &str,
        subject: &str,
        sender: &str,
    ) -> Result<DataMap, EffectError> {
        self.record(MockCall::AnalyzeSentiment {
            content: content.to_owned(),
            subject: subject.to_owned(),
            sender: sender.to_owned(),
        });
        self.sentiment.play().await
    }

    async fn send_pending_notifications(&self) -> Result<DataMap, EffectError> {
        self.record(MockCall::SendPendingNotifications);
        self.notifications.play().await
    }
}

/// A notification channel that records every payload it is asked to send.
pub struct MockChannel {
    name: String,
    behaviour: MockBehaviour,
    /// All payloads seen by this channel (in call order).
    pub sent: Arc<Mutex<Vec<DataMap>>>,
}

impl MockChannel {
    /// Create a channel that always succeeds.
    pub fn succeeding(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            behaviour: MockBehaviour::ReturnValue(json!({ "delivered": true })),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a channel that always fails with `msg`.
    pub fn failing(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            behaviour: MockBehaviour::Fail(msg.into()),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn call_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl NotificationChannel for MockChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, payload: &DataMap) -> Result<Value, EffectError> {
        self.sent.lock().unwrap().push(payload.clone());
        self.behaviour.play().await.map(Value::Object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dispatcher_records_calls_in_order() {
        let mock = MockDispatcher::new()
            .with_sentiment(MockBehaviour::ReturnValue(json!({ "score": 0.9 })));

        mock.check_birthdays().await.unwrap();
        let out = mock.analyze_sentiment("hi", "subj", "a@b.c").await.unwrap();

        assert_eq!(out["score"], 0.9);
        assert_eq!(
            mock.recorded(),
            vec![
                MockCall::CheckBirthdays,
                MockCall::AnalyzeSentiment {
                    content: "hi".into(),
                    subject: "subj".into(),
                    sender: "a@b.c".into(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn failing_channel_still_records_payload() {
        let channel = MockChannel::failing("whatsapp", "gateway down");
        let mut payload = DataMap::new();
        payload.insert("message".into(), json!("hello"));

        let err = channel.send(&payload).await.unwrap_err();
        assert_eq!(err, EffectError::Failed("gateway down".into()));
        assert_eq!(channel.call_count(), 1);
    }
}
