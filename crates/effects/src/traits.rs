//! The collaborator contracts every effect implementation must fulfil.

use async_trait::async_trait;
use serde_json::Value;

use crate::EffectError;

/// A JSON object used as step input/output and as opaque task payload.
pub type DataMap = serde_json::Map<String, Value>;

/// Normalise a collaborator answer into an output map.
pub(crate) fn into_map(value: Value) -> DataMap {
    match value {
        Value::Object(map) => map,
        Value::Null => DataMap::new(),
        other => {
            let mut map = DataMap::new();
            map.insert("result".into(), other);
            map
        }
    }
}

/// Named capabilities the step executor may invoke.
///
/// Implementations are expected to be cheap to share (`Arc<dyn …>`) and
/// safe to call from any task.
#[async_trait]
pub trait EffectDispatcher: Send + Sync {
    /// Trigger the birthday-matching subsystem.
    async fn check_birthdays(&self) -> Result<DataMap, EffectError>;

    /// Trigger sentiment analysis for a single email.
    async fn analyze_sentiment(
        &self,
        content: &str,
        subject: &str,
        sender: &str,
    ) -> Result<DataMap, EffectError>;

    /// Trigger a drain of pending notification tasks.
    async fn send_pending_notifications(&self) -> Result<DataMap, EffectError>;
}

/// A single delivery channel for notification tasks (email, WhatsApp, …).
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Channel name as it appears in `result_data.methods_sent`.
    fn name(&self) -> &str;

    /// Deliver one notification.  `payload` is the task's `task_data`,
    /// forwarded unchanged.
    async fn send(&self, payload: &DataMap) -> Result<Value, EffectError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalar_answers_are_wrapped() {
        assert_eq!(into_map(json!(3))["result"], 3);
        assert!(into_map(Value::Null).is_empty());
        assert_eq!(into_map(json!({ "a": 1 }))["a"], 1);
    }
}
