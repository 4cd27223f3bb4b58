//! HTTP-backed collaborators.
//!
//! The birthday and sentiment subsystems, as well as the email / WhatsApp
//! relays, are separate services.  Each is reached with a JSON `POST`; the
//! JSON object in the response becomes the step output (or the channel
//! receipt).

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::traits::into_map;
use crate::{DataMap, EffectError, NotificationChannel};

/// Build the shared HTTP client used by every collaborator.
pub fn build_client(timeout: Option<Duration>) -> Result<reqwest::Client, EffectError> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build().map_err(|e| EffectError::Request {
        service: "http client".into(),
        message: e.to_string(),
    })
}

/// POST `body` to `url` and decode the JSON answer.
async fn post_json(
    client: &reqwest::Client,
    service: &str,
    url: &str,
    body: &Value,
) -> Result<Value, EffectError> {
    debug!(service, url, "posting to collaborator");

    let response = client
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                EffectError::Failed(format!("{service} timed out"))
            } else {
                EffectError::Request {
                    service: service.to_owned(),
                    message: e.to_string(),
                }
            }
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(EffectError::Status {
            service: service.to_owned(),
            status: status.as_u16(),
        });
    }

    let bytes = response.bytes().await.map_err(|e| EffectError::Request {
        service: service.to_owned(),
        message: e.to_string(),
    })?;
    if bytes.is_empty() {
        return Ok(Value::Null);
    }

    serde_json::from_slice(&bytes).map_err(|e| EffectError::Decode {
        service: service.to_owned(),
        message: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Analysis services
// ---------------------------------------------------------------------------

/// Client for the birthday-matching and sentiment-analysis services.
#[derive(Debug, Clone)]
pub struct HttpEffects {
    client: reqwest::Client,
    birthday_url: Option<String>,
    sentiment_url: Option<String>,
}

impl HttpEffects {
    pub fn new(
        client: reqwest::Client,
        birthday_url: Option<String>,
        sentiment_url: Option<String>,
    ) -> Self {
        Self {
            client,
            birthday_url,
            sentiment_url,
        }
    }

    pub async fn check_birthdays(&self) -> Result<DataMap, EffectError> {
        let url = self
            .birthday_url
            .as_deref()
            .ok_or(EffectError::NotConfigured("birthday service"))?;
        let value = post_json(&self.client, "birthday service", url, &json!({})).await?;
        Ok(into_map(value))
    }

    pub async fn analyze_sentiment(
        &self,
        content: &str,
        subject: &str,
        sender: &str,
    ) -> Result<DataMap, EffectError> {
        let url = self
            .sentiment_url
            .as_deref()
            .ok_or(EffectError::NotConfigured("sentiment service"))?;
        let body = json!({
            "email_content": content,
            "subject": subject,
            "sender": sender,
        });
        let value = post_json(&self.client, "sentiment service", url, &body).await?;
        Ok(into_map(value))
    }
}

// ---------------------------------------------------------------------------
// Notification relays
// ---------------------------------------------------------------------------

/// A notification channel that hands the task payload to a relay service.
#[derive(Debug, Clone)]
pub struct WebhookChannel {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(name: impl Into<String>, url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            client,
        }
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, payload: &DataMap) -> Result<Value, EffectError> {
        post_json(&self.client, &self.name, &self.url, &Value::Object(payload.clone())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_services_fail_without_network() {
        let effects = HttpEffects::new(reqwest::Client::new(), None, None);

        assert_eq!(
            effects.check_birthdays().await.unwrap_err(),
            EffectError::NotConfigured("birthday service")
        );
        assert_eq!(
            effects.analyze_sentiment("body", "", "").await.unwrap_err(),
            EffectError::NotConfigured("sentiment service")
        );
    }
}
