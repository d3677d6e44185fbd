use crate::config::Notification as NotificationConfig;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Delivery channel for class notifications.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, uuid: &str, text: &str) -> Result<()>;
}

/// Posts each notification as JSON to a messaging webhook.
#[derive(Clone)]
pub struct WebhookNotifier {
    http: Client,
    endpoint: Url,
    token: String,
}

impl fmt::Debug for WebhookNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookNotifier")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl WebhookNotifier {
    pub fn new(endpoint: Url, token: String, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .user_agent("pass-batch/0.1")
            .timeout(timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            http,
            endpoint,
            token,
        })
    }

    pub fn from_config(cfg: &NotificationConfig) -> Result<Self> {
        let endpoint = Url::parse(&cfg.webhook_url).context("invalid notification.webhook_url")?;
        Self::new(
            endpoint,
            cfg.token.clone(),
            Duration::from_secs(cfg.timeout_seconds),
        )
    }

    pub fn build_request(&self, body: &Value) -> Result<reqwest::Request> {
        self.http
            .post(self.endpoint.clone())
            .header("Authorization", format!("Bearer {}", self.token))
            .json(body)
            .build()
            .context("failed to build notification request")
    }
}

pub fn build_message_body(uuid: &str, text: &str) -> Value {
    json!({
        "receiver_uuids": [uuid],
        "template_object": {
            "object_type": "text",
            "text": text,
        }
    })
}

#[async_trait]
impl NotificationSender for WebhookNotifier {
    async fn send(&self, uuid: &str, text: &str) -> Result<()> {
        let body = build_message_body(uuid, text);
        let request = self.build_request(&body)?;
        debug!(url = %request.url(), "sending notification");
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach notification webhook")?;

        if res.status() == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("received 429 from notification webhook: {}", body));
        }
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("notification webhook error {}: {}", status, body));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_carries_token_and_body() {
        let notifier = WebhookNotifier::new(
            Url::parse("http://localhost:9/messages").unwrap(),
            "secret".into(),
            Duration::from_secs(1),
        )
        .unwrap();
        let body = build_message_body("uuid-1", "hello");
        let req = notifier.build_request(&body).unwrap();

        assert_eq!(req.method(), reqwest::Method::POST);
        assert_eq!(req.url().as_str(), "http://localhost:9/messages");
        assert_eq!(
            req.headers().get("Authorization").unwrap(),
            "Bearer secret"
        );
        let sent: Value = serde_json::from_slice(req.body().unwrap().as_bytes().unwrap()).unwrap();
        assert_eq!(sent["receiver_uuids"][0], "uuid-1");
        assert_eq!(sent["template_object"]["text"], "hello");
    }
}
