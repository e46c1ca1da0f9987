//! Delivery of alert messages to notification targets

use std::collections::HashMap;
use std::time::Duration;

use futures::future::BoxFuture;

use super::config::{AlertChannel, NotificationTarget};

/// Default per-delivery timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Something that can hand one message to one target
pub trait AlertSink: Send + Sync {
    fn deliver<'a>(
        &'a self,
        target: &'a NotificationTarget,
        message: &'a str,
    ) -> BoxFuture<'a, Result<(), NotifierError>>;
}

/// Notifier for sending alert messages over the configured channel
pub struct Notifier {
    client: reqwest::Client,
    channel: AlertChannel,
}

impl Notifier {
    /// Create a notifier whose every request is bounded by `timeout`
    pub fn new(channel: AlertChannel, timeout: Duration) -> Result<Self, NotifierError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifierError::Client(e.to_string()))?;

        Ok(Self { client, channel })
    }

    pub fn channel(&self) -> &AlertChannel {
        &self.channel
    }

    /// Send to a single target
    pub async fn notify(&self, target: &NotificationTarget, message: &str) -> Result<(), NotifierError> {
        match &self.channel {
            AlertChannel::Log => {
                tracing::warn!(target_id = %target.external_id, "Alert: {}", message);
                Ok(())
            }
            AlertChannel::Webhook { url, headers } => {
                self.send_webhook(target, url, headers, message).await
            }
            AlertChannel::Telegram { token, api_base } => {
                self.send_telegram(target, api_base, token, message).await
            }
        }
    }

    async fn send_webhook(
        &self,
        target: &NotificationTarget,
        url: &str,
        headers: &HashMap<String, String>,
        message: &str,
    ) -> Result<(), NotifierError> {
        let payload = serde_json::json!({
            "externalId": target.external_id,
            "message": message,
            "sentAt": chrono::Utc::now().to_rfc3339(),
        });

        let mut request = self.client.post(url).json(&payload);

        for (key, value) in headers {
            request = request.header(key, value);
        }

        let response = request.send().await.map_err(|e| {
            NotifierError::Webhook(format!("Failed to send webhook: {}", e))
        })?;

        if !response.status().is_success() {
            return Err(NotifierError::Webhook(format!(
                "Webhook returned status {}",
                response.status()
            )));
        }

        tracing::debug!(target_id = %target.external_id, url = %url, "Webhook alert sent");
        Ok(())
    }

    async fn send_telegram(
        &self,
        target: &NotificationTarget,
        api_base: &str,
        token: &str,
        message: &str,
    ) -> Result<(), NotifierError> {
        let url = format!("{}/bot{}/sendMessage", api_base.trim_end_matches('/'), token);
        let payload = serde_json::json!({
            "chat_id": target.external_id,
            "text": message,
        });

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifierError::Telegram(format!("Failed to reach Bot API: {}", e)))?;

        if !response.status().is_success() {
            return Err(NotifierError::Telegram(format!(
                "Bot API returned status {}",
                response.status()
            )));
        }

        tracing::debug!(target_id = %target.external_id, "Telegram alert sent");
        Ok(())
    }
}

impl AlertSink for Notifier {
    fn deliver<'a>(
        &'a self,
        target: &'a NotificationTarget,
        message: &'a str,
    ) -> BoxFuture<'a, Result<(), NotifierError>> {
        Box::pin(self.notify(target, message))
    }
}

/// Notifier errors
#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    #[error("HTTP client error: {0}")]
    Client(String),

    #[error("Webhook error: {0}")]
    Webhook(String),

    #[error("Telegram error: {0}")]
    Telegram(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, routing::post, Json, Router};
    use parking_lot::Mutex;
    use std::sync::Arc;

    type Captured = Arc<Mutex<Vec<serde_json::Value>>>;

    async fn capture(State(seen): State<Captured>, Json(body): Json<serde_json::Value>) {
        seen.lock().push(body);
    }

    /// Local HTTP endpoint recording every JSON body it receives
    async fn spawn_receiver(path: &str) -> (String, Captured) {
        let seen: Captured = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route(path, post(capture))
            .with_state(Arc::clone(&seen));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{}", addr), seen)
    }

    #[tokio::test]
    async fn test_log_notification() {
        let notifier = Notifier::new(AlertChannel::Log, DEFAULT_TIMEOUT).unwrap();

        let result = notifier
            .notify(&NotificationTarget::new("1"), "test message")
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_telegram_send_message() {
        let (base, seen) = spawn_receiver("/botsecret/sendMessage").await;
        let channel = AlertChannel::Telegram {
            token: "secret".to_string(),
            api_base: base,
        };
        let notifier = Notifier::new(channel, DEFAULT_TIMEOUT).unwrap();

        notifier
            .notify(&NotificationTarget::new("424242"), "Status: High")
            .await
            .unwrap();

        let bodies = seen.lock().clone();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0]["chat_id"], "424242");
        assert_eq!(bodies[0]["text"], "Status: High");
    }

    #[tokio::test]
    async fn test_webhook_send() {
        let (base, seen) = spawn_receiver("/hook").await;
        let notifier =
            Notifier::new(AlertChannel::webhook(format!("{}/hook", base)), DEFAULT_TIMEOUT).unwrap();

        notifier
            .deliver(&NotificationTarget::new("7"), "Status: Low")
            .await
            .unwrap();

        let bodies = seen.lock().clone();
        assert_eq!(bodies[0]["externalId"], "7");
        assert_eq!(bodies[0]["message"], "Status: Low");
    }

    #[tokio::test]
    async fn test_non_success_status_is_an_error() {
        let (base, _seen) = spawn_receiver("/hook").await;
        let notifier =
            Notifier::new(AlertChannel::webhook(format!("{}/missing", base)), DEFAULT_TIMEOUT).unwrap();

        let result = notifier.notify(&NotificationTarget::new("7"), "x").await;
        assert!(matches!(result, Err(NotifierError::Webhook(_))));
    }
}
