//! Downstream delivery of outbox messages.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use super::Headers;

/// Upper bound on a single webhook publish. Claim leases must outlast it.
pub const PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);

/// A failed publish. Every variant is treated as transient by the dispatcher.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("publisher unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(
        &self,
        event_type: &str,
        payload: &serde_json::Value,
        headers: &Headers,
    ) -> Result<(), PublishError>;
}

/// Writes each event to the log. Never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogPublisher;

#[async_trait]
impl Publisher for LogPublisher {
    async fn publish(
        &self,
        event_type: &str,
        payload: &serde_json::Value,
        headers: &Headers,
    ) -> Result<(), PublishError> {
        info!(
            event_type,
            event_id = headers.get("event-id").map(String::as_str).unwrap_or_default(),
            aggregate_id = headers.get("aggregate-id").map(String::as_str).unwrap_or_default(),
            payload = %payload,
            "Published event"
        );
        Ok(())
    }
}

#[derive(Serialize)]
struct WebhookBody<'a> {
    event_type: &'a str,
    payload: &'a serde_json::Value,
}

/// POSTs `{event_type, payload}` to a fixed URL with the dispatch headers.
/// Any non-2xx response is a failure.
#[derive(Debug, Clone)]
pub struct WebhookPublisher {
    url: String,
    client: reqwest::Client,
}

impl WebhookPublisher {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(PUBLISH_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            url: url.into(),
            client,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Publisher for WebhookPublisher {
    async fn publish(
        &self,
        event_type: &str,
        payload: &serde_json::Value,
        headers: &Headers,
    ) -> Result<(), PublishError> {
        let mut request = self
            .client
            .post(&self.url)
            .json(&WebhookBody {
                event_type,
                payload,
            });
        for (name, value) in headers {
            request = request.header(*name, value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(PublishError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn headers() -> Headers {
        BTreeMap::from([
            ("event-id", "evt_01J8Z3".to_string()),
            ("event-type", "allocation.created".to_string()),
            ("retry-count", "0".to_string()),
        ])
    }

    #[tokio::test]
    async fn test_webhook_posts_body_and_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/events"))
            .and(header("event-id", "evt_01J8Z3"))
            .and(header("event-type", "allocation.created"))
            .and(body_partial_json(serde_json::json!({
                "event_type": "allocation.created",
                "payload": {"allocation_code": "033730001"}
            })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let publisher = WebhookPublisher::new(format!("{}/events", server.uri()));
        publisher
            .publish(
                "allocation.created",
                &serde_json::json!({"allocation_code": "033730001"}),
                &headers(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_webhook_non_success_is_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let publisher = WebhookPublisher::new(server.uri());
        let err = publisher
            .publish("allocation.created", &serde_json::json!({}), &headers())
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::Rejected { status: 503, ref body } if body == "busy"));
    }

    #[tokio::test]
    async fn test_log_publisher_accepts_everything() {
        LogPublisher
            .publish("allocation.failed", &serde_json::json!({"x": 1}), &headers())
            .await
            .unwrap();
    }
}
