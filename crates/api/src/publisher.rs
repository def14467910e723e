//! Publishing outcome events through the Dapr sidecar's HTTP API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use saga::{EventPublisher, PublishError};
use serde_json::Value;
use tracing::{debug, warn};

/// Publishes to `{base_url}/v1.0/publish/{pubsub}/{topic}`.
///
/// Failures are reported, not retried: the saga abandons its idempotency
/// claim and the inbound event is redelivered.
#[derive(Debug, Clone)]
pub struct DaprEventPublisher {
    client: Client,
    base_url: String,
    pubsub_name: String,
}

impl DaprEventPublisher {
    pub fn new(base_url: impl Into<String>, pubsub_name: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            pubsub_name: pubsub_name.into(),
        })
    }

    /// The URL an event on `topic` is posted to.
    pub fn publish_url(&self, topic: &str) -> String {
        format!("{}/v1.0/publish/{}/{}", self.base_url, self.pubsub_name, topic)
    }
}

#[async_trait]
impl EventPublisher for DaprEventPublisher {
    async fn publish(&self, topic: &str, payload: Value) -> Result<(), PublishError> {
        let url = self.publish_url(topic);
        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| PublishError::new(topic, e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!(%topic, "event published");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        warn!(%topic, %status, %body, "sidecar rejected publish");
        Err(PublishError::new(
            topic,
            format!("HTTP {status} - {}", body.chars().take(200).collect::<String>()),
        ))
    }
}
