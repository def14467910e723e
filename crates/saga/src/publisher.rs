//! Publishing outcome events to the bus.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;

/// A publish that did not reach the bus.
#[derive(Debug, Clone, Error)]
#[error("publishing to {topic} failed: {reason}")]
pub struct PublishError {
    pub topic: String,
    pub reason: String,
}

impl PublishError {
    pub fn new(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            reason: reason.into(),
        }
    }
}

/// Trait for publishing events to a pub/sub topic.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Value) -> Result<(), PublishError>;
}

#[async_trait]
impl<T: EventPublisher + ?Sized> EventPublisher for Arc<T> {
    async fn publish(&self, topic: &str, payload: Value) -> Result<(), PublishError> {
        (**self).publish(topic, payload).await
    }
}

/// An event captured by [`InMemoryEventPublisher`].
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedEvent {
    pub topic: String,
    pub payload: Value,
}

/// In-memory publisher for testing and runs without a sidecar.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventPublisher {
    published: Arc<RwLock<Vec<PublishedEvent>>>,
    fail_on_publish: Arc<AtomicBool>,
}

impl InMemoryEventPublisher {
    /// Creates a new in-memory publisher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the publisher to fail every publish.
    pub fn set_fail_on_publish(&self, fail: bool) {
        self.fail_on_publish.store(fail, Ordering::SeqCst);
    }

    /// Returns every event published so far, oldest first.
    pub async fn published(&self) -> Vec<PublishedEvent> {
        self.published.read().await.clone()
    }

    /// Returns the payloads published to `topic`, oldest first.
    pub async fn published_to(&self, topic: &str) -> Vec<Value> {
        self.published
            .read()
            .await
            .iter()
            .filter(|e| e.topic == topic)
            .map(|e| e.payload.clone())
            .collect()
    }

    pub async fn clear(&self) {
        self.published.write().await.clear();
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventPublisher {
    async fn publish(&self, topic: &str, payload: Value) -> Result<(), PublishError> {
        if self.fail_on_publish.load(Ordering::SeqCst) {
            return Err(PublishError::new(topic, "injected failure"));
        }
        self.published.write().await.push(PublishedEvent {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn records_published_events() {
        let publisher = InMemoryEventPublisher::new();
        publisher.publish("a", json!({"n": 1})).await.unwrap();
        publisher.publish("b", json!({"n": 2})).await.unwrap();

        assert_eq!(publisher.published().await.len(), 2);
        assert_eq!(publisher.published_to("b").await, vec![json!({"n": 2})]);
    }

    #[tokio::test]
    async fn injected_failure_publishes_nothing() {
        let publisher = InMemoryEventPublisher::new();
        publisher.set_fail_on_publish(true);

        assert!(publisher.publish("a", json!({})).await.is_err());
        assert!(publisher.published().await.is_empty());
    }

    #[tokio::test]
    async fn shared_publisher_through_arc() {
        let publisher = InMemoryEventPublisher::new();
        let shared: Arc<dyn EventPublisher> = Arc::new(publisher.clone());
        shared.publish("a", json!(null)).await.unwrap();
        assert_eq!(publisher.published().await.len(), 1);
    }
}
