//! Processed-event keys for at-least-once delivery.

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::Result;

/// How long an in-progress claim blocks other consumers before it can be
/// taken over. Covers consumers that crash mid-handling.
pub fn in_progress_lease() -> chrono::TimeDelta {
    chrono::TimeDelta::minutes(5)
}

/// Identifies the holder of an in-progress claim.
///
/// Only the current holder can complete or abandon a claim, so a consumer
/// whose lease was taken over cannot touch its successor's claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClaimToken(Uuid);

impl ClaimToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ClaimToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of trying to claim an idempotency key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The caller now holds the key and must complete or abandon it.
    Acquired(ClaimToken),
    /// Another consumer is currently handling the key.
    InProgress,
    /// The key has already been fully handled.
    Completed,
}

/// Persisted state of an idempotency key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyStatus {
    InProgress,
    Completed,
}

impl KeyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyStatus::InProgress => "IN_PROGRESS",
            KeyStatus::Completed => "COMPLETED",
        }
    }
}

/// Store of idempotency keys.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Atomically claims a key if it is absent or its in-progress lease expired.
    async fn begin(&self, key: &str) -> Result<ClaimOutcome>;

    /// Marks a claimed key as fully handled.
    ///
    /// Returns false, changing nothing, if `token` no longer holds the claim.
    async fn complete(&self, key: &str, token: ClaimToken) -> Result<bool>;

    /// Drops a claim so a redelivered event can be handled again.
    ///
    /// Returns false, changing nothing, if `token` no longer holds the claim.
    async fn abandon(&self, key: &str, token: ClaimToken) -> Result<bool>;

    /// Returns the current state of a key, if any.
    async fn status(&self, key: &str) -> Result<Option<KeyStatus>>;
}
