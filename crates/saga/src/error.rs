//! Saga error types.

use inventory::InventoryError;
use item_store::StoreError;
use thiserror::Error;

use crate::publisher::PublishError;

/// Errors that can occur while handling an event.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The event cannot be handled as delivered and never will be.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An inventory engine failed.
    #[error("Inventory error: {0}")]
    Inventory(#[from] InventoryError),

    /// The store failed outside of an engine call.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// An outcome event could not be published.
    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    /// Another consumer is currently handling the same event.
    #[error("Event already in progress: {0}")]
    InProgress(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SagaError {
    /// Returns true if redelivering the event may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            SagaError::Inventory(e) => e.is_transient(),
            SagaError::Store(e) => e.is_transient(),
            SagaError::Publish(_) | SagaError::InProgress(_) => true,
            SagaError::Validation(_) | SagaError::Serialization(_) => false,
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
