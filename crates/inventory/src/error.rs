//! Inventory error types.

use common::VariantId;
use item_store::StoreError;
use thiserror::Error;

/// Errors that can occur during inventory operations.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// A referenced item or variant does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Fewer units are in storage than a reservation asked for.
    #[error("Insufficient stock for variant {variant_id}: requested {requested}, available {available}")]
    InsufficientStock {
        variant_id: VariantId,
        requested: usize,
        available: usize,
    },

    /// The request is malformed or would break an item invariant.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An error occurred in the item store.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl InventoryError {
    pub(crate) fn item_not_found(id: impl ToString) -> Self {
        InventoryError::NotFound {
            entity: "Product item",
            id: id.to_string(),
        }
    }

    pub(crate) fn variant_not_found(id: VariantId) -> Self {
        InventoryError::NotFound {
            entity: "Product variant",
            id: id.to_string(),
        }
    }

    /// Returns true if retrying the operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            InventoryError::Store(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Returns true if this is a reservation shortfall.
    pub fn is_insufficient_stock(&self) -> bool {
        matches!(self, InventoryError::InsufficientStock { .. })
    }
}

/// Result type for inventory operations.
pub type Result<T> = std::result::Result<T, InventoryError>;
