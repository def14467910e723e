//! Shared identifier types used across the inventory workspace.

mod types;

pub use types::{OrderId, ProductItemId, VariantId};
