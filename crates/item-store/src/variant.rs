//! Known catalog variants.
//!
//! Variants are owned by the catalog service; this service only records
//! which ids exist so that stock is never created for an unknown variant.

use async_trait::async_trait;
use common::VariantId;

use crate::Result;

/// Registry of variant ids announced by the catalog.
#[async_trait]
pub trait VariantRegistry: Send + Sync {
    /// Records a variant. Registering a known variant is a no-op.
    async fn register(&self, variant_id: VariantId) -> Result<()>;

    /// Returns true if the variant has been registered.
    async fn exists(&self, variant_id: VariantId) -> Result<bool>;

    /// Forgets a variant. Returns whether it was known.
    async fn remove(&self, variant_id: VariantId) -> Result<bool>;
}
