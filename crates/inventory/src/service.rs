//! Administrative operations on product items.

use common::{ProductItemId, VariantId};
use item_store::{ItemQuery, ItemStore, ItemUpdate, Page, ProductItem, VariantRegistry};

use crate::error::{InventoryError, Result};
use crate::retry::RetryPolicy;

/// Service for creating, browsing and editing product items.
///
/// Every write that references a variant is gated on the variant having
/// been announced by the catalog.
#[derive(Clone)]
pub struct InventoryService<S> {
    store: S,
    retry: RetryPolicy,
}

impl<S> InventoryService<S>
where
    S: ItemStore + VariantRegistry + Clone,
{
    /// Creates a new inventory service with the default retry policy.
    pub fn new(store: S) -> Self {
        Self::with_retry(store, RetryPolicy::default())
    }

    pub fn with_retry(store: S, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Records a variant announced by the catalog.
    #[tracing::instrument(skip(self))]
    pub async fn register_variant(&self, variant_id: VariantId) -> Result<()> {
        self.retry
            .run("register_variant", || self.store.register(variant_id))
            .await?;
        tracing::info!(%variant_id, "variant registered");
        Ok(())
    }

    /// Creates `count` units of a known variant in storage.
    #[tracing::instrument(skip(self))]
    pub async fn create_batch(&self, variant_id: VariantId, count: usize) -> Result<Vec<ProductItem>> {
        self.ensure_variant(variant_id).await?;
        if count == 0 {
            return Ok(Vec::new());
        }

        let items = self
            .retry
            .run("create_batch", || self.store.create_batch(variant_id, count))
            .await?;

        metrics::counter!("inventory_units_created_total").increment(items.len() as u64);
        tracing::info!(%variant_id, count, "product items created");
        Ok(items)
    }

    /// Retrieves a unit by id.
    pub async fn find_by_id(&self, id: ProductItemId) -> Result<Option<ProductItem>> {
        Ok(self
            .retry
            .run("find_by_id", || self.store.find_by_id(id))
            .await?)
    }

    /// Retrieves a unit by id, failing with `NotFound` if it doesn't exist.
    pub async fn get(&self, id: ProductItemId) -> Result<ProductItem> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| InventoryError::item_not_found(id))
    }

    /// Retrieves one page of units.
    pub async fn find(&self, query: ItemQuery) -> Result<Page<ProductItem>> {
        Ok(self.retry.run("find", || self.store.find(query)).await?)
    }

    /// Applies an administrative update to a unit.
    ///
    /// A new variant must be known. A status that requires an order can only
    /// be set on a unit that already carries one.
    #[tracing::instrument(skip(self))]
    pub async fn update(&self, id: ProductItemId, update: ItemUpdate) -> Result<ProductItem> {
        let current = self.get(id).await?;
        if update.is_empty() {
            return Ok(current);
        }

        if let Some(variant_id) = update.variant_id {
            self.ensure_variant(variant_id).await?;
        }
        if let Some(status) = update.status
            && status.requires_order()
            && current.order_id.is_none()
        {
            return Err(InventoryError::Validation(format!(
                "status {status} requires the item to belong to an order"
            )));
        }

        let updated = self
            .retry
            .run("update", || self.store.update(id, update.clone()))
            .await?;
        updated.ok_or_else(|| InventoryError::item_not_found(id))
    }

    /// Deletes a unit.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, id: ProductItemId) -> Result<()> {
        let deleted = self.retry.run("delete", || self.store.delete(id)).await?;
        if !deleted {
            return Err(InventoryError::item_not_found(id));
        }
        tracing::info!(item_id = %id, "product item deleted");
        Ok(())
    }

    async fn ensure_variant(&self, variant_id: VariantId) -> Result<()> {
        let exists = self
            .retry
            .run("variant_exists", || self.store.exists(variant_id))
            .await?;
        if exists {
            Ok(())
        } else {
            Err(InventoryError::variant_not_found(variant_id))
        }
    }
}
