use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, ProductItemId, VariantId};

use crate::idempotency::IdempotencyStore;
use crate::item::{InventoryStatus, ItemUpdate, ProductItem, StatusChange};
use crate::query::{ItemQuery, Page};
use crate::variant::VariantRegistry;
use crate::Result;

/// Core trait for product item persistence.
///
/// The store is the only shared mutable resource of the service: all
/// coordination between concurrent reservations goes through
/// [`ItemStore::update_where`], never through in-process locks.
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Creates `count` new units of a variant in storage.
    ///
    /// Units are created atomically - either all are persisted or none are.
    async fn create_batch(&self, variant_id: VariantId, count: usize) -> Result<Vec<ProductItem>>;

    /// Retrieves a unit by id.
    async fn find_by_id(&self, id: ProductItemId) -> Result<Option<ProductItem>>;

    /// Retrieves one page of units matching a query.
    ///
    /// `total_count` counts every unit matching the filter, ignoring the window.
    async fn find(&self, query: ItemQuery) -> Result<Page<ProductItem>>;

    /// Retrieves every unit linked to an order, ascending by id.
    async fn find_by_order(&self, order_id: OrderId) -> Result<Vec<ProductItem>>;

    /// Retrieves every `IN_STORAGE` unit of a variant, ascending by id.
    async fn find_available(&self, variant_id: VariantId) -> Result<Vec<ProductItem>>;

    /// Counts the `IN_STORAGE` units of a variant.
    async fn count_available(&self, variant_id: VariantId) -> Result<usize>;

    /// Conditionally applies `change` to a unit.
    ///
    /// The write happens only if, at write time, the unit's status still
    /// equals `expected` and it is still linked to `expected_order` (`None`
    /// meaning unlinked). Returns whether the change was applied; a missing
    /// unit yields `false`.
    async fn update_where(
        &self,
        id: ProductItemId,
        expected: InventoryStatus,
        expected_order: Option<OrderId>,
        change: StatusChange,
    ) -> Result<bool>;

    /// Applies an administrative update. Returns None if the unit doesn't exist.
    async fn update(&self, id: ProductItemId, update: ItemUpdate) -> Result<Option<ProductItem>>;

    /// Returns every unit linked to an order to storage and clears the link.
    ///
    /// Returns the ids of the released units.
    async fn release_by_order(&self, order_id: OrderId) -> Result<Vec<ProductItemId>>;

    /// Returns an order's units to storage if they are still `RESERVED` and
    /// untouched since `older_than`.
    ///
    /// Units that moved on in the meantime are left alone. Returns the ids of
    /// the released units.
    async fn release_stale(
        &self,
        order_id: OrderId,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<ProductItemId>>;

    /// Sets the status of every unit linked to an order.
    ///
    /// Returns the ids of the updated units.
    async fn set_status_by_order(
        &self,
        order_id: OrderId,
        status: InventoryStatus,
    ) -> Result<Vec<ProductItemId>>;

    /// Returns the distinct orders holding `RESERVED` units untouched since `older_than`.
    async fn find_stale_reserved(&self, older_than: DateTime<Utc>) -> Result<Vec<OrderId>>;

    /// Deletes a unit. Returns whether it existed.
    async fn delete(&self, id: ProductItemId) -> Result<bool>;
}

/// Extension trait providing convenience methods for item stores.
#[async_trait]
pub trait ItemStoreExt: ItemStore {
    /// Returns true if any unit is linked to the order.
    async fn has_linked_items(&self, order_id: OrderId) -> Result<bool> {
        Ok(!self.find_by_order(order_id).await?.is_empty())
    }

    /// Counts every unit of a variant regardless of status.
    async fn count_by_variant(&self, variant_id: VariantId) -> Result<usize> {
        let page = self.find(ItemQuery::new().variant(variant_id).page(0, 0)).await?;
        Ok(page.total_count)
    }
}

// Blanket implementation for all ItemStore implementations
impl<T: ItemStore + ?Sized> ItemStoreExt for T {}

/// Every persistence concern the service needs, from one backend.
pub trait Store: ItemStore + VariantRegistry + IdempotencyStore + Clone + 'static {}

impl<T> Store for T where T: ItemStore + VariantRegistry + IdempotencyStore + Clone + 'static {}
