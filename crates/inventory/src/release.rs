//! Compensation: returning an order's units to storage.

use chrono::{DateTime, Utc};
use common::{OrderId, ProductItemId};
use item_store::ItemStore;

use crate::error::Result;
use crate::retry::RetryPolicy;

/// Engine releasing every unit linked to an order.
#[derive(Clone)]
pub struct ReleaseEngine<S> {
    store: S,
    retry: RetryPolicy,
}

impl<S: ItemStore + Clone> ReleaseEngine<S> {
    pub fn new(store: S) -> Self {
        Self::with_retry(store, RetryPolicy::default())
    }

    pub fn with_retry(store: S, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Sets every unit carrying `order_id` back to `IN_STORAGE` and clears
    /// the link, whatever its current status.
    ///
    /// Idempotent: an order with no linked units releases nothing.
    #[tracing::instrument(skip(self))]
    pub async fn release_batch(&self, order_id: OrderId) -> Result<Vec<ProductItemId>> {
        let released = self
            .retry
            .run("release_by_order", || self.store.release_by_order(order_id))
            .await?;

        if !released.is_empty() {
            metrics::counter!("inventory_units_released_total").increment(released.len() as u64);
            tracing::info!(count = released.len(), "units released");
        }
        Ok(released)
    }

    /// Releases the units of an order that are still `RESERVED` and have not
    /// changed since `older_than`.
    ///
    /// Units the order has since moved forward, or that were touched after
    /// the cutoff, keep their status.
    #[tracing::instrument(skip(self))]
    pub async fn release_stale(
        &self,
        order_id: OrderId,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<ProductItemId>> {
        let released = self
            .retry
            .run("release_stale", || self.store.release_stale(order_id, older_than))
            .await?;

        if !released.is_empty() {
            metrics::counter!("inventory_units_released_total").increment(released.len() as u64);
            tracing::info!(count = released.len(), "stale units released");
        }
        Ok(released)
    }
}
