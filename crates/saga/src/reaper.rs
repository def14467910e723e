//! Background release of reservations that stopped making progress.

use std::time::Duration;

use chrono::Utc;
use common::OrderId;
use inventory::{ReleaseEngine, RetryPolicy};
use item_store::ItemStore;
use tracing::{error, info, warn};

use crate::error::Result;

/// Reaper settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaperConfig {
    /// Time between sweeps.
    pub interval: Duration,
    /// How long reserved units may sit unchanged before their order is released.
    pub reservation_timeout: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            reservation_timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// Releases orders whose reserved units have not moved within the timeout,
/// so stock is not held forever after a lost payment event.
#[derive(Clone)]
pub struct ReservationReaper<S> {
    store: S,
    release: ReleaseEngine<S>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl<S> ReservationReaper<S>
where
    S: ItemStore + Clone + 'static,
{
    pub fn new(store: S, reservation_timeout: Duration) -> Self {
        Self::with_retry(store, reservation_timeout, RetryPolicy::default())
    }

    pub fn with_retry(store: S, reservation_timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            release: ReleaseEngine::with_retry(store.clone(), retry),
            store,
            retry,
            timeout: reservation_timeout,
        }
    }

    /// Runs one sweep and returns the orders it released.
    ///
    /// The release is conditioned on the same cutoff as the scan, so an
    /// order that moves on between the two keeps its units. A failed release
    /// is logged and left for the next sweep.
    #[tracing::instrument(skip(self))]
    pub async fn run_once(&self) -> Result<Vec<OrderId>> {
        let timeout = chrono::Duration::from_std(self.timeout).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(timeout)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

        let stale = self
            .retry
            .run("find_stale_reserved", || self.store.find_stale_reserved(cutoff))
            .await?;

        let mut released = Vec::with_capacity(stale.len());
        for order_id in stale {
            match self.release.release_stale(order_id, cutoff).await {
                Ok(units) if units.is_empty() => {
                    info!(%order_id, "reservation progressed before it could be released");
                }
                Ok(units) => {
                    warn!(%order_id, count = units.len(), "released stale reservation");
                    metrics::counter!("inventory_reaper_released_orders_total").increment(1);
                    released.push(order_id);
                }
                Err(e) => error!(%order_id, error = %e, "failed to release stale reservation"),
            }
        }
        Ok(released)
    }

    /// Spawns the periodic sweep.
    pub fn spawn(self, interval: Duration) -> ReaperHandle {
        let (cancel_tx, mut cancel_rx) = tokio::sync::watch::channel(false);

        tokio::spawn(async move {
            info!(
                interval_secs = interval.as_secs(),
                timeout_secs = self.timeout.as_secs(),
                "reservation reaper started"
            );

            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        if let Err(e) = self.run_once().await {
                            error!(error = %e, "reservation sweep failed");
                        }
                    }
                    changed = cancel_rx.changed() => {
                        if changed.is_err() || *cancel_rx.borrow() {
                            info!("reservation reaper stopped");
                            break;
                        }
                    }
                }
            }
        });

        ReaperHandle { cancel: cancel_tx }
    }
}

/// Handle to a running reaper.
pub struct ReaperHandle {
    cancel: tokio::sync::watch::Sender<bool>,
}

impl ReaperHandle {
    /// Signals the reaper to stop.
    pub fn stop(&self) {
        let _ = self.cancel.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::DateTime;
    use common::{ProductItemId, VariantId};
    use item_store::{
        InMemoryStore, InventoryStatus, ItemQuery, ItemUpdate, Page, ProductItem, StatusChange,
    };

    /// Pays for every order the scan reports stale before the reaper acts on it.
    #[derive(Clone)]
    struct PaidAfterScan {
        inner: InMemoryStore,
    }

    #[async_trait]
    impl ItemStore for PaidAfterScan {
        async fn create_batch(
            &self,
            variant_id: VariantId,
            count: usize,
        ) -> item_store::Result<Vec<ProductItem>> {
            self.inner.create_batch(variant_id, count).await
        }

        async fn find_by_id(&self, id: ProductItemId) -> item_store::Result<Option<ProductItem>> {
            self.inner.find_by_id(id).await
        }

        async fn find(&self, query: ItemQuery) -> item_store::Result<Page<ProductItem>> {
            self.inner.find(query).await
        }

        async fn find_by_order(&self, order_id: OrderId) -> item_store::Result<Vec<ProductItem>> {
            self.inner.find_by_order(order_id).await
        }

        async fn find_available(&self, variant_id: VariantId) -> item_store::Result<Vec<ProductItem>> {
            self.inner.find_available(variant_id).await
        }

        async fn count_available(&self, variant_id: VariantId) -> item_store::Result<usize> {
            self.inner.count_available(variant_id).await
        }

        async fn update_where(
            &self,
            id: ProductItemId,
            expected: InventoryStatus,
            expected_order: Option<OrderId>,
            change: StatusChange,
        ) -> item_store::Result<bool> {
            self.inner.update_where(id, expected, expected_order, change).await
        }

        async fn update(
            &self,
            id: ProductItemId,
            update: ItemUpdate,
        ) -> item_store::Result<Option<ProductItem>> {
            self.inner.update(id, update).await
        }

        async fn release_by_order(&self, order_id: OrderId) -> item_store::Result<Vec<ProductItemId>> {
            self.inner.release_by_order(order_id).await
        }

        async fn release_stale(
            &self,
            order_id: OrderId,
            older_than: DateTime<Utc>,
        ) -> item_store::Result<Vec<ProductItemId>> {
            self.inner.release_stale(order_id, older_than).await
        }

        async fn set_status_by_order(
            &self,
            order_id: OrderId,
            status: InventoryStatus,
        ) -> item_store::Result<Vec<ProductItemId>> {
            self.inner.set_status_by_order(order_id, status).await
        }

        async fn find_stale_reserved(
            &self,
            older_than: DateTime<Utc>,
        ) -> item_store::Result<Vec<OrderId>> {
            let stale = self.inner.find_stale_reserved(older_than).await?;
            for order_id in &stale {
                self.inner
                    .set_status_by_order(*order_id, InventoryStatus::InFulfillment)
                    .await?;
            }
            Ok(stale)
        }

        async fn delete(&self, id: ProductItemId) -> item_store::Result<bool> {
            self.inner.delete(id).await
        }
    }

    async fn reserve(store: &InMemoryStore, count: usize) -> OrderId {
        let order_id = OrderId::new();
        for unit in store.create_batch(VariantId::new(), count).await.unwrap() {
            store
                .update_where(unit.id, InventoryStatus::InStorage, None, StatusChange::reserve(order_id))
                .await
                .unwrap();
        }
        order_id
    }

    async fn age(store: &InMemoryStore, order_id: OrderId, by: chrono::Duration) {
        for unit in store.find_by_order(order_id).await.unwrap() {
            store.set_updated_at(unit.id, Utc::now() - by).await;
        }
    }

    #[tokio::test]
    async fn releases_only_stale_orders() {
        let store = InMemoryStore::new();
        let stale = reserve(&store, 2).await;
        let fresh = reserve(&store, 1).await;
        age(&store, stale, chrono::Duration::hours(1)).await;

        let reaper = ReservationReaper::new(store.clone(), Duration::from_secs(30 * 60));
        let released = reaper.run_once().await.unwrap();

        assert_eq!(released, vec![stale]);
        assert!(store.find_by_order(stale).await.unwrap().is_empty());
        assert_eq!(store.find_by_order(fresh).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn progressed_orders_are_left_alone() {
        let store = InMemoryStore::new();
        let order_id = reserve(&store, 1).await;
        store
            .set_status_by_order(order_id, InventoryStatus::Shipped)
            .await
            .unwrap();
        age(&store, order_id, chrono::Duration::hours(2)).await;

        let reaper = ReservationReaper::new(store.clone(), Duration::from_secs(60));
        assert!(reaper.run_once().await.unwrap().is_empty());
        assert_eq!(store.find_by_order(order_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn order_paid_during_sweep_keeps_its_units() {
        let inner = InMemoryStore::new();
        let order_id = reserve(&inner, 2).await;
        age(&inner, order_id, chrono::Duration::hours(1)).await;

        let reaper = ReservationReaper::new(
            PaidAfterScan {
                inner: inner.clone(),
            },
            Duration::from_secs(60),
        );
        assert!(reaper.run_once().await.unwrap().is_empty());

        let units = inner.find_by_order(order_id).await.unwrap();
        assert_eq!(units.len(), 2);
        assert!(units.iter().all(|u| u.status == InventoryStatus::InFulfillment));
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_reaper_sweeps_until_stopped() {
        let store = InMemoryStore::new();
        let order_id = reserve(&store, 1).await;
        age(&store, order_id, chrono::Duration::hours(1)).await;

        let handle = ReservationReaper::new(store.clone(), Duration::from_secs(60))
            .spawn(Duration::from_secs(5));
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(store.find_by_order(order_id).await.unwrap().is_empty());

        handle.stop();
    }
}
