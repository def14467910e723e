use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, ProductItemId, VariantId};
use tokio::sync::RwLock;

use crate::idempotency::{ClaimOutcome, ClaimToken, IdempotencyStore, KeyStatus, in_progress_lease};
use crate::item::{InventoryStatus, ItemUpdate, ProductItem, StatusChange};
use crate::query::{ItemQuery, Page, SortDirection};
use crate::store::ItemStore;
use crate::variant::VariantRegistry;
use crate::{Result, StoreError};

/// Injected failures for exercising retry and compensation paths.
#[derive(Debug, Default)]
struct Faults {
    fail_all: AtomicBool,
    fail_next: AtomicU32,
}

impl Faults {
    fn check(&self) -> Result<()> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        let consumed = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if consumed {
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct KeyRecord {
    status: KeyStatus,
    updated_at: DateTime<Utc>,
    holder: ClaimToken,
}

/// In-memory store implementation for testing and single-process runs.
///
/// Implements [`ItemStore`], [`VariantRegistry`] and [`IdempotencyStore`]
/// with the same semantics as the PostgreSQL implementation. Every
/// conditional write happens under the items write lock, which makes
/// `update_where` a true compare-and-swap.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    items: Arc<RwLock<BTreeMap<ProductItemId, ProductItem>>>,
    variants: Arc<RwLock<HashSet<VariantId>>>,
    keys: Arc<RwLock<HashMap<String, KeyRecord>>>,
    faults: Arc<Faults>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of units stored.
    pub async fn item_count(&self) -> usize {
        self.items.read().await.len()
    }

    /// Returns a snapshot of every stored unit, ascending by id.
    pub async fn all_items(&self) -> Vec<ProductItem> {
        self.items.read().await.values().cloned().collect()
    }

    /// Makes every item operation fail with `Unavailable` until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.fail_all.store(unavailable, Ordering::SeqCst);
    }

    /// Makes the next `count` item operations fail with `Unavailable`.
    pub fn fail_next(&self, count: u32) {
        self.faults.fail_next.store(count, Ordering::SeqCst);
    }

    /// Overrides the last-modified time of a unit. Used to age reservations.
    pub async fn set_updated_at(&self, id: ProductItemId, updated_at: DateTime<Utc>) -> bool {
        match self.items.write().await.get_mut(&id) {
            Some(item) => {
                item.updated_at = updated_at;
                true
            }
            None => false,
        }
    }

    /// Overrides the last-modified time of an idempotency key. Used to expire leases.
    pub async fn set_key_updated_at(&self, key: &str, updated_at: DateTime<Utc>) -> bool {
        match self.keys.write().await.get_mut(key) {
            Some(record) => {
                record.updated_at = updated_at;
                true
            }
            None => false,
        }
    }

    /// Clears all items, variants and keys.
    pub async fn clear(&self) {
        self.items.write().await.clear();
        self.variants.write().await.clear();
        self.keys.write().await.clear();
    }
}

#[async_trait]
impl ItemStore for InMemoryStore {
    async fn create_batch(&self, variant_id: VariantId, count: usize) -> Result<Vec<ProductItem>> {
        self.faults.check()?;

        let now = Utc::now();
        let created: Vec<ProductItem> = (0..count)
            .map(|_| ProductItem::new_in_storage(variant_id, now))
            .collect();

        let mut items = self.items.write().await;
        items.extend(created.iter().map(|item| (item.id, item.clone())));

        Ok(created)
    }

    async fn find_by_id(&self, id: ProductItemId) -> Result<Option<ProductItem>> {
        self.faults.check()?;
        Ok(self.items.read().await.get(&id).cloned())
    }

    async fn find(&self, query: ItemQuery) -> Result<Page<ProductItem>> {
        self.faults.check()?;

        let items = self.items.read().await;
        // BTreeMap iteration is already ascending by id
        let mut matching: Vec<&ProductItem> = items
            .values()
            .filter(|item| query.filter.matches(item))
            .collect();
        let total_count = matching.len();

        if query.order_by.direction == SortDirection::Desc {
            matching.reverse();
        }
        let page: Vec<ProductItem> = matching
            .into_iter()
            .skip(query.skip)
            .take(query.first)
            .cloned()
            .collect();

        Ok(Page::new(page, total_count, query.skip, query.first))
    }

    async fn find_by_order(&self, order_id: OrderId) -> Result<Vec<ProductItem>> {
        self.faults.check()?;

        let items = self.items.read().await;
        Ok(items
            .values()
            .filter(|item| item.order_id == Some(order_id))
            .cloned()
            .collect())
    }

    async fn find_available(&self, variant_id: VariantId) -> Result<Vec<ProductItem>> {
        self.faults.check()?;

        let items = self.items.read().await;
        Ok(items
            .values()
            .filter(|item| item.variant_id == variant_id && item.status.is_available())
            .cloned()
            .collect())
    }

    async fn count_available(&self, variant_id: VariantId) -> Result<usize> {
        self.faults.check()?;

        let items = self.items.read().await;
        Ok(items
            .values()
            .filter(|item| item.variant_id == variant_id && item.status.is_available())
            .count())
    }

    async fn update_where(
        &self,
        id: ProductItemId,
        expected: InventoryStatus,
        expected_order: Option<OrderId>,
        change: StatusChange,
    ) -> Result<bool> {
        self.faults.check()?;

        let mut items = self.items.write().await;
        match items.get_mut(&id) {
            Some(item) if item.status == expected && item.order_id == expected_order => {
                item.apply(&change, Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update(&self, id: ProductItemId, update: ItemUpdate) -> Result<Option<ProductItem>> {
        self.faults.check()?;

        let mut items = self.items.write().await;
        Ok(items.get_mut(&id).map(|item| {
            item.apply_update(&update, Utc::now());
            item.clone()
        }))
    }

    async fn release_by_order(&self, order_id: OrderId) -> Result<Vec<ProductItemId>> {
        self.faults.check()?;

        let now = Utc::now();
        let change = StatusChange::release();
        let mut items = self.items.write().await;
        Ok(items
            .values_mut()
            .filter(|item| item.order_id == Some(order_id))
            .map(|item| {
                item.apply(&change, now);
                item.id
            })
            .collect())
    }

    async fn release_stale(
        &self,
        order_id: OrderId,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<ProductItemId>> {
        self.faults.check()?;

        let now = Utc::now();
        let change = StatusChange::release();
        let mut items = self.items.write().await;
        Ok(items
            .values_mut()
            .filter(|item| {
                item.order_id == Some(order_id)
                    && item.status == InventoryStatus::Reserved
                    && item.updated_at < older_than
            })
            .map(|item| {
                item.apply(&change, now);
                item.id
            })
            .collect())
    }

    async fn set_status_by_order(
        &self,
        order_id: OrderId,
        status: InventoryStatus,
    ) -> Result<Vec<ProductItemId>> {
        self.faults.check()?;

        let now = Utc::now();
        let change = StatusChange::for_order(status, order_id);
        let mut items = self.items.write().await;
        Ok(items
            .values_mut()
            .filter(|item| item.order_id == Some(order_id))
            .map(|item| {
                item.apply(&change, now);
                item.id
            })
            .collect())
    }

    async fn find_stale_reserved(&self, older_than: DateTime<Utc>) -> Result<Vec<OrderId>> {
        self.faults.check()?;

        let items = self.items.read().await;
        let orders: BTreeSet<OrderId> = items
            .values()
            .filter(|item| item.status == InventoryStatus::Reserved && item.updated_at < older_than)
            .filter_map(|item| item.order_id)
            .collect();
        Ok(orders.into_iter().collect())
    }

    async fn delete(&self, id: ProductItemId) -> Result<bool> {
        self.faults.check()?;
        Ok(self.items.write().await.remove(&id).is_some())
    }
}

#[async_trait]
impl VariantRegistry for InMemoryStore {
    async fn register(&self, variant_id: VariantId) -> Result<()> {
        self.variants.write().await.insert(variant_id);
        Ok(())
    }

    async fn exists(&self, variant_id: VariantId) -> Result<bool> {
        Ok(self.variants.read().await.contains(&variant_id))
    }

    async fn remove(&self, variant_id: VariantId) -> Result<bool> {
        Ok(self.variants.write().await.remove(&variant_id))
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryStore {
    async fn begin(&self, key: &str) -> Result<ClaimOutcome> {
        let now = Utc::now();
        let mut keys = self.keys.write().await;

        match keys.get(key) {
            Some(record) if record.status == KeyStatus::Completed => Ok(ClaimOutcome::Completed),
            Some(record) if now - record.updated_at < in_progress_lease() => {
                Ok(ClaimOutcome::InProgress)
            }
            _ => {
                let holder = ClaimToken::new();
                keys.insert(
                    key.to_string(),
                    KeyRecord {
                        status: KeyStatus::InProgress,
                        updated_at: now,
                        holder,
                    },
                );
                Ok(ClaimOutcome::Acquired(holder))
            }
        }
    }

    async fn complete(&self, key: &str, token: ClaimToken) -> Result<bool> {
        let mut keys = self.keys.write().await;
        match keys.get_mut(key) {
            Some(record) if record.status == KeyStatus::InProgress && record.holder == token => {
                record.status = KeyStatus::Completed;
                record.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn abandon(&self, key: &str, token: ClaimToken) -> Result<bool> {
        let mut keys = self.keys.write().await;
        match keys.get(key) {
            Some(record) if record.status == KeyStatus::InProgress && record.holder == token => {
                keys.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn status(&self, key: &str) -> Result<Option<KeyStatus>> {
        Ok(self.keys.read().await.get(key).map(|record| record.status))
    }
}
