//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p item-store --test postgres_integration
//! ```

use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use item_store::{
    ClaimOutcome, ClaimToken, IdempotencyStore, InventoryStatus, ItemQuery, ItemStore, ItemStoreExt,
    ItemUpdate, KeyStatus, OrderId, PostgresStore, SortDirection, StatusChange, VariantId,
    VariantRegistry,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();

            for migration in [
                include_str!("../../../migrations/001_create_inventory_tables.sql"),
                include_str!("../../../migrations/002_scope_event_claims.sql"),
            ] {
                sqlx::raw_sql(migration).execute(&temp_pool).await.unwrap();
            }

            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE product_items, product_variants, processed_events")
        .execute(&pool)
        .await
        .unwrap();

    PostgresStore::new(pool)
}

#[tokio::test]
#[serial]
async fn create_batch_persists_units_in_storage() {
    let store = get_test_store().await;
    let variant = VariantId::new();

    let created = store.create_batch(variant, 3).await.unwrap();
    assert_eq!(created.len(), 3);

    let found = store.find_by_id(created[0].id).await.unwrap().unwrap();
    assert_eq!(found.variant_id, variant);
    assert_eq!(found.status, InventoryStatus::InStorage);
    assert!(found.order_id.is_none());

    assert_eq!(store.count_available(variant).await.unwrap(), 3);
    assert_eq!(store.count_by_variant(variant).await.unwrap(), 3);
}

#[tokio::test]
#[serial]
async fn update_where_only_applies_on_expected_status() {
    let store = get_test_store().await;
    let variant = VariantId::new();
    let unit = store.create_batch(variant, 1).await.unwrap().remove(0);
    let order = OrderId::new();

    let claimed = store
        .update_where(
            unit.id,
            InventoryStatus::InStorage,
            None,
            StatusChange::reserve(order),
        )
        .await
        .unwrap();
    assert!(claimed);

    let again = store
        .update_where(
            unit.id,
            InventoryStatus::InStorage,
            None,
            StatusChange::reserve(OrderId::new()),
        )
        .await
        .unwrap();
    assert!(!again);

    let stored = store.find_by_id(unit.id).await.unwrap().unwrap();
    assert_eq!(stored.status, InventoryStatus::Reserved);
    assert_eq!(stored.order_id, Some(order));
}

#[tokio::test]
#[serial]
async fn update_where_checks_the_holding_order() {
    let store = get_test_store().await;
    let unit = store.create_batch(VariantId::new(), 1).await.unwrap().remove(0);
    let (a, b) = (OrderId::new(), OrderId::new());

    store
        .update_where(unit.id, InventoryStatus::InStorage, None, StatusChange::reserve(a))
        .await
        .unwrap();
    store.release_by_order(a).await.unwrap();
    store
        .update_where(unit.id, InventoryStatus::InStorage, None, StatusChange::reserve(b))
        .await
        .unwrap();

    // A's late rollback must not free the unit B now holds
    let rolled_back = store
        .update_where(unit.id, InventoryStatus::Reserved, Some(a), StatusChange::release())
        .await
        .unwrap();
    assert!(!rolled_back);

    let stored = store.find_by_id(unit.id).await.unwrap().unwrap();
    assert_eq!(stored.status, InventoryStatus::Reserved);
    assert_eq!(stored.order_id, Some(b));

    let released = store
        .update_where(unit.id, InventoryStatus::Reserved, Some(b), StatusChange::release())
        .await
        .unwrap();
    assert!(released);
}

#[tokio::test]
#[serial]
async fn concurrent_claims_never_double_reserve() {
    let store = get_test_store().await;
    let variant = VariantId::new();
    let unit = store.create_batch(variant, 1).await.unwrap().remove(0);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .update_where(
                    unit.id,
                    InventoryStatus::InStorage,
                    None,
                    StatusChange::reserve(OrderId::new()),
                )
                .await
                .unwrap()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
#[serial]
async fn release_by_order_returns_units_to_storage() {
    let store = get_test_store().await;
    let variant = VariantId::new();
    let units = store.create_batch(variant, 2).await.unwrap();
    let order = OrderId::new();

    for unit in &units {
        store
            .update_where(
                unit.id,
                InventoryStatus::InStorage,
                None,
                StatusChange::reserve(order),
            )
            .await
            .unwrap();
    }
    assert!(store.has_linked_items(order).await.unwrap());

    let released = store.release_by_order(order).await.unwrap();
    assert_eq!(released.len(), 2);
    assert!(!store.has_linked_items(order).await.unwrap());
    assert_eq!(store.count_available(variant).await.unwrap(), 2);

    // Second release is a no-op
    assert!(store.release_by_order(order).await.unwrap().is_empty());
}

#[tokio::test]
#[serial]
async fn set_status_by_order_keeps_link() {
    let store = get_test_store().await;
    let variant = VariantId::new();
    let unit = store.create_batch(variant, 1).await.unwrap().remove(0);
    let order = OrderId::new();
    store
        .update_where(
            unit.id,
            InventoryStatus::InStorage,
            None,
            StatusChange::reserve(order),
        )
        .await
        .unwrap();

    let updated = store
        .set_status_by_order(order, InventoryStatus::Shipped)
        .await
        .unwrap();
    assert_eq!(updated, vec![unit.id]);

    let linked = store.find_by_order(order).await.unwrap();
    assert_eq!(linked.len(), 1);
    assert_eq!(linked[0].status, InventoryStatus::Shipped);
}

#[tokio::test]
#[serial]
async fn find_paginates_and_counts() {
    let store = get_test_store().await;
    let variant = VariantId::new();
    store.create_batch(variant, 5).await.unwrap();
    store.create_batch(VariantId::new(), 2).await.unwrap();

    let page = store
        .find(ItemQuery::new().variant(variant).page(1, 2))
        .await
        .unwrap();
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.total_count, 5);
    assert!(page.has_next_page);

    let asc = store.find(ItemQuery::new().variant(variant)).await.unwrap();
    let desc = store
        .find(ItemQuery::new().variant(variant).direction(SortDirection::Desc))
        .await
        .unwrap();
    assert_eq!(asc.items.first().map(|i| i.id), desc.items.last().map(|i| i.id));
    assert!(!asc.has_next_page);
}

#[tokio::test]
#[serial]
async fn update_to_in_storage_clears_order() {
    let store = get_test_store().await;
    let variant = VariantId::new();
    let unit = store.create_batch(variant, 1).await.unwrap().remove(0);
    store
        .update_where(
            unit.id,
            InventoryStatus::InStorage,
            None,
            StatusChange::reserve(OrderId::new()),
        )
        .await
        .unwrap();

    let updated = store
        .update(
            unit.id,
            ItemUpdate {
                variant_id: None,
                status: Some(InventoryStatus::InStorage),
            },
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.status, InventoryStatus::InStorage);
    assert!(updated.order_id.is_none());

    assert!(
        store
            .update(unit.id, ItemUpdate::default())
            .await
            .unwrap()
            .is_some()
    );
    assert!(store.delete(unit.id).await.unwrap());
    assert!(!store.delete(unit.id).await.unwrap());
}

#[tokio::test]
#[serial]
async fn find_stale_reserved_uses_updated_at() {
    let store = get_test_store().await;
    let variant = VariantId::new();
    let unit = store.create_batch(variant, 1).await.unwrap().remove(0);
    let order = OrderId::new();
    store
        .update_where(
            unit.id,
            InventoryStatus::InStorage,
            None,
            StatusChange::reserve(order),
        )
        .await
        .unwrap();

    let recent = store
        .find_stale_reserved(Utc::now() - TimeDelta::minutes(30))
        .await
        .unwrap();
    assert!(recent.is_empty());

    sqlx::query("UPDATE product_items SET updated_at = NOW() - INTERVAL '1 hour' WHERE id = $1")
        .bind(unit.id.as_uuid())
        .execute(store.pool())
        .await
        .unwrap();

    let stale = store
        .find_stale_reserved(Utc::now() - TimeDelta::minutes(30))
        .await
        .unwrap();
    assert_eq!(stale, vec![order]);
}

#[tokio::test]
#[serial]
async fn release_stale_leaves_progressed_units() {
    let store = get_test_store().await;
    let units = store.create_batch(VariantId::new(), 2).await.unwrap();
    let (stale, paid) = (OrderId::new(), OrderId::new());
    for (unit, order) in units.iter().zip([stale, paid]) {
        store
            .update_where(unit.id, InventoryStatus::InStorage, None, StatusChange::reserve(order))
            .await
            .unwrap();
    }
    store
        .set_status_by_order(paid, InventoryStatus::InFulfillment)
        .await
        .unwrap();
    sqlx::query("UPDATE product_items SET updated_at = NOW() - INTERVAL '1 hour'")
        .execute(store.pool())
        .await
        .unwrap();

    let cutoff = Utc::now() - TimeDelta::minutes(30);
    assert_eq!(store.release_stale(stale, cutoff).await.unwrap(), vec![units[0].id]);
    assert!(store.release_stale(paid, cutoff).await.unwrap().is_empty());

    let paid_unit = store.find_by_id(units[1].id).await.unwrap().unwrap();
    assert_eq!(paid_unit.status, InventoryStatus::InFulfillment);
    assert_eq!(paid_unit.order_id, Some(paid));
}

async fn acquire(store: &PostgresStore, key: &str) -> ClaimToken {
    match store.begin(key).await.unwrap() {
        ClaimOutcome::Acquired(token) => token,
        other => panic!("expected to acquire {key}, got {other:?}"),
    }
}

#[tokio::test]
#[serial]
async fn idempotency_key_lifecycle() {
    let store = get_test_store().await;

    let first = acquire(&store, "evt-1").await;
    assert_eq!(store.begin("evt-1").await.unwrap(), ClaimOutcome::InProgress);

    assert!(store.abandon("evt-1", first).await.unwrap());
    assert_eq!(store.status("evt-1").await.unwrap(), None);
    let second = acquire(&store, "evt-1").await;

    assert!(store.complete("evt-1", second).await.unwrap());
    assert_eq!(
        store.status("evt-1").await.unwrap(),
        Some(KeyStatus::Completed)
    );
    assert_eq!(store.begin("evt-1").await.unwrap(), ClaimOutcome::Completed);

    // Abandon never drops a completed key
    assert!(!store.abandon("evt-1", second).await.unwrap());
    assert_eq!(store.begin("evt-1").await.unwrap(), ClaimOutcome::Completed);
}

#[tokio::test]
#[serial]
async fn expired_claim_is_taken_over_and_fenced_from_its_old_holder() {
    let store = get_test_store().await;
    let stalled = acquire(&store, "evt-2").await;

    sqlx::query(
        "UPDATE processed_events SET updated_at = NOW() - INTERVAL '10 minutes' WHERE key = $1",
    )
    .bind("evt-2")
    .execute(store.pool())
    .await
    .unwrap();

    let current = acquire(&store, "evt-2").await;
    assert_ne!(stalled, current);

    assert!(!store.abandon("evt-2", stalled).await.unwrap());
    assert!(!store.complete("evt-2", stalled).await.unwrap());
    assert_eq!(store.begin("evt-2").await.unwrap(), ClaimOutcome::InProgress);

    assert!(store.complete("evt-2", current).await.unwrap());
    assert_eq!(store.begin("evt-2").await.unwrap(), ClaimOutcome::Completed);
}

#[tokio::test]
#[serial]
async fn variant_registry_round_trip() {
    let store = get_test_store().await;
    let variant = VariantId::new();

    assert!(!store.exists(variant).await.unwrap());
    store.register(variant).await.unwrap();
    store.register(variant).await.unwrap();
    assert!(store.exists(variant).await.unwrap());

    assert!(store.remove(variant).await.unwrap());
    assert!(!store.exists(variant).await.unwrap());
}
