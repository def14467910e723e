use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, ProductItemId, VariantId};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::idempotency::{ClaimOutcome, ClaimToken, IdempotencyStore, KeyStatus, in_progress_lease};
use crate::item::{InventoryStatus, ItemUpdate, ProductItem, StatusChange};
use crate::query::{ItemQuery, Page, SortDirection};
use crate::store::ItemStore;
use crate::variant::VariantRegistry;
use crate::{Result, StoreError};

const ITEM_COLUMNS: &str = "id, variant_id, status, order_id, created_at, updated_at";

/// PostgreSQL-backed store implementation.
///
/// Claims are single conditional `UPDATE` statements, so the database row
/// lock is the only synchronization between concurrent reservers.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a pool to `database_url`.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        tracing::info!("running database migrations");
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_item(row: PgRow) -> Result<ProductItem> {
        let status: String = row.try_get("status")?;
        let status = status
            .parse::<InventoryStatus>()
            .map_err(|e| StoreError::InvalidData(e.to_string()))?;

        Ok(ProductItem {
            id: ProductItemId::from_uuid(row.try_get::<Uuid, _>("id")?),
            variant_id: VariantId::from_uuid(row.try_get::<Uuid, _>("variant_id")?),
            status,
            order_id: row
                .try_get::<Option<Uuid>, _>("order_id")?
                .map(OrderId::from_uuid),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_id(row: PgRow) -> Result<ProductItemId> {
        Ok(ProductItemId::from_uuid(row.try_get::<Uuid, _>("id")?))
    }
}

#[async_trait]
impl ItemStore for PostgresStore {
    async fn create_batch(&self, variant_id: VariantId, count: usize) -> Result<Vec<ProductItem>> {
        let now = Utc::now();
        let items: Vec<ProductItem> = (0..count)
            .map(|_| ProductItem::new_in_storage(variant_id, now))
            .collect();

        // Start a transaction
        let mut tx = self.pool.begin().await?;

        for item in &items {
            sqlx::query(
                r#"
                INSERT INTO product_items (id, variant_id, status, order_id, created_at, updated_at)
                VALUES ($1, $2, $3, NULL, $4, $5)
                "#,
            )
            .bind(item.id.as_uuid())
            .bind(item.variant_id.as_uuid())
            .bind(item.status.as_str())
            .bind(item.created_at)
            .bind(item.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(items)
    }

    async fn find_by_id(&self, id: ProductItemId) -> Result<Option<ProductItem>> {
        let row = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM product_items WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_item).transpose()
    }

    async fn find(&self, query: ItemQuery) -> Result<Page<ProductItem>> {
        let mut where_clause = String::from(" WHERE 1=1");
        let mut param_count = 0;

        // Build dynamic filter
        if query.filter.variant_id.is_some() {
            param_count += 1;
            where_clause.push_str(&format!(" AND variant_id = ${param_count}"));
        }
        if query.filter.status.is_some() {
            param_count += 1;
            where_clause.push_str(&format!(" AND status = ${param_count}"));
        }
        if query.filter.order_id.is_some() {
            param_count += 1;
            where_clause.push_str(&format!(" AND order_id = ${param_count}"));
        }

        let count_sql = format!("SELECT COUNT(*) FROM product_items{where_clause}");
        let direction = match query.order_by.direction {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        };
        let select_sql = format!(
            "SELECT {ITEM_COLUMNS} FROM product_items{where_clause} ORDER BY id {direction} LIMIT ${} OFFSET ${}",
            param_count + 1,
            param_count + 2
        );

        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
        let mut select_query = sqlx::query(&select_sql);

        if let Some(variant_id) = query.filter.variant_id {
            count_query = count_query.bind(variant_id.as_uuid());
            select_query = select_query.bind(variant_id.as_uuid());
        }
        if let Some(status) = query.filter.status {
            count_query = count_query.bind(status.as_str());
            select_query = select_query.bind(status.as_str());
        }
        if let Some(order_id) = query.filter.order_id {
            count_query = count_query.bind(order_id.as_uuid());
            select_query = select_query.bind(order_id.as_uuid());
        }
        select_query = select_query
            .bind(i64::try_from(query.first).unwrap_or(i64::MAX))
            .bind(i64::try_from(query.skip).unwrap_or(i64::MAX));

        let total: i64 = count_query.fetch_one(&self.pool).await?;
        let rows = select_query.fetch_all(&self.pool).await?;
        let items = rows
            .into_iter()
            .map(Self::row_to_item)
            .collect::<Result<Vec<_>>>()?;

        Ok(Page::new(
            items,
            usize::try_from(total).unwrap_or_default(),
            query.skip,
            query.first,
        ))
    }

    async fn find_by_order(&self, order_id: OrderId) -> Result<Vec<ProductItem>> {
        let rows = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM product_items WHERE order_id = $1 ORDER BY id ASC"
        ))
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_item).collect()
    }

    async fn find_available(&self, variant_id: VariantId) -> Result<Vec<ProductItem>> {
        let rows = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM product_items WHERE variant_id = $1 AND status = $2 ORDER BY id ASC"
        ))
        .bind(variant_id.as_uuid())
        .bind(InventoryStatus::InStorage.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_item).collect()
    }

    async fn count_available(&self, variant_id: VariantId) -> Result<usize> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM product_items WHERE variant_id = $1 AND status = $2",
        )
        .bind(variant_id.as_uuid())
        .bind(InventoryStatus::InStorage.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(usize::try_from(count).unwrap_or_default())
    }

    async fn update_where(
        &self,
        id: ProductItemId,
        expected: InventoryStatus,
        expected_order: Option<OrderId>,
        change: StatusChange,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE product_items
            SET status = $1, order_id = $2, updated_at = $3
            WHERE id = $4 AND status = $5 AND order_id IS NOT DISTINCT FROM $6
            "#,
        )
        .bind(change.status.as_str())
        .bind(change.order_id.map(|o| o.as_uuid()))
        .bind(Utc::now())
        .bind(id.as_uuid())
        .bind(expected.as_str())
        .bind(expected_order.map(|o| o.as_uuid()))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn update(&self, id: ProductItemId, update: ItemUpdate) -> Result<Option<ProductItem>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE product_items
            SET variant_id = COALESCE($1, variant_id),
                status = COALESCE($2, status),
                order_id = CASE WHEN $2 = 'IN_STORAGE' THEN NULL ELSE order_id END,
                updated_at = $3
            WHERE id = $4
            RETURNING {ITEM_COLUMNS}
            "#
        ))
        .bind(update.variant_id.map(|v| v.as_uuid()))
        .bind(update.status.map(|s| s.as_str()))
        .bind(Utc::now())
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_item).transpose()
    }

    async fn release_by_order(&self, order_id: OrderId) -> Result<Vec<ProductItemId>> {
        let rows = sqlx::query(
            r#"
            UPDATE product_items
            SET status = $1, order_id = NULL, updated_at = $2
            WHERE order_id = $3
            RETURNING id
            "#,
        )
        .bind(InventoryStatus::InStorage.as_str())
        .bind(Utc::now())
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_id).collect()
    }

    async fn release_stale(
        &self,
        order_id: OrderId,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<ProductItemId>> {
        let rows = sqlx::query(
            r#"
            UPDATE product_items
            SET status = $1, order_id = NULL, updated_at = $2
            WHERE order_id = $3 AND status = $4 AND updated_at < $5
            RETURNING id
            "#,
        )
        .bind(InventoryStatus::InStorage.as_str())
        .bind(Utc::now())
        .bind(order_id.as_uuid())
        .bind(InventoryStatus::Reserved.as_str())
        .bind(older_than)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_id).collect()
    }

    async fn set_status_by_order(
        &self,
        order_id: OrderId,
        status: InventoryStatus,
    ) -> Result<Vec<ProductItemId>> {
        let change = StatusChange::for_order(status, order_id);
        let rows = sqlx::query(
            r#"
            UPDATE product_items
            SET status = $1, order_id = $2, updated_at = $3
            WHERE order_id = $4
            RETURNING id
            "#,
        )
        .bind(change.status.as_str())
        .bind(change.order_id.map(|o| o.as_uuid()))
        .bind(Utc::now())
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_id).collect()
    }

    async fn find_stale_reserved(&self, older_than: DateTime<Utc>) -> Result<Vec<OrderId>> {
        let orders: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT order_id
            FROM product_items
            WHERE status = $1 AND order_id IS NOT NULL AND updated_at < $2
            ORDER BY order_id
            "#,
        )
        .bind(InventoryStatus::Reserved.as_str())
        .bind(older_than)
        .fetch_all(&self.pool)
        .await?;

        Ok(orders.into_iter().map(OrderId::from_uuid).collect())
    }

    async fn delete(&self, id: ProductItemId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM product_items WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl VariantRegistry for PostgresStore {
    async fn register(&self, variant_id: VariantId) -> Result<()> {
        sqlx::query("INSERT INTO product_variants (id) VALUES ($1) ON CONFLICT (id) DO NOTHING")
            .bind(variant_id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn exists(&self, variant_id: VariantId) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM product_variants WHERE id = $1)")
                .bind(variant_id.as_uuid())
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn remove(&self, variant_id: VariantId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM product_variants WHERE id = $1")
            .bind(variant_id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl IdempotencyStore for PostgresStore {
    async fn begin(&self, key: &str) -> Result<ClaimOutcome> {
        let now = Utc::now();
        let holder = ClaimToken::new();

        // Insert, or take over an in-progress claim whose lease expired
        let result = sqlx::query(
            r#"
            INSERT INTO processed_events (key, status, holder, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (key) DO UPDATE
            SET holder = EXCLUDED.holder, updated_at = EXCLUDED.updated_at
            WHERE processed_events.status = $2 AND processed_events.updated_at < $5
            "#,
        )
        .bind(key)
        .bind(KeyStatus::InProgress.as_str())
        .bind(holder.as_uuid())
        .bind(now)
        .bind(now - in_progress_lease())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(ClaimOutcome::Acquired(holder));
        }

        let outcome = match self.status(key).await? {
            Some(KeyStatus::Completed) => ClaimOutcome::Completed,
            _ => ClaimOutcome::InProgress,
        };
        tracing::debug!(key, ?outcome, "idempotency key already claimed");
        Ok(outcome)
    }

    async fn complete(&self, key: &str, token: ClaimToken) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE processed_events
            SET status = $1, updated_at = $2
            WHERE key = $3 AND status = $4 AND holder = $5
            "#,
        )
        .bind(KeyStatus::Completed.as_str())
        .bind(Utc::now())
        .bind(key)
        .bind(KeyStatus::InProgress.as_str())
        .bind(token.as_uuid())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn abandon(&self, key: &str, token: ClaimToken) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM processed_events WHERE key = $1 AND status = $2 AND holder = $3")
                .bind(key)
                .bind(KeyStatus::InProgress.as_str())
                .bind(token.as_uuid())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn status(&self, key: &str) -> Result<Option<KeyStatus>> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM processed_events WHERE key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        match status.as_deref() {
            None => Ok(None),
            Some("IN_PROGRESS") => Ok(Some(KeyStatus::InProgress)),
            Some("COMPLETED") => Ok(Some(KeyStatus::Completed)),
            Some(other) => Err(StoreError::InvalidData(format!(
                "unknown idempotency key status: {other}"
            ))),
        }
    }
}
