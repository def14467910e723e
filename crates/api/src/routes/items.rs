//! Product item query and administration endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use common::{ProductItemId, VariantId};
use item_store::{
    DEFAULT_PAGE_SIZE, InventoryStatus, ItemQuery, ItemUpdate, OrderField, Page, ProductItem,
    SortDirection, Store,
};
use serde::Deserialize;

use super::parse_id;
use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub variant_id: Option<String>,
    pub status: Option<InventoryStatus>,
    pub skip: Option<usize>,
    pub first: Option<usize>,
    pub order_by: Option<OrderField>,
    pub direction: Option<SortDirection>,
}

impl ListParams {
    fn into_query(self) -> Result<ItemQuery, ApiError> {
        let mut query = ItemQuery::new().page(
            self.skip.unwrap_or(0),
            self.first.unwrap_or(DEFAULT_PAGE_SIZE),
        );
        if let Some(raw) = self.variant_id.as_deref() {
            query = query.variant(parse_id::<VariantId>("variant", raw)?);
        }
        if let Some(status) = self.status {
            query = query.status(status);
        }
        query.order_by.field = self.order_by.unwrap_or_default();
        Ok(query.direction(self.direction.unwrap_or_default()))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBatchRequest {
    pub product_variant_id: VariantId,
    pub number: usize,
}

// -- Handlers --

/// GET /product-items: filtered, paginated listing.
#[tracing::instrument(skip(state))]
pub async fn list<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Page<ProductItem>>, ApiError> {
    let page = state.inventory.find(params.into_query()?).await?;
    Ok(Json(page))
}

/// GET /product-items/:id
#[tracing::instrument(skip(state))]
pub async fn get<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<ProductItem>, ApiError> {
    let id: ProductItemId = parse_id("product item", &id)?;
    Ok(Json(state.inventory.get(id).await?))
}

/// PATCH /product-items/:id: administrative change of variant or status.
#[tracing::instrument(skip(state, update))]
pub async fn update<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(update): Json<ItemUpdate>,
) -> Result<Json<ProductItem>, ApiError> {
    let id: ProductItemId = parse_id("product item", &id)?;
    Ok(Json(state.inventory.update(id, update).await?))
}

/// DELETE /product-items/:id
#[tracing::instrument(skip(state))]
pub async fn delete<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id: ProductItemId = parse_id("product item", &id)?;
    state.inventory.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /product-items/batch: adds `number` units of a known variant to storage.
#[tracing::instrument(skip(state, req), fields(variant_id = %req.product_variant_id, count = req.number))]
pub async fn create_batch<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<CreateBatchRequest>,
) -> Result<(StatusCode, Json<Vec<ProductItem>>), ApiError> {
    let items = state
        .inventory
        .create_batch(req.product_variant_id, req.number)
        .await?;
    Ok((StatusCode::CREATED, Json(items)))
}
