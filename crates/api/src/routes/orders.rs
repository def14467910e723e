//! Order reservation status endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::OrderId;
use item_store::{ProductItem, Store};
use saga::OrderReservationState;
use serde::Serialize;

use super::parse_id;
use crate::AppState;
use crate::error::ApiError;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationResponse {
    pub order_id: OrderId,
    pub state: OrderReservationState,
    pub items: Vec<ProductItem>,
}

/// GET /orders/:id/reservation: the order's reservation state and the units it holds.
///
/// An order nothing is known about is reported as `UNKNOWN`, not 404.
#[tracing::instrument(skip(state))]
pub async fn reservation<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<ReservationResponse>, ApiError> {
    let order_id: OrderId = parse_id("order", &id)?;
    let (reservation_state, items) = state.orchestrator.order_state(order_id).await?;

    Ok(Json(ReservationResponse {
        order_id,
        state: reservation_state,
        items,
    }))
}
