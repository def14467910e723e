//! Claiming available units for orders.

use std::collections::HashSet;
use std::time::Instant;

use common::{OrderId, ProductItemId, VariantId};
use futures_util::future::join_all;
use item_store::{InventoryStatus, ItemStore, StatusChange};
use serde::{Deserialize, Serialize};

use crate::error::{InventoryError, Result};
use crate::retry::RetryPolicy;

/// Reservation engine settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservationConfig {
    /// How many times candidates are re-read after losing claims to
    /// concurrent reservers before giving up with a shortfall.
    pub max_claim_rounds: usize,
    pub retry: RetryPolicy,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            max_claim_rounds: 8,
            retry: RetryPolicy::default(),
        }
    }
}

/// One requested line of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationLine {
    pub variant_id: VariantId,
    pub count: usize,
}

/// The units an order asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationRequest {
    pub order_id: OrderId,
    pub lines: Vec<ReservationLine>,
}

impl ReservationRequest {
    pub fn new(order_id: OrderId, lines: Vec<ReservationLine>) -> Self {
        Self { order_id, lines }
    }

    /// Lines with repeated variants summed, in first-seen order.
    ///
    /// Zero-count lines are kept so that the outcome still names them.
    pub fn merged_lines(&self) -> Vec<ReservationLine> {
        let mut merged: Vec<ReservationLine> = Vec::with_capacity(self.lines.len());
        for line in &self.lines {
            match merged.iter_mut().find(|m| m.variant_id == line.variant_id) {
                Some(existing) => existing.count += line.count,
                None => merged.push(*line),
            }
        }
        merged
    }
}

/// A line whose units were all claimed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservedLine {
    pub variant_id: VariantId,
    pub item_ids: Vec<ProductItemId>,
}

/// A line that could not be reserved. No units are left claimed for it.
#[derive(Debug)]
pub struct FailedLine {
    pub variant_id: VariantId,
    pub requested: usize,
    pub error: InventoryError,
}

impl FailedLine {
    /// Returns true if the line failed for lack of stock.
    pub fn is_shortfall(&self) -> bool {
        self.error.is_insufficient_stock()
    }
}

/// Aggregated outcome of reserving every line of an order.
#[derive(Debug)]
pub struct OrderReservation {
    pub order_id: OrderId,
    pub succeeded: Vec<ReservedLine>,
    pub failed: Vec<FailedLine>,
}

impl OrderReservation {
    /// Returns true if every line was reserved.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Returns true if any line failed for a reason other than a shortfall.
    pub fn has_transient_failure(&self) -> bool {
        self.failed.iter().any(|line| !line.is_shortfall())
    }

    /// Variants of the lines that failed, in request order.
    pub fn failed_variant_ids(&self) -> Vec<VariantId> {
        self.failed.iter().map(|line| line.variant_id).collect()
    }

    /// Every unit claimed for the order.
    pub fn reserved_item_ids(&self) -> Vec<ProductItemId> {
        self.succeeded
            .iter()
            .flat_map(|line| line.item_ids.iter().copied())
            .collect()
    }
}

/// Engine claiming `IN_STORAGE` units for orders.
///
/// Claims go through [`ItemStore::update_where`] conditioned on the unit
/// still being `IN_STORAGE`, so concurrent reservers can never claim the
/// same unit. Candidates are taken in ascending id order.
#[derive(Clone)]
pub struct ReservationEngine<S> {
    store: S,
    config: ReservationConfig,
}

impl<S: ItemStore + Clone> ReservationEngine<S> {
    /// Creates a new reservation engine with default settings.
    pub fn new(store: S) -> Self {
        Self::with_config(store, ReservationConfig::default())
    }

    pub fn with_config(store: S, config: ReservationConfig) -> Self {
        Self { store, config }
    }

    /// Atomically claims `count` units of a variant for an order.
    ///
    /// Either exactly `count` units end up `RESERVED` for `order_id`, or the
    /// call fails and every unit it claimed has been returned to storage.
    #[tracing::instrument(skip(self), fields(order_id = %order_id, variant_id = %variant_id))]
    pub async fn reserve_batch(
        &self,
        variant_id: VariantId,
        count: usize,
        order_id: OrderId,
    ) -> Result<Vec<ProductItemId>> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let start = Instant::now();
        let mut claimed = Vec::with_capacity(count);
        let outcome = self
            .claim(variant_id, count, order_id, &mut claimed)
            .await;

        match outcome {
            Ok(()) => {
                metrics::counter!("inventory_reservations_total").increment(1);
                metrics::histogram!("inventory_reservation_duration_seconds")
                    .record(start.elapsed().as_secs_f64());
                tracing::info!(count, "units reserved");
                Ok(claimed)
            }
            Err(e) => {
                self.rollback(&claimed, order_id).await;
                if e.is_insufficient_stock() {
                    metrics::counter!("inventory_reservation_shortfalls_total").increment(1);
                    tracing::info!(error = %e, "reservation short of stock");
                } else {
                    tracing::warn!(error = %e, "reservation failed");
                }
                Err(e)
            }
        }
    }

    async fn claim(
        &self,
        variant_id: VariantId,
        count: usize,
        order_id: OrderId,
        claimed: &mut Vec<ProductItemId>,
    ) -> Result<()> {
        let retry = self.config.retry;
        let change = StatusChange::reserve(order_id);

        for round in 0..self.config.max_claim_rounds.max(1) {
            let candidates = retry
                .run("find_available", || self.store.find_available(variant_id))
                .await?;

            let available = claimed.len() + candidates.len();
            if available < count {
                return Err(InventoryError::InsufficientStock {
                    variant_id,
                    requested: count,
                    available,
                });
            }

            for candidate in candidates {
                if claimed.len() == count {
                    break;
                }
                let applied = retry
                    .run("claim", || {
                        self.store
                            .update_where(candidate.id, InventoryStatus::InStorage, None, change)
                    })
                    .await?;
                if applied || self.claimed_by(candidate.id, order_id).await? {
                    claimed.push(candidate.id);
                }
            }

            if claimed.len() == count {
                // A release of the order may have freed units claimed earlier
                let held = self.held_by(order_id).await?;
                claimed.retain(|id| held.contains(id));
                if claimed.len() == count {
                    return Ok(());
                }
            }
            tracing::debug!(round, claimed = claimed.len(), "lost claims to concurrent reservers");
        }

        // Contention outlasted every round; report what could be secured
        Err(InventoryError::InsufficientStock {
            variant_id,
            requested: count,
            available: claimed.len(),
        })
    }

    async fn held_by(&self, order_id: OrderId) -> Result<HashSet<ProductItemId>> {
        let linked = self
            .config
            .retry
            .run("find_by_order", || self.store.find_by_order(order_id))
            .await?;
        Ok(linked
            .into_iter()
            .filter(|i| i.status == InventoryStatus::Reserved)
            .map(|i| i.id)
            .collect())
    }

    /// Detects a claim that was applied by an attempt whose response was lost.
    async fn claimed_by(&self, id: ProductItemId, order_id: OrderId) -> Result<bool> {
        let item = self
            .config
            .retry
            .run("find_by_id", || self.store.find_by_id(id))
            .await?;
        Ok(item.is_some_and(|i| i.status == InventoryStatus::Reserved && i.order_id == Some(order_id)))
    }

    /// Returns claimed units to storage, unless they no longer belong to the order.
    async fn rollback(&self, claimed: &[ProductItemId], order_id: OrderId) {
        for &id in claimed {
            let released = self
                .config
                .retry
                .run("rollback_claim", || {
                    self.store.update_where(
                        id,
                        InventoryStatus::Reserved,
                        Some(order_id),
                        StatusChange::release(),
                    )
                })
                .await;
            if let Err(e) = released {
                tracing::error!(item_id = %id, error = %e, "failed to roll back claim");
            }
        }
    }

    /// Reserves every line of an order concurrently.
    ///
    /// Lines for the same variant are merged first. There is no atomicity
    /// across lines: callers must release the order when any line failed.
    #[tracing::instrument(skip(self, request), fields(order_id = %request.order_id, lines = request.lines.len()))]
    pub async fn reserve_order(&self, request: &ReservationRequest) -> OrderReservation {
        let order_id = request.order_id;
        let lines = request.merged_lines();

        let results = join_all(
            lines
                .iter()
                .map(|line| self.reserve_batch(line.variant_id, line.count, order_id)),
        )
        .await;

        let mut reservation = OrderReservation {
            order_id,
            succeeded: Vec::new(),
            failed: Vec::new(),
        };
        for (line, result) in lines.into_iter().zip(results) {
            match result {
                Ok(item_ids) => reservation.succeeded.push(ReservedLine {
                    variant_id: line.variant_id,
                    item_ids,
                }),
                Err(error) => reservation.failed.push(FailedLine {
                    variant_id: line.variant_id,
                    requested: line.count,
                    error,
                }),
            }
        }
        reservation
    }
}
