//! Bulk status propagation for an order's units.

use common::{OrderId, ProductItemId};
use item_store::{InventoryStatus, ItemStore, StatusChange};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::retry::RetryPolicy;

/// How strictly status changes are checked against the transition table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionPolicy {
    /// Every linked unit is set to the new status unconditionally.
    #[default]
    Permissive,
    /// Only units for which [`InventoryStatus::can_transition_to`] holds are
    /// updated; the rest are skipped.
    Strict,
}

impl std::str::FromStr for TransitionPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "permissive" => Ok(TransitionPolicy::Permissive),
            "strict" => Ok(TransitionPolicy::Strict),
            other => Err(format!("unknown transition policy: {other}")),
        }
    }
}

/// Advances the fulfillment status of every unit linked to an order.
#[derive(Clone)]
pub struct StatusPropagator<S> {
    store: S,
    retry: RetryPolicy,
    policy: TransitionPolicy,
}

impl<S: ItemStore + Clone> StatusPropagator<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            retry: RetryPolicy::default(),
            policy: TransitionPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_policy(mut self, policy: TransitionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> TransitionPolicy {
        self.policy
    }

    /// Sets `status` on every unit carrying `order_id`.
    ///
    /// Returns the ids of the updated units. An unknown order updates nothing
    /// and is not an error. Moving units to `IN_STORAGE` also clears their
    /// order link.
    #[tracing::instrument(skip(self))]
    pub async fn advance_order_status(
        &self,
        order_id: OrderId,
        status: InventoryStatus,
    ) -> Result<Vec<ProductItemId>> {
        let updated = match self.policy {
            TransitionPolicy::Permissive => {
                self.retry
                    .run("set_status_by_order", || {
                        self.store.set_status_by_order(order_id, status)
                    })
                    .await?
            }
            TransitionPolicy::Strict => self.advance_strict(order_id, status).await?,
        };

        tracing::info!(count = updated.len(), %status, "order status propagated");
        Ok(updated)
    }

    async fn advance_strict(
        &self,
        order_id: OrderId,
        status: InventoryStatus,
    ) -> Result<Vec<ProductItemId>> {
        let units = self
            .retry
            .run("find_by_order", || self.store.find_by_order(order_id))
            .await?;
        let change = StatusChange::for_order(status, order_id);

        let mut updated = Vec::with_capacity(units.len());
        for unit in units {
            if !unit.status.can_transition_to(status) {
                tracing::warn!(
                    item_id = %unit.id,
                    from = %unit.status,
                    to = %status,
                    "illegal status transition skipped"
                );
                continue;
            }
            let applied = self
                .retry
                .run("update_where", || {
                    self.store.update_where(unit.id, unit.status, unit.order_id, change)
                })
                .await?;
            if applied {
                updated.push(unit.id);
            }
        }
        Ok(updated)
    }
}
