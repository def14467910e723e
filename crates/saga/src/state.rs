//! Order reservation state, inferred from stored units.

use item_store::{InventoryStatus, KeyStatus, ProductItem};
use serde::{Deserialize, Serialize};

/// The state of an order's reservation saga.
///
/// Nothing stores this state; it is read off the order's linked units and
/// the idempotency record of its creation event.
///
/// State transitions:
/// ```text
/// PendingReservation ──► Reserved ──► Fulfilling ──► Shipped ──┬──► Delivered
///         │                 │             │                    └──► Lost
///         └─────────────────┴─────────────┴──► Released
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderReservationState {
    /// No event about the order has been handled.
    #[default]
    Unknown,

    /// The order-created event is being handled.
    PendingReservation,

    /// Every linked unit is reserved.
    Reserved,

    /// Units are being packed.
    Fulfilling,

    /// Units are on their way.
    Shipped,

    /// Units reached the customer (terminal state).
    Delivered,

    /// The reservation was undone or never succeeded (terminal state).
    Released,

    /// Units were lost in transit (terminal state).
    Lost,

    /// Units came back from the customer (terminal state).
    Returned,
}

impl OrderReservationState {
    /// Infers the state from the order's linked units and the status of its
    /// order-created idempotency key.
    pub fn infer(units: &[ProductItem], creation: Option<KeyStatus>) -> Self {
        if units.is_empty() {
            return match creation {
                None => OrderReservationState::Unknown,
                Some(KeyStatus::InProgress) => OrderReservationState::PendingReservation,
                Some(KeyStatus::Completed) => OrderReservationState::Released,
            };
        }

        let any = |status: InventoryStatus| units.iter().any(|u| u.status == status);
        if any(InventoryStatus::Lost) {
            return OrderReservationState::Lost;
        }
        if any(InventoryStatus::Returned) {
            return OrderReservationState::Returned;
        }

        // The least advanced unit decides
        let least = units
            .iter()
            .map(|u| u.status)
            .min_by_key(|status| progress(*status))
            .unwrap_or(InventoryStatus::Reserved);

        match least {
            InventoryStatus::Reserved if creation == Some(KeyStatus::InProgress) => {
                OrderReservationState::PendingReservation
            }
            InventoryStatus::InFulfillment => OrderReservationState::Fulfilling,
            InventoryStatus::Shipped => OrderReservationState::Shipped,
            InventoryStatus::Delivered => OrderReservationState::Delivered,
            _ => OrderReservationState::Reserved,
        }
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderReservationState::Delivered
                | OrderReservationState::Released
                | OrderReservationState::Lost
                | OrderReservationState::Returned
        )
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderReservationState::Unknown => "UNKNOWN",
            OrderReservationState::PendingReservation => "PENDING_RESERVATION",
            OrderReservationState::Reserved => "RESERVED",
            OrderReservationState::Fulfilling => "FULFILLING",
            OrderReservationState::Shipped => "SHIPPED",
            OrderReservationState::Delivered => "DELIVERED",
            OrderReservationState::Released => "RELEASED",
            OrderReservationState::Lost => "LOST",
            OrderReservationState::Returned => "RETURNED",
        }
    }
}

fn progress(status: InventoryStatus) -> u8 {
    match status {
        InventoryStatus::InStorage => 0,
        InventoryStatus::Reserved => 1,
        InventoryStatus::InFulfillment => 2,
        InventoryStatus::Shipped => 3,
        InventoryStatus::Delivered | InventoryStatus::Returned | InventoryStatus::Lost => 4,
    }
}

impl std::fmt::Display for OrderReservationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
