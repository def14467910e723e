//! Product item records and their inventory status.

use chrono::{DateTime, Utc};
use common::{OrderId, ProductItemId, VariantId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The status of an individual product item in the inventory.
///
/// ```text
/// IN_STORAGE ──► RESERVED ──► IN_FULFILLMENT ──► SHIPPED ──┬──► DELIVERED
///     ▲              │               │                     ├──► LOST
///     └──────────────┴───────────────┘ (release)           └──► RETURNED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InventoryStatus {
    /// The item is in storage, not yet sold or reserved.
    InStorage,
    /// The item has been reserved for an order but not yet sold.
    Reserved,
    /// The item is being packed and handed to shipping.
    InFulfillment,
    /// The item has been shipped to the customer.
    Shipped,
    /// The item has been delivered to the customer.
    Delivered,
    /// The item has been returned by the customer.
    Returned,
    /// The item was lost during shipping or in the warehouse.
    Lost,
}

impl InventoryStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [InventoryStatus; 7] = [
        InventoryStatus::InStorage,
        InventoryStatus::Reserved,
        InventoryStatus::InFulfillment,
        InventoryStatus::Shipped,
        InventoryStatus::Delivered,
        InventoryStatus::Returned,
        InventoryStatus::Lost,
    ];

    /// Returns the wire/storage name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            InventoryStatus::InStorage => "IN_STORAGE",
            InventoryStatus::Reserved => "RESERVED",
            InventoryStatus::InFulfillment => "IN_FULFILLMENT",
            InventoryStatus::Shipped => "SHIPPED",
            InventoryStatus::Delivered => "DELIVERED",
            InventoryStatus::Returned => "RETURNED",
            InventoryStatus::Lost => "LOST",
        }
    }

    /// Returns true if a unit in this status must carry an order id.
    ///
    /// `RETURNED` is excluded: it may be reached with or without an order.
    pub fn requires_order(&self) -> bool {
        matches!(
            self,
            InventoryStatus::Reserved
                | InventoryStatus::InFulfillment
                | InventoryStatus::Shipped
                | InventoryStatus::Delivered
                | InventoryStatus::Lost
        )
    }

    /// Returns true if the unit can be claimed by a reservation.
    pub fn is_available(&self) -> bool {
        matches!(self, InventoryStatus::InStorage)
    }

    /// Statuses reachable from this one in a single step, excluding itself.
    pub fn successors(&self) -> &'static [InventoryStatus] {
        use InventoryStatus::*;
        match self {
            InStorage => &[Reserved],
            Reserved => &[InFulfillment, InStorage],
            InFulfillment => &[Shipped, InStorage],
            Shipped => &[Delivered, Lost, Returned],
            Delivered => &[Returned],
            Returned => &[InStorage],
            Lost => &[InStorage],
        }
    }

    /// Returns true if a unit may move from this status to `next`.
    ///
    /// Every status may transition to itself.
    pub fn can_transition_to(&self, next: InventoryStatus) -> bool {
        *self == next || self.successors().contains(&next)
    }
}

impl std::fmt::Display for InventoryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when parsing an unknown status name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown inventory status: {0}")]
pub struct StatusParseError(pub String);

impl std::str::FromStr for InventoryStatus {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InventoryStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| StatusParseError(s.to_string()))
    }
}

/// One physical or virtual stock unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductItem {
    pub id: ProductItemId,
    pub variant_id: VariantId,
    #[serde(rename = "inventoryStatus")]
    pub status: InventoryStatus,
    pub order_id: Option<OrderId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProductItem {
    /// Creates a new unit in storage for the given variant.
    pub fn new_in_storage(variant_id: VariantId, now: DateTime<Utc>) -> Self {
        Self {
            id: ProductItemId::new(),
            variant_id,
            status: InventoryStatus::InStorage,
            order_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies a status change in place.
    pub fn apply(&mut self, change: &StatusChange, now: DateTime<Utc>) {
        self.status = change.status;
        self.order_id = change.order_id;
        self.updated_at = now;
    }

    /// Applies an administrative update in place.
    ///
    /// Moving a unit back to `IN_STORAGE` detaches it from its order.
    pub fn apply_update(&mut self, update: &ItemUpdate, now: DateTime<Utc>) {
        if let Some(variant_id) = update.variant_id {
            self.variant_id = variant_id;
        }
        if let Some(status) = update.status {
            self.status = status;
            if status == InventoryStatus::InStorage {
                self.order_id = None;
            }
        }
        self.updated_at = now;
    }
}

/// The target of a conditional write: new status and order link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub status: InventoryStatus,
    pub order_id: Option<OrderId>,
}

impl StatusChange {
    /// Claims a unit for an order.
    pub fn reserve(order_id: OrderId) -> Self {
        Self {
            status: InventoryStatus::Reserved,
            order_id: Some(order_id),
        }
    }

    /// Returns a unit to available stock.
    pub fn release() -> Self {
        Self {
            status: InventoryStatus::InStorage,
            order_id: None,
        }
    }

    /// Moves a unit to `status` while keeping it linked to `order_id`.
    pub fn advance(status: InventoryStatus, order_id: OrderId) -> Self {
        Self {
            status,
            order_id: Some(order_id),
        }
    }

    /// Like [`StatusChange::advance`], but `IN_STORAGE` detaches the order.
    pub fn for_order(status: InventoryStatus, order_id: OrderId) -> Self {
        if status == InventoryStatus::InStorage {
            Self::release()
        } else {
            Self::advance(status, order_id)
        }
    }
}

/// Administrative update of a single unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemUpdate {
    pub variant_id: Option<VariantId>,
    #[serde(rename = "inventoryStatus")]
    pub status: Option<InventoryStatus>,
}

impl ItemUpdate {
    /// Returns true if the update changes nothing.
    pub fn is_empty(&self) -> bool {
        self.variant_id.is_none() && self.status.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_names_round_trip_through_from_str() {
        for status in InventoryStatus::ALL {
            assert_eq!(status.as_str().parse::<InventoryStatus>().unwrap(), status);
        }
        assert!("SOLD".parse::<InventoryStatus>().is_err());
    }

    #[test]
    fn status_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&InventoryStatus::InFulfillment).unwrap();
        assert_eq!(json, "\"IN_FULFILLMENT\"");
    }

    #[test]
    fn in_storage_and_returned_do_not_require_order() {
        assert!(!InventoryStatus::InStorage.requires_order());
        assert!(!InventoryStatus::Returned.requires_order());
        assert!(InventoryStatus::Reserved.requires_order());
        assert!(InventoryStatus::Lost.requires_order());
    }

    #[test]
    fn transition_table() {
        use InventoryStatus::*;
        assert!(InStorage.can_transition_to(Reserved));
        assert!(Reserved.can_transition_to(InFulfillment));
        assert!(Reserved.can_transition_to(InStorage));
        assert!(Shipped.can_transition_to(Lost));
        assert!(Delivered.can_transition_to(Returned));
        assert!(Lost.can_transition_to(InStorage));

        assert!(!Reserved.can_transition_to(Delivered));
        assert!(!InStorage.can_transition_to(Shipped));
        assert!(!Delivered.can_transition_to(InStorage));

        for status in InventoryStatus::ALL {
            assert!(status.can_transition_to(status));
        }
    }

    #[test]
    fn release_clears_order() {
        let now = Utc::now();
        let mut item = ProductItem::new_in_storage(VariantId::new(), now);
        item.apply(&StatusChange::reserve(OrderId::new()), now);
        assert_eq!(item.status, InventoryStatus::Reserved);
        assert!(item.order_id.is_some());

        item.apply(&StatusChange::release(), now);
        assert_eq!(item.status, InventoryStatus::InStorage);
        assert!(item.order_id.is_none());
    }

    #[test]
    fn admin_update_to_in_storage_detaches_order() {
        let now = Utc::now();
        let mut item = ProductItem::new_in_storage(VariantId::new(), now);
        item.apply(&StatusChange::reserve(OrderId::new()), now);

        item.apply_update(
            &ItemUpdate {
                variant_id: None,
                status: Some(InventoryStatus::InStorage),
            },
            now,
        );
        assert!(item.order_id.is_none());
    }

    #[test]
    fn item_serializes_with_inventory_status_field() {
        let item = ProductItem::new_in_storage(VariantId::new(), Utc::now());
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["inventoryStatus"], "IN_STORAGE");
        assert!(json["orderId"].is_null());
        assert!(json.get("variantId").is_some());
    }
}
