//! Pub/sub topic names and their delivery routes.

/// A catalog variant was created.
pub const PRODUCT_VARIANT_CREATED: &str = "catalog/product-variant/created";
/// An order was placed and needs stock.
pub const ORDER_CREATED: &str = "order/order/created";
/// Payment for an order went through.
pub const PAYMENT_ENABLED: &str = "payment/payment/payment-enabled";
/// Payment for an order failed.
pub const PAYMENT_FAILED: &str = "payment/payment/payment-failed";
/// A shipment was created, for an order or for a return.
pub const SHIPMENT_CREATED: &str = "shipment/shipment/created";
/// A shipment changed status.
pub const SHIPMENT_STATUS_UPDATED: &str = "shipment/shipment/status-updated";
/// The discounts of an order turned out to be invalid.
pub const DISCOUNT_VALIDATION_FAILED: &str = "discount/order/validation-failed";

/// Every unit of an order was reserved.
pub const RESERVATION_SUCCEEDED: &str = "inventory/product-item/reservation-succeeded";
/// At least one line of an order could not be reserved.
pub const RESERVATION_FAILED: &str = "inventory/product-item/reservation-failed";

/// An inbound topic and the HTTP route the sidecar delivers it to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    pub topic: &'static str,
    pub route: &'static str,
}

/// Every topic the service consumes.
pub const SUBSCRIPTIONS: [Subscription; 7] = [
    Subscription {
        topic: PRODUCT_VARIANT_CREATED,
        route: "product-variant-created",
    },
    Subscription {
        topic: ORDER_CREATED,
        route: "order-created",
    },
    Subscription {
        topic: PAYMENT_ENABLED,
        route: "payment-enabled",
    },
    Subscription {
        topic: PAYMENT_FAILED,
        route: "payment-failed",
    },
    Subscription {
        topic: SHIPMENT_CREATED,
        route: "shipment-created",
    },
    Subscription {
        topic: SHIPMENT_STATUS_UPDATED,
        route: "shipment-status-updated",
    },
    Subscription {
        topic: DISCOUNT_VALIDATION_FAILED,
        route: "discount-validation-failed",
    },
];

/// Returns the topic delivered on `route`.
pub fn topic_for_route(route: &str) -> Option<&'static str> {
    SUBSCRIPTIONS
        .iter()
        .find(|s| s.route == route)
        .map(|s| s.topic)
}
