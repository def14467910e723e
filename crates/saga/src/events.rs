//! Inbound and outbound event payloads.
//!
//! Payload structs only name the fields this service reads. Everything else
//! is kept in `extra` so that an order can be echoed back unchanged in the
//! outcome events.

use common::{OrderId, VariantId};
use inventory::{ReservationLine, ReservationRequest};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SagaError;
use crate::topics;

/// One delivery from the event bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEnvelope {
    /// Unique id of the delivery, stable across redeliveries.
    pub id: String,
    pub topic: String,
    pub data: Value,
}

impl InboundEnvelope {
    pub fn new(id: impl Into<String>, topic: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            topic: topic.into(),
            data,
        }
    }
}

/// An order as carried by order, payment and discount events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDto {
    pub id: OrderId,
    #[serde(default)]
    pub order_items: Vec<OrderItemDto>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl OrderDto {
    /// Builds the reservation request for this order's lines.
    pub fn reservation_request(&self) -> Result<ReservationRequest, SagaError> {
        let lines = self
            .order_items
            .iter()
            .map(|item| {
                if item.count == 0 {
                    return Err(SagaError::Validation(format!(
                        "order {} has a line for variant {} with count 0",
                        self.id, item.product_variant_id
                    )));
                }
                Ok(ReservationLine {
                    variant_id: item.product_variant_id,
                    count: item.count as usize,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ReservationRequest::new(self.id, lines))
    }
}

/// One line of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemDto {
    pub product_variant_id: VariantId,
    pub count: u32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Envelope of order, payment-enabled and payment-failed events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPayload {
    pub order: OrderDto,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscountValidationFailedPayload {
    pub order: OrderDto,
    #[serde(default)]
    pub failing_discount_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductVariantCreatedPayload {
    pub id: VariantId,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Status of a shipment as reported by the shipment service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShipmentStatus {
    Pending,
    InProgress,
    Delivered,
    Failed,
}

/// A shipment. Without an `order_id` it belongs to a return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipmentPayload {
    pub id: String,
    #[serde(default)]
    pub order_id: Option<OrderId>,
    #[serde(default)]
    pub return_id: Option<String>,
    #[serde(default)]
    pub status: Option<ShipmentStatus>,
    #[serde(default)]
    pub order_item_ids: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Inbound events, one variant per consumed topic.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    ProductVariantCreated(ProductVariantCreatedPayload),
    OrderCreated(OrderDto),
    PaymentEnabled(OrderDto),
    PaymentFailed(OrderDto),
    ShipmentCreated(ShipmentPayload),
    ShipmentStatusUpdated {
        shipment: ShipmentPayload,
        status: ShipmentStatus,
    },
    DiscountValidationFailed(DiscountValidationFailedPayload),
}

impl InboundEvent {
    /// Maps a topic and its payload to an event.
    ///
    /// Unknown topics and malformed payloads are validation errors.
    pub fn parse(topic: &str, data: &Value) -> Result<Self, SagaError> {
        let event = match topic {
            topics::PRODUCT_VARIANT_CREATED => {
                InboundEvent::ProductVariantCreated(decode(topic, data)?)
            }
            topics::ORDER_CREATED => {
                let payload: OrderPayload = decode(topic, data)?;
                InboundEvent::OrderCreated(payload.order)
            }
            topics::PAYMENT_ENABLED => {
                let payload: OrderPayload = decode(topic, data)?;
                InboundEvent::PaymentEnabled(payload.order)
            }
            topics::PAYMENT_FAILED => {
                let payload: OrderPayload = decode(topic, data)?;
                InboundEvent::PaymentFailed(payload.order)
            }
            topics::SHIPMENT_CREATED => InboundEvent::ShipmentCreated(decode(topic, data)?),
            topics::SHIPMENT_STATUS_UPDATED => {
                let shipment: ShipmentPayload = decode(topic, data)?;
                let status = shipment.status.ok_or_else(|| {
                    SagaError::Validation(format!("{topic}: shipment {} has no status", shipment.id))
                })?;
                InboundEvent::ShipmentStatusUpdated { shipment, status }
            }
            topics::DISCOUNT_VALIDATION_FAILED => {
                InboundEvent::DiscountValidationFailed(decode(topic, data)?)
            }
            other => {
                return Err(SagaError::Validation(format!("unknown topic: {other}")));
            }
        };
        Ok(event)
    }

    /// Short name used in logs and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::ProductVariantCreated(_) => "product_variant_created",
            InboundEvent::OrderCreated(_) => "order_created",
            InboundEvent::PaymentEnabled(_) => "payment_enabled",
            InboundEvent::PaymentFailed(_) => "payment_failed",
            InboundEvent::ShipmentCreated(_) => "shipment_created",
            InboundEvent::ShipmentStatusUpdated { .. } => "shipment_status_updated",
            InboundEvent::DiscountValidationFailed(_) => "discount_validation_failed",
        }
    }

    /// The order the event concerns, if any.
    pub fn order_id(&self) -> Option<OrderId> {
        match self {
            InboundEvent::ProductVariantCreated(_) => None,
            InboundEvent::OrderCreated(order)
            | InboundEvent::PaymentEnabled(order)
            | InboundEvent::PaymentFailed(order) => Some(order.id),
            InboundEvent::ShipmentCreated(shipment)
            | InboundEvent::ShipmentStatusUpdated { shipment, .. } => shipment.order_id,
            InboundEvent::DiscountValidationFailed(payload) => Some(payload.order.id),
        }
    }

    /// Key under which handling of this event is deduplicated.
    ///
    /// Order creation is keyed by order so that the same order published
    /// twice under different delivery ids is reserved once.
    pub fn idempotency_key(&self, delivery_id: &str) -> String {
        match self {
            InboundEvent::OrderCreated(order) => order_created_key(order.id),
            _ => format!("event/{delivery_id}"),
        }
    }
}

/// Idempotency key of the reservation for an order.
pub fn order_created_key(order_id: OrderId) -> String {
    format!("order-created/{order_id}")
}

fn decode<T: serde::de::DeserializeOwned>(topic: &str, data: &Value) -> Result<T, SagaError> {
    T::deserialize(data).map_err(|e| SagaError::Validation(format!("{topic}: {e}")))
}

/// Events published by the saga.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundEvent {
    ReservationSucceeded {
        order: OrderDto,
    },
    ReservationFailed {
        order: OrderDto,
        failed_product_variant_ids: Vec<VariantId>,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReservationFailedBody<'a> {
    order: &'a OrderDto,
    failed_product_variant_ids: &'a [VariantId],
}

impl OutboundEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            OutboundEvent::ReservationSucceeded { .. } => topics::RESERVATION_SUCCEEDED,
            OutboundEvent::ReservationFailed { .. } => topics::RESERVATION_FAILED,
        }
    }

    /// The JSON body to publish.
    pub fn payload(&self) -> Result<Value, SagaError> {
        let value = match self {
            OutboundEvent::ReservationSucceeded { order } => {
                serde_json::to_value(OrderPayload {
                    order: order.clone(),
                })?
            }
            OutboundEvent::ReservationFailed {
                order,
                failed_product_variant_ids,
            } => serde_json::to_value(ReservationFailedBody {
                order,
                failed_product_variant_ids,
            })?,
        };
        Ok(value)
    }
}
