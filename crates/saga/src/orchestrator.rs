//! Saga orchestrator reacting to order lifecycle events.

use std::collections::HashMap;
use std::time::Instant;

use common::{OrderId, VariantId};
use inventory::{
    InventoryService, ReleaseEngine, ReservationConfig, ReservationEngine, ReservationRequest,
    RetryPolicy, StatusPropagator, TransitionPolicy,
};
use item_store::{ClaimOutcome, InventoryStatus, ItemStore, ProductItem, Store};

use crate::error::{Result, SagaError};
use crate::events::{
    InboundEnvelope, InboundEvent, OrderDto, OutboundEvent, ShipmentStatus, order_created_key,
};
use crate::publisher::EventPublisher;
use crate::state::OrderReservationState;

/// What handling an event amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// The event was acted upon.
    Processed,
    /// The event had already been handled.
    Duplicate,
    /// The event does not concern this service.
    Ignored,
}

impl HandleOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandleOutcome::Processed => "processed",
            HandleOutcome::Duplicate => "duplicate",
            HandleOutcome::Ignored => "ignored",
        }
    }
}

/// Orchestrator settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub reservation: ReservationConfig,
    pub retry: RetryPolicy,
    pub transition_policy: TransitionPolicy,
}

impl OrchestratorConfig {
    /// Uses `retry` for every store call, engines included.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self.reservation.retry = retry;
        self
    }
}

/// Drives the inventory engines from inbound events.
///
/// Holds no state of its own: every coordination between concurrent
/// handlers goes through the store, so any number of orchestrators may
/// consume the same subscription.
pub struct SagaOrchestrator<S, P> {
    store: S,
    inventory: InventoryService<S>,
    reservation: ReservationEngine<S>,
    release: ReleaseEngine<S>,
    status: StatusPropagator<S>,
    publisher: P,
    retry: RetryPolicy,
}

impl<S, P> SagaOrchestrator<S, P>
where
    S: Store,
    P: EventPublisher,
{
    /// Creates a new orchestrator with default settings.
    pub fn new(store: S, publisher: P) -> Self {
        Self::with_config(store, publisher, OrchestratorConfig::default())
    }

    pub fn with_config(store: S, publisher: P, config: OrchestratorConfig) -> Self {
        Self {
            inventory: InventoryService::with_retry(store.clone(), config.retry),
            reservation: ReservationEngine::with_config(store.clone(), config.reservation),
            release: ReleaseEngine::with_retry(store.clone(), config.retry),
            status: StatusPropagator::new(store.clone())
                .with_retry(config.retry)
                .with_policy(config.transition_policy),
            store,
            publisher,
            retry: config.retry,
        }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Handles one delivery at most once.
    ///
    /// The delivery is claimed in the idempotency store first. A failed
    /// attempt drops the claim so that a redelivery runs it again.
    #[tracing::instrument(skip(self, envelope), fields(event_id = %envelope.id, topic = %envelope.topic))]
    pub async fn handle(&self, envelope: &InboundEnvelope) -> Result<HandleOutcome> {
        let start = Instant::now();
        let event = match InboundEvent::parse(&envelope.topic, &envelope.data) {
            Ok(event) => event,
            Err(e) => {
                metrics::counter!("saga_events_handled_total", "event" => "invalid", "outcome" => "rejected")
                    .increment(1);
                tracing::warn!(error = %e, "rejecting malformed event");
                return Err(e);
            }
        };
        let kind = event.kind();
        let key = event.idempotency_key(&envelope.id);

        let result = self.handle_once(&event, &key).await;

        let outcome_label = match &result {
            Ok(outcome) => outcome.as_str(),
            Err(e) if e.is_transient() => "retry",
            Err(_) => "failed",
        };
        metrics::counter!("saga_events_handled_total", "event" => kind, "outcome" => outcome_label)
            .increment(1);
        metrics::histogram!("saga_event_duration_seconds", "event" => kind)
            .record(start.elapsed().as_secs_f64());

        match &result {
            Ok(outcome) => tracing::info!(event = kind, outcome = outcome.as_str(), "event handled"),
            Err(e) => tracing::error!(event = kind, error = %e, "event handling failed"),
        }
        result
    }

    async fn handle_once(&self, event: &InboundEvent, key: &str) -> Result<HandleOutcome> {
        let token = match self.retry.run("begin", || self.store.begin(key)).await? {
            ClaimOutcome::Acquired(token) => token,
            ClaimOutcome::Completed => return Ok(HandleOutcome::Duplicate),
            ClaimOutcome::InProgress => return Err(SagaError::InProgress(key.to_string())),
        };

        match self.dispatch(event).await {
            Ok(outcome) => {
                let recorded = self
                    .retry
                    .run("complete", || self.store.complete(key, token))
                    .await?;
                if !recorded {
                    tracing::warn!(key, "idempotency claim was taken over before completion");
                }
                Ok(outcome)
            }
            Err(e) => {
                match self.retry.run("abandon", || self.store.abandon(key, token)).await {
                    Ok(true) => {}
                    Ok(false) => tracing::debug!(key, "idempotency claim already taken over"),
                    Err(abandon_err) => {
                        tracing::error!(key, error = %abandon_err, "failed to drop idempotency claim")
                    }
                }
                Err(e)
            }
        }
    }

    async fn dispatch(&self, event: &InboundEvent) -> Result<HandleOutcome> {
        match event {
            InboundEvent::ProductVariantCreated(variant) => {
                self.inventory.register_variant(variant.id).await?;
                Ok(HandleOutcome::Processed)
            }
            InboundEvent::OrderCreated(order) => self.on_order_created(order).await,
            InboundEvent::PaymentEnabled(order) => {
                self.advance(order.id, InventoryStatus::InFulfillment).await
            }
            InboundEvent::PaymentFailed(order) => self.release(order.id).await,
            InboundEvent::ShipmentCreated(shipment) => match shipment.order_id {
                Some(order_id) => self.advance(order_id, InventoryStatus::Shipped).await,
                // Return-flow shipment
                None => Ok(HandleOutcome::Ignored),
            },
            InboundEvent::ShipmentStatusUpdated { shipment, status } => {
                match (shipment.order_id, status) {
                    (Some(order_id), ShipmentStatus::Delivered) => {
                        self.advance(order_id, InventoryStatus::Delivered).await
                    }
                    (Some(order_id), ShipmentStatus::Failed) => {
                        self.advance(order_id, InventoryStatus::Lost).await
                    }
                    _ => Ok(HandleOutcome::Ignored),
                }
            }
            InboundEvent::DiscountValidationFailed(payload) => {
                tracing::info!(
                    order_id = %payload.order.id,
                    failing_discounts = payload.failing_discount_ids.len(),
                    "discount validation failed"
                );
                self.release(payload.order.id).await
            }
        }
    }

    async fn advance(&self, order_id: OrderId, status: InventoryStatus) -> Result<HandleOutcome> {
        self.status.advance_order_status(order_id, status).await?;
        Ok(HandleOutcome::Processed)
    }

    async fn release(&self, order_id: OrderId) -> Result<HandleOutcome> {
        self.release.release_batch(order_id).await?;
        Ok(HandleOutcome::Processed)
    }

    /// Reserves every line of a new order, compensating on any failure.
    #[tracing::instrument(skip(self, order), fields(order_id = %order.id))]
    async fn on_order_created(&self, order: &OrderDto) -> Result<HandleOutcome> {
        let request = order.reservation_request()?;

        let linked = self
            .retry
            .run("find_by_order", || self.store.find_by_order(order.id))
            .await?;
        if !linked.is_empty() {
            if linked.iter().any(|u| u.status != InventoryStatus::Reserved) {
                tracing::info!("order already past reservation, skipping");
                return Ok(HandleOutcome::Duplicate);
            }
            if covers(&linked, &request) {
                // An earlier attempt reserved everything but never published
                self.publish(OutboundEvent::ReservationSucceeded {
                    order: order.clone(),
                })
                .await?;
                return Ok(HandleOutcome::Processed);
            }
            tracing::warn!(units = linked.len(), "releasing leftovers of an abandoned reservation");
            self.release.release_batch(order.id).await?;
        }

        let outcome = self.reservation.reserve_order(&request).await;
        if outcome.is_complete() {
            self.publish(OutboundEvent::ReservationSucceeded {
                order: order.clone(),
            })
            .await?;
            return Ok(HandleOutcome::Processed);
        }

        // Undo the lines that did succeed before reporting anything
        self.release.release_batch(order.id).await?;

        let failed_product_variant_ids = outcome.failed_variant_ids();
        if let Some(line) = outcome.failed.into_iter().find(|line| !line.is_shortfall()) {
            return Err(SagaError::Inventory(line.error));
        }

        tracing::info!(failed = ?failed_product_variant_ids, "order reservation failed");
        self.publish(OutboundEvent::ReservationFailed {
            order: order.clone(),
            failed_product_variant_ids,
        })
        .await?;
        Ok(HandleOutcome::Processed)
    }

    async fn publish(&self, event: OutboundEvent) -> Result<()> {
        let topic = event.topic();
        let payload = event.payload()?;
        self.publisher.publish(topic, payload).await?;
        metrics::counter!("saga_events_published_total", "topic" => topic).increment(1);
        Ok(())
    }

    /// Infers the reservation state of an order.
    pub async fn order_state(&self, order_id: OrderId) -> Result<(OrderReservationState, Vec<ProductItem>)> {
        let key = order_created_key(order_id);
        let units = self
            .retry
            .run("find_by_order", || self.store.find_by_order(order_id))
            .await?;
        let creation = self.retry.run("status", || self.store.status(&key)).await?;
        Ok((OrderReservationState::infer(&units, creation), units))
    }
}

/// Returns true if the linked units match the requested counts exactly.
fn covers(linked: &[ProductItem], request: &ReservationRequest) -> bool {
    let mut held: HashMap<VariantId, usize> = HashMap::new();
    for unit in linked {
        *held.entry(unit.variant_id).or_default() += 1;
    }
    let wanted: HashMap<VariantId, usize> = request
        .merged_lines()
        .into_iter()
        .filter(|line| line.count > 0)
        .map(|line| (line.variant_id, line.count))
        .collect();
    held == wanted
}
