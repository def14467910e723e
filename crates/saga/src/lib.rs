//! Event-driven reservation saga.
//!
//! Inbound events from the order, payment, shipment and discount services
//! are parsed into [`InboundEvent`]s and handled by the
//! [`SagaOrchestrator`], which drives the inventory engines:
//!
//! 1. An order is created: reserve its lines, publish success or failure
//! 2. Payment is enabled: units go to fulfillment
//! 3. Shipment moves: units are shipped, delivered or lost
//! 4. Payment or discount validation fails: units are released
//!
//! Handlers are idempotent per event. The [`EventConsumer`] runs handlers
//! concurrently and answers every delivery with an [`Ack`]; the
//! [`ReservationReaper`] releases reservations that stopped making progress.

pub mod consumer;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod publisher;
pub mod reaper;
pub mod state;
pub mod topics;

pub use consumer::{Ack, ConsumerConfig, ConsumerHandle, Delivery, EventConsumer, EventSender};
pub use error::SagaError;
pub use events::{InboundEnvelope, InboundEvent, OutboundEvent, ShipmentStatus};
pub use orchestrator::{HandleOutcome, OrchestratorConfig, SagaOrchestrator};
pub use publisher::{EventPublisher, InMemoryEventPublisher, PublishError, PublishedEvent};
pub use reaper::{ReaperConfig, ReaperHandle, ReservationReaper};
pub use state::OrderReservationState;
pub use topics::{SUBSCRIPTIONS, Subscription};
