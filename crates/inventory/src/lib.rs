//! Inventory engines over the item store.
//!
//! This crate provides:
//! - `InventoryService` for gated batch creation and administrative edits
//! - `ReservationEngine` for claiming stock per variant and per order
//! - `ReleaseEngine` for compensating reservations
//! - `StatusPropagator` for advancing an order's units through fulfillment
//!
//! Every engine retries transient store errors per its `RetryPolicy`.

pub mod error;
pub mod release;
pub mod reservation;
pub mod retry;
pub mod service;
pub mod status;

pub use error::{InventoryError, Result};
pub use release::ReleaseEngine;
pub use reservation::{
    FailedLine, OrderReservation, ReservationConfig, ReservationEngine, ReservationLine,
    ReservationRequest, ReservedLine,
};
pub use retry::RetryPolicy;
pub use service::InventoryService;
pub use status::{StatusPropagator, TransitionPolicy};
