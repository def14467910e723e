//! Persistence for individually addressable product items.
//!
//! Three storage concerns live here, each behind an async trait with an
//! in-memory and a PostgreSQL implementation:
//! - [`ItemStore`]: product items and the `update_where` claim primitive
//! - [`VariantRegistry`]: known catalog variants
//! - [`IdempotencyStore`]: processed-event keys for at-least-once delivery

pub mod error;
pub mod idempotency;
pub mod item;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod store;
pub mod variant;

pub use common::{OrderId, ProductItemId, VariantId};
pub use error::{Result, StoreError};
pub use idempotency::{ClaimOutcome, ClaimToken, IdempotencyStore, KeyStatus};
pub use item::{InventoryStatus, ItemUpdate, ProductItem, StatusChange, StatusParseError};
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use query::{DEFAULT_PAGE_SIZE, ItemFilter, ItemOrder, ItemQuery, OrderField, Page, SortDirection};
pub use store::{ItemStore, ItemStoreExt, Store};
pub use variant::VariantRegistry;
