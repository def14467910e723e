//! HTTP service for the inventory reservation saga.
//!
//! Receives pub/sub deliveries from the Dapr sidecar and hands them to the
//! saga's event consumer, exposes product items for querying and
//! administration, and serves health and Prometheus metrics.

pub mod config;
pub mod error;
pub mod publisher;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use inventory::{InventoryService, RetryPolicy};
use item_store::Store;
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{
    ConsumerConfig, ConsumerHandle, EventConsumer, EventPublisher, EventSender,
    OrchestratorConfig, ReaperHandle, ReservationReaper, SagaOrchestrator,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;

/// Publisher shared by every handler, chosen at startup.
pub type SharedPublisher = Arc<dyn EventPublisher>;

/// Shared application state accessible from all handlers.
pub struct AppState<S: Store> {
    pub inventory: InventoryService<S>,
    pub orchestrator: Arc<SagaOrchestrator<S, SharedPublisher>>,
    pub events: EventSender,
    pub pubsub_name: String,
}

/// Background tasks owned by the service.
pub struct BackgroundTasks {
    consumer: ConsumerHandle,
    reaper: ReaperHandle,
}

impl BackgroundTasks {
    /// Stops the reaper, then drains the consumer.
    pub async fn shutdown(self) {
        self.reaper.stop();
        self.consumer.shutdown().await;
    }
}

/// Creates the application router with all routes and shared state.
pub fn create_app<S: Store>(state: Arc<AppState<S>>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<S>))
        .route("/dapr/subscribe", get(routes::events::subscribe::<S>))
        .route("/events/{route}", post(routes::events::deliver::<S>))
        .route("/product-items", get(routes::items::list::<S>))
        .route("/product-items/batch", post(routes::items::create_batch::<S>))
        .route(
            "/product-items/{id}",
            get(routes::items::get::<S>)
                .patch(routes::items::update::<S>)
                .delete(routes::items::delete::<S>),
        )
        .route("/orders/{id}/reservation", get(routes::orders::reservation::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Wires the engines, the event consumer and the reservation reaper over
/// `store`, and starts the background tasks.
pub fn create_state<S: Store>(
    store: S,
    publisher: SharedPublisher,
    config: &Config,
) -> (Arc<AppState<S>>, BackgroundTasks) {
    let retry = RetryPolicy::default().with_max_retries(config.store_retry_attempts);
    let orchestrator = Arc::new(SagaOrchestrator::with_config(
        store.clone(),
        publisher,
        OrchestratorConfig::default().with_retry(retry),
    ));

    let consumer = EventConsumer::new(
        orchestrator.clone(),
        ConsumerConfig {
            max_in_flight: config.max_in_flight_events,
            ..ConsumerConfig::default()
        },
    )
    .start();

    let reaper = ReservationReaper::with_retry(store.clone(), config.reservation_timeout, retry)
        .spawn(config.reaper_interval);

    let state = Arc::new(AppState {
        inventory: InventoryService::with_retry(store, retry),
        orchestrator,
        events: consumer.sender(),
        pubsub_name: config.pubsub_name.clone(),
    });

    (state, BackgroundTasks { consumer, reaper })
}
