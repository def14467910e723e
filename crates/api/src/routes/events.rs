//! Pub/sub delivery endpoints called by the Dapr sidecar.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use item_store::Store;
use saga::{Ack, InboundEnvelope, SUBSCRIPTIONS, topics};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::AppState;
use crate::error::ApiError;

/// One entry of the programmatic subscription list.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionResponse {
    pub pubsub_name: String,
    pub topic: &'static str,
    pub route: String,
}

/// A CloudEvent as delivered by the sidecar. Only the fields used here.
#[derive(Debug, Deserialize)]
pub struct CloudEvent {
    pub id: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Serialize)]
pub struct DeliveryResponse {
    pub status: Ack,
}

/// GET /dapr/subscribe: topics this service consumes and where to deliver them.
pub async fn subscribe<S: Store>(
    State(state): State<Arc<AppState<S>>>,
) -> Json<Vec<SubscriptionResponse>> {
    let subscriptions = SUBSCRIPTIONS
        .iter()
        .map(|s| SubscriptionResponse {
            pubsub_name: state.pubsub_name.clone(),
            topic: s.topic,
            route: format!("/events/{}", s.route),
        })
        .collect();
    Json(subscriptions)
}

/// POST /events/:route: hands one delivery to the event consumer.
///
/// Always answers 200 for a known route; the body's `status` tells the
/// sidecar whether to forget, redeliver or drop the event.
#[tracing::instrument(skip(state, body))]
pub async fn deliver<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Path(route): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<DeliveryResponse>, ApiError> {
    let topic = topics::topic_for_route(&route)
        .ok_or_else(|| ApiError::NotFound(format!("No subscription for route {route}")))?;

    let event: CloudEvent = match serde_json::from_value(body) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(%topic, error = %e, "dropping delivery that is not a CloudEvent");
            return Ok(Json(DeliveryResponse { status: Ack::Drop }));
        }
    };

    let envelope = InboundEnvelope::new(event.id, topic, unwrap_string_data(event.data));
    let status = state.events.deliver(envelope).await;
    metrics::counter!("http_event_deliveries_total", "topic" => topic, "status" => ack_label(status))
        .increment(1);
    Ok(Json(DeliveryResponse { status }))
}

fn ack_label(ack: Ack) -> &'static str {
    match ack {
        Ack::Success => "success",
        Ack::Retry => "retry",
        Ack::Drop => "drop",
    }
}

/// Payloads published as text arrive as a JSON string holding the document.
fn unwrap_string_data(data: Value) -> Value {
    match data {
        Value::String(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
        other => other,
    }
}
