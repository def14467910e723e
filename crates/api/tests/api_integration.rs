//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};

use api::config::Config;
use api::{AppState, BackgroundTasks, SharedPublisher};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{OrderId, VariantId};
use item_store::{InMemoryStore, ItemStore};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{InMemoryEventPublisher, topics};
use serde_json::{Value, json};
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

struct TestApp {
    app: axum::Router,
    state: Arc<AppState<InMemoryStore>>,
    store: InMemoryStore,
    publisher: InMemoryEventPublisher,
    background: BackgroundTasks,
}

impl TestApp {
    fn new() -> Self {
        let store = InMemoryStore::new();
        let publisher = InMemoryEventPublisher::new();
        let shared: SharedPublisher = Arc::new(publisher.clone());
        let (state, background) = api::create_state(store.clone(), shared, &Config::default());
        let app = api::create_app(state.clone(), get_metrics_handle());
        Self {
            app,
            state,
            store,
            publisher,
            background,
        }
    }

    async fn request(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_string(&body).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    async fn deliver(&self, route: &str, id: &str, data: Value) -> Value {
        let (status, body) = self
            .request(
                "POST",
                &format!("/events/{route}"),
                Some(json!({ "id": id, "specversion": "1.0", "data": data })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        body["status"].clone()
    }

    async fn variant_with_stock(&self, count: usize) -> VariantId {
        let variant = VariantId::new();
        let status = self
            .deliver(
                "product-variant-created",
                &format!("variant-{variant}"),
                json!({ "id": variant }),
            )
            .await;
        assert_eq!(status, "SUCCESS");

        let (status, _) = self
            .request(
                "POST",
                "/product-items/batch",
                Some(json!({ "productVariantId": variant, "number": count })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        variant
    }
}

#[tokio::test]
async fn test_health_check() {
    let t = TestApp::new();
    let (status, body) = t.request("GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    t.store.set_unavailable(true);
    let (status, body) = t.request("GET", "/health", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["store"], "down");
    t.background.shutdown().await;
}

#[tokio::test]
async fn test_subscription_discovery() {
    let t = TestApp::new();
    let (status, body) = t.request("GET", "/dapr/subscribe", None).await;
    assert_eq!(status, StatusCode::OK);

    let subscriptions = body.as_array().unwrap();
    assert_eq!(subscriptions.len(), 7);
    assert!(subscriptions.iter().all(|s| s["pubsubName"] == "pubsub"));
    assert!(subscriptions.iter().any(|s| {
        s["topic"] == topics::ORDER_CREATED && s["route"] == "/events/order-created"
    }));
    t.background.shutdown().await;
}

#[tokio::test]
async fn test_batch_creation_requires_known_variant() {
    let t = TestApp::new();

    let (status, body) = t
        .request(
            "POST",
            "/product-items/batch",
            Some(json!({ "productVariantId": VariantId::new(), "number": 3 })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().is_some());
    assert_eq!(t.store.item_count().await, 0);

    let variant = t.variant_with_stock(3).await;
    let (status, body) = t
        .request("GET", &format!("/product-items?variantId={variant}"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalCount"], 3);
    assert!(
        body["nodes"]
            .as_array()
            .unwrap()
            .iter()
            .all(|n| n["inventoryStatus"] == "IN_STORAGE")
    );
    t.background.shutdown().await;
}

#[tokio::test]
async fn test_order_created_reserves_and_publishes() {
    let t = TestApp::new();
    let variant = t.variant_with_stock(3).await;
    let order_id = OrderId::new();

    let status = t
        .deliver(
            "order-created",
            "evt-1",
            json!({ "order": { "id": order_id, "orderItems": [{ "productVariantId": variant, "count": 2 }] } }),
        )
        .await;
    assert_eq!(status, "SUCCESS");
    assert_eq!(
        t.publisher.published_to(topics::RESERVATION_SUCCEEDED).await.len(),
        1
    );

    let (status, body) = t
        .request("GET", &format!("/orders/{order_id}/reservation"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "RESERVED");
    assert_eq!(body["items"].as_array().unwrap().len(), 2);

    // Redelivery of the same event changes nothing
    let status = t
        .deliver(
            "order-created",
            "evt-1",
            json!({ "order": { "id": order_id, "orderItems": [{ "productVariantId": variant, "count": 2 }] } }),
        )
        .await;
    assert_eq!(status, "SUCCESS");
    assert_eq!(t.store.find_by_order(order_id).await.unwrap().len(), 2);
    t.background.shutdown().await;
}

#[tokio::test]
async fn test_unknown_order_is_reported_unknown() {
    let t = TestApp::new();
    let (status, body) = t
        .request("GET", &format!("/orders/{}/reservation", OrderId::new()), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "UNKNOWN");

    let (status, _) = t.request("GET", "/orders/not-a-uuid/reservation", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    t.background.shutdown().await;
}

#[tokio::test]
async fn test_delivery_acks() {
    let t = TestApp::new();

    // Payload that can never be handled
    let status = t
        .deliver("payment-enabled", "evt-1", json!({ "order": "nope" }))
        .await;
    assert_eq!(status, "DROP");

    // Body that is not a CloudEvent
    let (status, body) = t
        .request("POST", "/events/payment-enabled", Some(json!({ "data": {} })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "DROP");

    // Store outage asks for redelivery
    t.store.set_unavailable(true);
    let status = t
        .deliver(
            "payment-failed",
            "evt-2",
            json!({ "order": { "id": OrderId::new() } }),
        )
        .await;
    assert_eq!(status, "RETRY");
    t.store.set_unavailable(false);

    let (status, _) = t
        .request("POST", "/events/unknown-route", Some(json!({ "id": "x", "data": {} })))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    t.background.shutdown().await;
}

#[tokio::test]
async fn test_pagination() {
    let t = TestApp::new();
    let variant = t.variant_with_stock(5).await;

    let (status, body) = t
        .request(
            "GET",
            &format!("/product-items?variantId={variant}&skip=1&first=2"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["nodes"].as_array().unwrap().len(), 2);
    assert_eq!(body["totalCount"], 5);
    assert_eq!(body["hasNextPage"], true);

    let (_, asc) = t
        .request("GET", &format!("/product-items?variantId={variant}"), None)
        .await;
    let (_, desc) = t
        .request(
            "GET",
            &format!("/product-items?variantId={variant}&orderBy=ID&direction=DESC"),
            None,
        )
        .await;
    assert_eq!(asc["nodes"][0]["id"], desc["nodes"][4]["id"]);
    assert_eq!(desc["hasNextPage"], false);

    let (status, _) = t
        .request("GET", "/product-items?status=RESERVED", None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = t
        .request("GET", "/product-items?variantId=bogus", None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("variant"));
    t.background.shutdown().await;
}

#[tokio::test]
async fn test_item_administration() {
    let t = TestApp::new();
    let variant = t.variant_with_stock(1).await;
    let (_, page) = t
        .request("GET", &format!("/product-items?variantId={variant}"), None)
        .await;
    let id = page["nodes"][0]["id"].as_str().unwrap().to_string();

    let (status, body) = t.request("GET", &format!("/product-items/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["variantId"], json!(variant));

    // A reserved unit needs an order
    let (status, _) = t
        .request(
            "PATCH",
            &format!("/product-items/{id}"),
            Some(json!({ "inventoryStatus": "RESERVED" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = t
        .request(
            "PATCH",
            &format!("/product-items/{id}"),
            Some(json!({ "inventoryStatus": "RETURNED" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["inventoryStatus"], "RETURNED");

    let (status, _) = t.request("DELETE", &format!("/product-items/{id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = t.request("GET", &format!("/product-items/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = t.request("DELETE", &format!("/product-items/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    assert!(t.state.inventory.find_by_id(id.parse().unwrap()).await.unwrap().is_none());
    t.background.shutdown().await;
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let t = TestApp::new();
    t.variant_with_stock(1).await;

    let (status, _) = t.request("GET", "/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    t.background.shutdown().await;
}
