//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use checkout::payment::webhook::{SIGNATURE_HEADER, sign};
use checkout::{Checkout, CheckoutConfig, InMemoryPaymentGateway, TracingNotifier};
use common::{BuyerId, FixedClock, OrganizerId};
use domain::TicketCodeSigner;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{Value, json};
use store::InMemoryStore;
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
    gateway: InMemoryPaymentGateway,
    organizer: OrganizerId,
}

struct Caller {
    id: BuyerId,
    name: &'static str,
    email: &'static str,
}

impl Caller {
    fn new(name: &'static str, email: &'static str) -> Self {
        Self {
            id: BuyerId::new(),
            name,
            email,
        }
    }
}

fn setup_with_config(config: CheckoutConfig) -> TestApp {
    let gateway = InMemoryPaymentGateway::new();
    let checkout = Checkout::new(
        Arc::new(InMemoryStore::new()),
        Arc::new(gateway.clone()),
        Arc::new(TracingNotifier),
        Arc::new(FixedClock::new(chrono::Utc::now())),
        TicketCodeSigner::new(b"api-test-secret").unwrap(),
        config,
    );
    let app = api::create_app(api::AppState::new(checkout), get_metrics_handle());
    TestApp {
        app,
        gateway,
        organizer: OrganizerId::new(),
    }
}

fn setup() -> TestApp {
    setup_with_config(CheckoutConfig::default())
}

impl TestApp {
    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap_or(Value::Null)
        };
        (status, json)
    }

    async fn as_organizer(&self, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .header("x-organizer-id", self.organizer.to_string())
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    async fn as_buyer(
        &self,
        buyer: &Caller,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-buyer-id", buyer.id.to_string())
            .header("x-buyer-name", buyer.name)
            .header("x-buyer-email", buyer.email);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        };
        self.send(request.unwrap()).await
    }

    async fn post(&self, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method("POST").uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        };
        self.send(request.unwrap()).await
    }

    /// Creates an event with one ticket type and returns their ids.
    async fn seed(&self, is_free: bool, price: i64, quantity: u32) -> (String, String) {
        let event_id = uuid::Uuid::new_v4().to_string();
        let starts_at = chrono::Utc::now() + chrono::Duration::days(14);
        let (status, _) = self
            .as_organizer(
                "PUT",
                &format!("/events/{event_id}"),
                json!({ "name": "Lagos Jazz Festival", "starts_at": starts_at, "is_free": is_free }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, ticket_type) = self
            .as_organizer(
                "POST",
                &format!("/events/{event_id}/ticket-types"),
                json!({
                    "name": "Regular",
                    "unit_price": price,
                    "currency": "NGN",
                    "quantity": quantity,
                    "max_per_order": 5
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        (event_id, ticket_type["id"].as_str().unwrap().to_string())
    }
}

#[tokio::test]
async fn test_health_check() {
    let app = setup();
    let (status, json) = app
        .send(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = setup();
    let response = app
        .app
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
}

#[tokio::test]
async fn test_paid_checkout_and_reconcile() {
    let app = setup();
    let (event_id, ticket_type_id) = app.seed(false, 5_000, 10).await;
    let ada = Caller::new("Ada", "ada@example.com");

    let (status, types) = app
        .send(
            Request::builder()
                .uri(format!("/events/{event_id}/ticket-types"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(types[0]["status"], "on_sale");
    assert_eq!(types[0]["remaining"], 10);

    let (status, created) = app
        .as_buyer(
            &ada,
            "POST",
            &format!("/events/{event_id}/orders"),
            Some(json!({ "items": [{ "ticket_type_id": ticket_type_id, "quantity": 2 }] })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["order"]["status"], "PENDING");
    assert_eq!(created["order"]["totals"]["total"], 10_000);
    let reference = created["payment"]["reference"].as_str().unwrap().to_string();
    let order_id = created["order"]["id"].as_str().unwrap().to_string();

    let (status, order) = app
        .post(&format!("/payments/{reference}/reconcile"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["status"], "PENDING");

    app.gateway.succeed(&reference);
    let (status, order) = app
        .post(&format!("/payments/{reference}/reconcile"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["status"], "COMPLETED");

    let (status, tickets) = app
        .as_buyer(&ada, "GET", &format!("/orders/{order_id}/tickets"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tickets.as_array().unwrap().len(), 2);

    let (status, events) = app
        .as_buyer(&ada, "GET", &format!("/orders/{order_id}/events"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(events.as_array().unwrap().len(), 3);

    let stranger = Caller::new("Eve", "eve@example.com");
    let (status, body) = app
        .as_buyer(&stranger, "GET", &format!("/orders/{order_id}"), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "forbidden");
}

#[tokio::test]
async fn test_missing_identity_is_unauthorized() {
    let app = setup();
    let (event_id, ticket_type_id) = app.seed(false, 5_000, 10).await;
    let (status, body) = app
        .post(
            &format!("/events/{event_id}/orders"),
            Some(json!({ "items": [{ "ticket_type_id": ticket_type_id, "quantity": 1 }] })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unauthorized");
}

#[tokio::test]
async fn test_sold_out_is_conflict() {
    let app = setup();
    let (event_id, ticket_type_id) = app.seed(false, 5_000, 1).await;
    let items = json!({ "items": [{ "ticket_type_id": ticket_type_id, "quantity": 1 }] });

    let (status, _) = app
        .as_buyer(
            &Caller::new("Ada", "ada@example.com"),
            "POST",
            &format!("/events/{event_id}/orders"),
            Some(items.clone()),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app
        .as_buyer(
            &Caller::new("Bola", "bola@example.com"),
            "POST",
            &format!("/events/{event_id}/orders"),
            Some(items),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "sold_out");
}

#[tokio::test]
async fn test_idempotency_key_header_replays_order() {
    let app = setup();
    let (event_id, ticket_type_id) = app.seed(false, 5_000, 10).await;
    let ada = Caller::new("Ada", "ada@example.com");

    let request = || {
        Request::builder()
            .method("POST")
            .uri(format!("/events/{event_id}/orders"))
            .header("content-type", "application/json")
            .header("x-buyer-id", ada.id.to_string())
            .header("x-buyer-email", ada.email)
            .header("idempotency-key", "retry-safe-1")
            .body(Body::from(
                json!({ "items": [{ "ticket_type_id": ticket_type_id, "quantity": 1 }] })
                    .to_string(),
            ))
            .unwrap()
    };

    let (status, first) = app.send(request()).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, second) = app.send(request()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["order"]["id"], second["order"]["id"]);
    assert_eq!(second["replayed"], true);
}

#[tokio::test]
async fn test_promo_validation() {
    let app = setup();
    let (event_id, ticket_type_id) = app.seed(false, 5_000, 10).await;

    let (status, _) = app
        .as_organizer(
            "POST",
            &format!("/events/{event_id}/promo-codes"),
            json!({ "code": "SAVE10", "discount": { "kind": "PERCENTAGE", "value": 10 }, "usage_limit": 1 }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, discount) = app
        .post(
            &format!("/events/{event_id}/promo-codes/validate"),
            Some(json!({
                "code": "save10",
                "items": [{ "ticket_type_id": ticket_type_id, "quantity": 2 }],
                "subtotal": 1
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(discount["amount"], 1_000);
    assert_eq!(discount["code"], "SAVE10");

    let (status, body) = app
        .post(
            &format!("/events/{event_id}/promo-codes/validate"),
            Some(json!({
                "code": "NOPE",
                "items": [{ "ticket_type_id": ticket_type_id, "quantity": 2 }]
            })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "promo_not_found");
}

#[tokio::test]
async fn test_catalog_requires_owning_organizer() {
    let app = setup();
    let (event_id, ticket_type_id) = app.seed(false, 5_000, 10).await;

    let (status, body) = app
        .send(
            Request::builder()
                .method("POST")
                .uri(format!("/ticket-types/{ticket_type_id}/restock"))
                .header("content-type", "application/json")
                .header("x-organizer-id", OrganizerId::new().to_string())
                .body(Body::from(json!({ "quantity": 1 }).to_string()))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "forbidden");

    let (status, _) = app
        .as_organizer(
            "PUT",
            &format!("/events/{event_id}"),
            json!({ "name": "", "starts_at": chrono::Utc::now() }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_webhook_signature() {
    let app = setup_with_config(CheckoutConfig {
        webhook_secret: Some("whsec_api".to_string()),
        ..CheckoutConfig::default()
    });
    let (event_id, ticket_type_id) = app.seed(false, 2_500, 10).await;
    let (_, created) = app
        .as_buyer(
            &Caller::new("Ada", "ada@example.com"),
            "POST",
            &format!("/events/{event_id}/orders"),
            Some(json!({ "items": [{ "ticket_type_id": ticket_type_id, "quantity": 1 }] })),
        )
        .await;
    let reference = created["payment"]["reference"].as_str().unwrap().to_string();
    app.gateway.succeed(&reference);

    let body = json!({ "event": "charge.success", "data": { "reference": reference } }).to_string();
    let webhook = |signature: &str| {
        Request::builder()
            .method("POST")
            .uri("/payments/webhook")
            .header("content-type", "application/json")
            .header(SIGNATURE_HEADER, signature)
            .body(Body::from(body.clone()))
            .unwrap()
    };

    let (status, _) = app.send(webhook("bogus")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, order) = app.send(webhook(&sign("whsec_api", body.as_bytes()))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["status"], "COMPLETED");
}

#[tokio::test]
async fn test_free_order_transfer_and_check_in() {
    let app = setup();
    let (event_id, ticket_type_id) = app.seed(true, 0, 10).await;
    let ada = Caller::new("Ada", "ada@example.com");
    let friend = Caller::new("Friend", "friend@example.com");

    let (status, created) = app
        .as_buyer(
            &ada,
            "POST",
            &format!("/events/{event_id}/orders"),
            Some(json!({ "items": [{ "ticket_type_id": ticket_type_id, "quantity": 1 }] })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["order"]["status"], "COMPLETED");
    assert!(created["payment"].is_null());
    let ticket_id = created["tickets"][0]["id"].as_str().unwrap().to_string();

    let (status, transfer) = app
        .as_buyer(
            &ada,
            "POST",
            &format!("/tickets/{ticket_id}/transfer"),
            Some(json!({ "recipient_email": "friend@example.com" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(transfer["status"], "PENDING");

    let (status, body) = app
        .as_buyer(
            &ada,
            "POST",
            &format!("/tickets/{ticket_id}/transfer"),
            Some(json!({ "recipient_email": "other@example.com" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "transfer_already_pending");

    let transfer_id = transfer["id"].as_str().unwrap();
    let (status, accepted) = app
        .as_buyer(
            &friend,
            "POST",
            &format!("/transfers/{transfer_id}/accept"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(accepted["transfer"]["status"], "ACCEPTED");
    assert_eq!(accepted["ticket"]["attendee_email"], "friend@example.com");

    let code = accepted["ticket"]["code"].as_str().unwrap().to_string();
    let (status, verification) = app
        .send(
            Request::builder()
                .uri(format!("/tickets/verify/{code}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(verification["valid"], true);

    let (status, ticket) = app
        .post("/tickets/check-in", Some(json!({ "code": code })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ticket["status"], "USED");

    let (status, body) = app
        .post("/tickets/check-in", Some(json!({ "code": code })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "already_checked_in");
}

#[tokio::test]
async fn test_cancel_and_refund_authorization() {
    let app = setup();
    let (event_id, ticket_type_id) = app.seed(true, 0, 10).await;
    let ada = Caller::new("Ada", "ada@example.com");
    let items = json!({ "items": [{ "ticket_type_id": ticket_type_id, "quantity": 1 }] });

    let (_, first) = app
        .as_buyer(&ada, "POST", &format!("/events/{event_id}/orders"), Some(items.clone()))
        .await;
    let first_id = first["order"]["id"].as_str().unwrap().to_string();

    let (status, _) = app
        .as_buyer(
            &Caller::new("Eve", "eve@example.com"),
            "POST",
            &format!("/orders/{first_id}/cancel"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, order) = app
        .as_buyer(
            &ada,
            "POST",
            &format!("/orders/{first_id}/cancel"),
            Some(json!({ "reason": "plans changed" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["status"], "CANCELLED");

    let (_, second) = app
        .as_buyer(&ada, "POST", &format!("/events/{event_id}/orders"), Some(items))
        .await;
    let second_id = second["order"]["id"].as_str().unwrap().to_string();

    let (status, _) = app
        .as_buyer(&ada, "POST", &format!("/orders/{second_id}/refund"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, order) = app
        .as_organizer("POST", &format!("/orders/{second_id}/refund"), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["status"], "REFUNDED");

    let (status, body) = app
        .as_organizer("POST", &format!("/orders/{second_id}/refund"), json!({}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "invalid_transition");
}
