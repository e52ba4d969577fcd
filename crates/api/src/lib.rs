//! HTTP API server with observability for the ticketing core.
//!
//! Exposes catalog sync, checkout, payment reconciliation, transfers and
//! check-in over REST, with structured logging (tracing) and Prometheus
//! metrics.

pub mod config;
pub mod error;
pub mod extract;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use checkout::Checkout;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub checkout: Checkout,
}

impl AppState {
    pub fn new(checkout: Checkout) -> Arc<Self> {
        Arc::new(Self { checkout })
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    use routes::{catalog, ops, orders, payments, tickets};

    let metrics_router = Router::new()
        .route("/metrics", get(ops::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(ops::health))
        // Catalog
        .route("/events/{event_id}", put(catalog::upsert_event))
        .route(
            "/events/{event_id}/ticket-types",
            get(catalog::list_ticket_types).post(catalog::create_ticket_type),
        )
        .route(
            "/events/{event_id}/promo-codes",
            post(catalog::create_promo_code),
        )
        .route(
            "/events/{event_id}/promo-codes/validate",
            post(catalog::validate_promo_code),
        )
        .route("/ticket-types/{id}/restock", post(catalog::restock))
        // Orders
        .route("/events/{event_id}/orders", post(orders::create))
        .route("/orders/{id}", get(orders::get))
        .route("/orders/{id}/events", get(orders::events))
        .route("/orders/{id}/tickets", get(orders::tickets))
        .route("/orders/{id}/retry-payment", post(orders::retry_payment))
        .route("/orders/{id}/cancel", post(orders::cancel))
        .route("/orders/{id}/refund", post(orders::refund))
        // Payments
        .route("/payments/webhook", post(payments::webhook))
        .route("/payments/{reference}/reconcile", post(payments::reconcile))
        // Tickets
        .route("/tickets/check-in", post(tickets::check_in))
        .route("/tickets/verify/{code}", get(tickets::verify))
        .route("/tickets/{id}", get(tickets::get))
        .route(
            "/tickets/{id}/transfer",
            post(tickets::initiate_transfer).delete(tickets::cancel_transfer),
        )
        .route("/transfers/{id}/accept", post(tickets::accept_transfer))
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
