//! Checkout and order lifecycle endpoints.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use checkout::{Actor, CheckoutOutcome, CreateOrder, LineRequest, PaymentIntent};
use common::{EventId, OrderId};
use domain::{Attendee, Order, Ticket};
use serde::Deserialize;
use store::RecordedEvent;

use super::optional_reason;
use crate::AppState;
use crate::error::ApiError;
use crate::extract::{Caller, CurrentBuyer, CurrentOrganizer, IdempotencyKey};

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub items: Vec<LineRequest>,
    #[serde(default)]
    pub promo_code: Option<String>,
    /// Takes precedence over the `Idempotency-Key` header.
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub attendee: Option<Attendee>,
}

// -- Handlers --

/// POST /events/{event_id}/orders — reserve seats and open payment.
///
/// Answers 201 for a new order and 200 when an idempotency key replays an
/// earlier one.
#[tracing::instrument(skip(state, buyer, header_key, req), fields(buyer_id = %buyer.id))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    CurrentBuyer(buyer): CurrentBuyer,
    IdempotencyKey(header_key): IdempotencyKey,
    Path(event_id): Path<EventId>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<CheckoutOutcome>), ApiError> {
    let outcome = state
        .checkout
        .orders
        .create_order(CreateOrder {
            event_id,
            buyer,
            lines: req.items,
            promo_code: req.promo_code.filter(|c| !c.trim().is_empty()),
            attendee: req.attendee,
            idempotency_key: req.idempotency_key.or(header_key),
        })
        .await?;

    let status = if outcome.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(outcome)))
}

/// GET /orders/{id}
#[tracing::instrument(skip(state, buyer))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    CurrentBuyer(buyer): CurrentBuyer,
    Path(order_id): Path<OrderId>,
) -> Result<Json<Order>, ApiError> {
    Ok(Json(state.checkout.orders.get_order(order_id, buyer.id).await?))
}

/// GET /orders/{id}/events — the order's audit history.
#[tracing::instrument(skip(state, buyer))]
pub async fn events(
    State(state): State<Arc<AppState>>,
    CurrentBuyer(buyer): CurrentBuyer,
    Path(order_id): Path<OrderId>,
) -> Result<Json<Vec<RecordedEvent>>, ApiError> {
    Ok(Json(
        state.checkout.orders.order_events(order_id, buyer.id).await?,
    ))
}

/// GET /orders/{id}/tickets
#[tracing::instrument(skip(state, buyer))]
pub async fn tickets(
    State(state): State<Arc<AppState>>,
    CurrentBuyer(buyer): CurrentBuyer,
    Path(order_id): Path<OrderId>,
) -> Result<Json<Vec<Ticket>>, ApiError> {
    Ok(Json(state.checkout.orders.tickets(order_id, buyer.id).await?))
}

/// POST /orders/{id}/retry-payment — opens a fresh payment intent.
#[tracing::instrument(skip(state, buyer))]
pub async fn retry_payment(
    State(state): State<Arc<AppState>>,
    CurrentBuyer(buyer): CurrentBuyer,
    Path(order_id): Path<OrderId>,
) -> Result<Json<PaymentIntent>, ApiError> {
    Ok(Json(
        state.checkout.orders.retry_payment(order_id, buyer.id).await?,
    ))
}

/// POST /orders/{id}/cancel — by the buyer or the event's organizer.
#[tracing::instrument(skip(state, body))]
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Caller(actor): Caller,
    Path(order_id): Path<OrderId>,
    body: Bytes,
) -> Result<Json<Order>, ApiError> {
    let reason = optional_reason(&body)?;
    Ok(Json(
        state
            .checkout
            .orders
            .cancel_order(order_id, actor, reason)
            .await?,
    ))
}

/// POST /orders/{id}/refund — organizer only.
#[tracing::instrument(skip(state, body))]
pub async fn refund(
    State(state): State<Arc<AppState>>,
    CurrentOrganizer(organizer): CurrentOrganizer,
    Path(order_id): Path<OrderId>,
    body: Bytes,
) -> Result<Json<Order>, ApiError> {
    let reason = optional_reason(&body)?;
    Ok(Json(
        state
            .checkout
            .orders
            .refund_order(order_id, Actor::Organizer(organizer), reason)
            .await?,
    ))
}
