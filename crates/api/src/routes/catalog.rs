//! Catalog sync for the organizer service, plus the public ticket-type list.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use checkout::{CheckoutError, LineRequest, NewPromoCode, NewTicketType, TicketTypeView};
use common::{EventId, TicketTypeId};
use domain::{Discount, EventInfo, PromoCode, TicketType};
use serde::Deserialize;

use crate::AppState;
use crate::error::ApiError;
use crate::extract::CurrentOrganizer;

#[derive(Debug, Deserialize)]
pub struct UpsertEventRequest {
    pub name: String,
    pub starts_at: DateTime<Utc>,
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default)]
    pub is_free: bool,
}

/// Promo validation request. A client-supplied `subtotal` is accepted but
/// ignored; the discount is always computed from catalog prices.
#[derive(Debug, Deserialize)]
pub struct ValidatePromoRequest {
    pub code: String,
    pub items: Vec<LineRequest>,
}

#[derive(Debug, Deserialize)]
pub struct RestockRequest {
    pub quantity: u32,
}

/// PUT /events/{event_id} — create or replace event metadata.
#[tracing::instrument(skip(state, req))]
pub async fn upsert_event(
    State(state): State<Arc<AppState>>,
    CurrentOrganizer(organizer): CurrentOrganizer,
    Path(event_id): Path<EventId>,
    Json(req): Json<UpsertEventRequest>,
) -> Result<Json<EventInfo>, ApiError> {
    match state.checkout.catalog.owned_event(event_id, organizer).await {
        Ok(_) | Err(CheckoutError::NotFound { .. }) => {}
        Err(e) => return Err(e.into()),
    }

    let event = state
        .checkout
        .catalog
        .upsert_event(EventInfo {
            id: event_id,
            organizer_id: organizer,
            name: req.name,
            starts_at: req.starts_at,
            ends_at: req.ends_at,
            cancelled: req.cancelled,
            is_free: req.is_free,
        })
        .await?;
    Ok(Json(event))
}

/// GET /events/{event_id}/ticket-types — ticket types with derived sale status.
#[tracing::instrument(skip(state))]
pub async fn list_ticket_types(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<EventId>,
) -> Result<Json<Vec<TicketTypeView>>, ApiError> {
    Ok(Json(
        state.checkout.catalog.list_ticket_types(event_id).await?,
    ))
}

/// POST /events/{event_id}/ticket-types
#[tracing::instrument(skip(state, req))]
pub async fn create_ticket_type(
    State(state): State<Arc<AppState>>,
    CurrentOrganizer(organizer): CurrentOrganizer,
    Path(event_id): Path<EventId>,
    Json(req): Json<NewTicketType>,
) -> Result<(StatusCode, Json<TicketType>), ApiError> {
    state.checkout.catalog.owned_event(event_id, organizer).await?;
    let ticket_type = state
        .checkout
        .catalog
        .create_ticket_type(event_id, req)
        .await?;
    Ok((StatusCode::CREATED, Json(ticket_type)))
}

/// POST /events/{event_id}/promo-codes
#[tracing::instrument(skip(state, req))]
pub async fn create_promo_code(
    State(state): State<Arc<AppState>>,
    CurrentOrganizer(organizer): CurrentOrganizer,
    Path(event_id): Path<EventId>,
    Json(req): Json<NewPromoCode>,
) -> Result<(StatusCode, Json<PromoCode>), ApiError> {
    state.checkout.catalog.owned_event(event_id, organizer).await?;
    let promo = state
        .checkout
        .catalog
        .create_promo_code(event_id, req)
        .await?;
    Ok((StatusCode::CREATED, Json(promo)))
}

/// POST /events/{event_id}/promo-codes/validate — price a basket with a code.
#[tracing::instrument(skip(state, req))]
pub async fn validate_promo_code(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<EventId>,
    Json(req): Json<ValidatePromoRequest>,
) -> Result<Json<Discount>, ApiError> {
    let discount = state
        .checkout
        .promos
        .validate(event_id, &req.code, &req.items)
        .await?;
    Ok(Json(discount))
}

/// POST /ticket-types/{id}/restock — returns released seats to sale.
#[tracing::instrument(skip(state))]
pub async fn restock(
    State(state): State<Arc<AppState>>,
    CurrentOrganizer(organizer): CurrentOrganizer,
    Path(ticket_type_id): Path<TicketTypeId>,
    Json(req): Json<RestockRequest>,
) -> Result<Json<TicketType>, ApiError> {
    let ticket_type = state.checkout.catalog.get_ticket_type(ticket_type_id).await?;
    state
        .checkout
        .catalog
        .owned_event(ticket_type.event_id, organizer)
        .await?;
    let ticket_type = state
        .checkout
        .inventory
        .restock(ticket_type_id, req.quantity)
        .await?;
    Ok(Json(ticket_type))
}
