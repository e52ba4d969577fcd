//! Ticket transfer and check-in endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use checkout::{AcceptedTransfer, Verification};
use common::{TicketId, TransferId};
use domain::{Ticket, TicketTransfer};
use serde::Deserialize;

use crate::AppState;
use crate::error::ApiError;
use crate::extract::CurrentBuyer;

#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    pub recipient_email: String,
}

#[derive(Debug, Deserialize)]
pub struct CheckInRequest {
    pub code: String,
}

/// GET /tickets/{id}
#[tracing::instrument(skip(state, buyer))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    CurrentBuyer(buyer): CurrentBuyer,
    Path(ticket_id): Path<TicketId>,
) -> Result<Json<Ticket>, ApiError> {
    Ok(Json(state.checkout.tickets.get_ticket(ticket_id, buyer.id).await?))
}

/// POST /tickets/{id}/transfer — offer the ticket to another email.
#[tracing::instrument(skip(state, buyer, req))]
pub async fn initiate_transfer(
    State(state): State<Arc<AppState>>,
    CurrentBuyer(buyer): CurrentBuyer,
    Path(ticket_id): Path<TicketId>,
    Json(req): Json<TransferRequest>,
) -> Result<(StatusCode, Json<TicketTransfer>), ApiError> {
    let transfer = state
        .checkout
        .tickets
        .initiate_transfer(ticket_id, buyer.id, &req.recipient_email)
        .await?;
    Ok((StatusCode::CREATED, Json(transfer)))
}

/// DELETE /tickets/{id}/transfer — withdraw the pending transfer.
#[tracing::instrument(skip(state, buyer))]
pub async fn cancel_transfer(
    State(state): State<Arc<AppState>>,
    CurrentBuyer(buyer): CurrentBuyer,
    Path(ticket_id): Path<TicketId>,
) -> Result<Json<TicketTransfer>, ApiError> {
    Ok(Json(
        state
            .checkout
            .tickets
            .cancel_transfer(ticket_id, buyer.id)
            .await?,
    ))
}

/// POST /transfers/{id}/accept — claim a transfer addressed to the caller.
#[tracing::instrument(skip(state, buyer))]
pub async fn accept_transfer(
    State(state): State<Arc<AppState>>,
    CurrentBuyer(buyer): CurrentBuyer,
    Path(transfer_id): Path<TransferId>,
) -> Result<Json<AcceptedTransfer>, ApiError> {
    Ok(Json(
        state
            .checkout
            .tickets
            .accept_transfer(transfer_id, &buyer)
            .await?,
    ))
}

/// GET /tickets/verify/{code} — read-only check for scanners.
#[tracing::instrument(skip_all)]
pub async fn verify(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<Json<Verification>, ApiError> {
    Ok(Json(state.checkout.tickets.verify_code(&code).await?))
}

/// POST /tickets/check-in — admit the holder, marking the ticket USED.
#[tracing::instrument(skip_all)]
pub async fn check_in(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CheckInRequest>,
) -> Result<Json<Ticket>, ApiError> {
    Ok(Json(state.checkout.tickets.check_in(&req.code).await?))
}
