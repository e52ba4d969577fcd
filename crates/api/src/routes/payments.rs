//! Payment reconciliation endpoints.
//!
//! The buyer poll and the gateway callback share one reconcile path; the
//! outcome is always re-read from the gateway.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use checkout::payment::webhook::SIGNATURE_HEADER;
use domain::Order;

use crate::AppState;
use crate::error::ApiError;

/// POST /payments/{reference}/reconcile — buyer poll after the redirect.
#[tracing::instrument(skip(state))]
pub async fn reconcile(
    State(state): State<Arc<AppState>>,
    Path(reference): Path<String>,
) -> Result<Json<Order>, ApiError> {
    Ok(Json(state.checkout.reconciler.reconcile(&reference).await?))
}

/// POST /payments/webhook — gateway callback.
#[tracing::instrument(skip_all)]
pub async fn webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Order>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    Ok(Json(
        state
            .checkout
            .reconciler
            .handle_webhook(&body, signature)
            .await?,
    ))
}
