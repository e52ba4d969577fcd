//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use checkout::{CheckoutError, GatewayError};
use domain::{InsufficientInventory, OrderError, TransferError};
use store::StoreError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed request the handlers reject before reaching a service.
    BadRequest(String),
    /// Missing or unparseable caller identity headers.
    Unauthorized(String),
    /// Checkout service error.
    Checkout(CheckoutError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg),
            ApiError::Checkout(err) => {
                let status = checkout_status(&err);
                if status.is_server_error() {
                    tracing::error!(error = %err, "internal server error");
                }
                (status, err.code(), err.to_string())
            }
        };

        let body = serde_json::json!({ "error": message, "code": code });
        (status, axum::Json(body)).into_response()
    }
}

fn checkout_status(err: &CheckoutError) -> StatusCode {
    match err {
        CheckoutError::Inventory(InsufficientInventory::SoldOut { .. }) => StatusCode::CONFLICT,
        CheckoutError::Inventory(_) => StatusCode::UNPROCESSABLE_ENTITY,
        CheckoutError::Promo(_) => StatusCode::UNPROCESSABLE_ENTITY,
        CheckoutError::Order(order_err) => match order_err {
            OrderError::InvalidTransition { .. }
            | OrderError::CancellationWindowClosed { .. }
            | OrderError::EventCancelled { .. } => StatusCode::CONFLICT,
            _ => StatusCode::UNPROCESSABLE_ENTITY,
        },
        CheckoutError::Transfer(transfer_err) => match transfer_err {
            TransferError::AlreadyPending { .. }
            | TransferError::NotPending { .. }
            | TransferError::Expired { .. } => StatusCode::CONFLICT,
            TransferError::NotHolder { .. } | TransferError::RecipientMismatch { .. } => {
                StatusCode::FORBIDDEN
            }
            TransferError::NoPendingTransfer { .. } => StatusCode::NOT_FOUND,
            TransferError::TicketNotEligible { .. } | TransferError::InvalidRecipient { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
        },
        CheckoutError::Gateway(gateway_err) => match gateway_err {
            GatewayError::GatewayUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Declined { .. } => StatusCode::PAYMENT_REQUIRED,
            GatewayError::InvalidReference { .. } => StatusCode::NOT_FOUND,
        },
        CheckoutError::InvalidCode(_) => StatusCode::UNPROCESSABLE_ENTITY,
        CheckoutError::EntryRejected { .. } => StatusCode::CONFLICT,
        CheckoutError::NotFound { .. } => StatusCode::NOT_FOUND,
        CheckoutError::Forbidden(_) => StatusCode::FORBIDDEN,
        CheckoutError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        CheckoutError::Store(store_err) => match store_err {
            StoreError::StatusConflict { .. }
            | StoreError::Conflict { .. }
            | StoreError::Duplicate { .. } => StatusCode::CONFLICT,
            StoreError::PromoUsageExhausted { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        },
    }
}

impl From<CheckoutError> for ApiError {
    fn from(err: CheckoutError) -> Self {
        ApiError::Checkout(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{OrderId, TicketTypeId};
    use domain::{OrderStatus, PromoError};

    fn status_of(err: CheckoutError) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn test_inventory_and_promo_statuses() {
        let sold_out = CheckoutError::Inventory(InsufficientInventory::SoldOut {
            ticket_type_id: TicketTypeId::new(),
            requested: 1,
            available: 0,
        });
        assert_eq!(status_of(sold_out), StatusCode::CONFLICT);

        let cap = CheckoutError::Inventory(InsufficientInventory::InvalidQuantity {
            ticket_type_id: TicketTypeId::new(),
        });
        assert_eq!(status_of(cap), StatusCode::UNPROCESSABLE_ENTITY);

        let promo = CheckoutError::Promo(PromoError::NotFound {
            code: "NOPE".to_string(),
        });
        assert_eq!(status_of(promo), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_gateway_statuses() {
        let down = CheckoutError::Gateway(GatewayError::GatewayUnavailable("timeout".into()));
        assert_eq!(status_of(down), StatusCode::SERVICE_UNAVAILABLE);

        let declined = CheckoutError::Gateway(GatewayError::Declined {
            reference: "ORD-1".into(),
            reason: "insufficient funds".into(),
        });
        assert_eq!(status_of(declined), StatusCode::PAYMENT_REQUIRED);
    }

    #[test]
    fn test_conflicts_and_internal() {
        let transition = CheckoutError::Order(OrderError::InvalidTransition {
            from: OrderStatus::Completed,
            action: "fail",
        });
        assert_eq!(status_of(transition), StatusCode::CONFLICT);

        let raced = CheckoutError::Store(StoreError::StatusConflict {
            order_id: OrderId::new(),
            expected: OrderStatus::Pending,
            actual: OrderStatus::Failed,
        });
        assert_eq!(status_of(raced), StatusCode::CONFLICT);

        let corrupt = CheckoutError::Store(StoreError::Corrupt("bad row".into()));
        assert_eq!(status_of(corrupt), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
