//! Checkout error types.

use domain::{
    CodeError, EntryRejection, InsufficientInventory, OrderError, PromoError, TransferError,
};
use store::StoreError;
use thiserror::Error;

use crate::payment::GatewayError;

/// Errors that can occur in checkout services.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// Capacity, sale window or per-order cap refused the request.
    #[error(transparent)]
    Inventory(#[from] InsufficientInventory),

    /// The promo code was rejected.
    #[error(transparent)]
    Promo(#[from] PromoError),

    /// Order validation or state machine error.
    #[error(transparent)]
    Order(#[from] OrderError),

    /// Ticket transfer error.
    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// Payment gateway error.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// A presented ticket code failed verification.
    #[error("invalid ticket code: {0}")]
    InvalidCode(#[from] CodeError),

    /// A valid code that must not be admitted.
    #[error("ticket {ticket_number} rejected: {}", reason.as_str())]
    EntryRejected {
        ticket_number: String,
        reason: EntryRejection,
    },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The caller does not own the resource.
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("validation failed: {0}")]
    Validation(String),

    /// Store error.
    #[error(transparent)]
    Store(StoreError),
}

impl CheckoutError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        CheckoutError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            CheckoutError::Inventory(err) => err.code(),
            CheckoutError::Promo(err) => err.code(),
            CheckoutError::Order(err) => err.code(),
            CheckoutError::Transfer(err) => err.code(),
            CheckoutError::Gateway(err) => err.code(),
            CheckoutError::InvalidCode(_) => "invalid_ticket_code",
            CheckoutError::EntryRejected { reason, .. } => reason.as_str(),
            CheckoutError::NotFound { .. } => "not_found",
            CheckoutError::Forbidden(_) => "forbidden",
            CheckoutError::Validation(_) => "validation_error",
            CheckoutError::Store(StoreError::StatusConflict { .. }) => "status_conflict",
            CheckoutError::Store(StoreError::Conflict { .. }) => "conflict",
            CheckoutError::Store(StoreError::Duplicate { .. }) => "duplicate",
            CheckoutError::Store(StoreError::PromoUsageExhausted { .. }) => {
                "promo_usage_limit_reached"
            }
            CheckoutError::Store(_) => "internal_error",
        }
    }
}

impl From<StoreError> for CheckoutError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Inventory(err) => CheckoutError::Inventory(err),
            StoreError::NotFound { entity, id } => CheckoutError::NotFound { entity, id },
            StoreError::TransferAlreadyPending { ticket_id } => {
                CheckoutError::Transfer(TransferError::AlreadyPending { ticket_id })
            }
            other => CheckoutError::Store(other),
        }
    }
}

/// Convenience type alias for checkout results.
pub type Result<T> = std::result::Result<T, CheckoutError>;
