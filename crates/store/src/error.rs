use common::{OrderId, PromoCodeId, TicketId};
use domain::{InsufficientInventory, OrderStatus, UnknownStatus};
use thiserror::Error;

/// Errors that can occur when interacting with the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A conditional inventory update was refused.
    #[error(transparent)]
    Inventory(#[from] InsufficientInventory),

    /// A conditional promo usage increment was refused.
    #[error("promo code {promo_code_id} has no remaining uses")]
    PromoUsageExhausted { promo_code_id: PromoCodeId },

    /// The order was not in the status the transition expected.
    #[error("order {order_id} is {actual}, expected {expected}")]
    StatusConflict {
        order_id: OrderId,
        expected: OrderStatus,
        actual: OrderStatus,
    },

    /// A row changed between read and guarded write.
    #[error("{entity} {id} was modified concurrently")]
    Conflict { entity: &'static str, id: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} already exists: {key}")]
    Duplicate { entity: &'static str, key: String },

    #[error("ticket {ticket_id} already has a pending transfer")]
    TransferAlreadyPending { ticket_id: TicketId },

    /// A persisted value could not be decoded.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub(crate) fn conflict(entity: &'static str, id: impl ToString) -> Self {
        StoreError::Conflict {
            entity,
            id: id.to_string(),
        }
    }

    /// Returns true for infrastructure failures, as opposed to refused
    /// business conditions.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            StoreError::Database(_)
                | StoreError::Migration(_)
                | StoreError::Serialization(_)
                | StoreError::Corrupt(_)
        )
    }
}

impl From<UnknownStatus> for StoreError {
    fn from(err: UnknownStatus) -> Self {
        StoreError::Corrupt(err.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
