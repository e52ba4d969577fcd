//! Order aggregate and related types.

mod aggregate;
mod events;
mod pricing;
mod state;
mod value_objects;

pub use aggregate::{NewOrder, Order};
pub use events::{
    FailureReason, OrderCancelledData, OrderCompletedData, OrderEvent, OrderFailedData,
    OrderPlacedData, OrderRefundedData, PaymentRequestedData,
};
pub use pricing::{FeePolicy, OrderTotals, compute_totals};
pub use state::OrderStatus;
pub use value_objects::{Attendee, OrderItem};

use common::{Currency, EventId, TicketTypeId};
use thiserror::Error;

/// Errors that can occur during order operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    /// The order is not in a status that allows the action.
    #[error("invalid transition: cannot {action} an order in {from} status")]
    InvalidTransition {
        from: OrderStatus,
        action: &'static str,
    },

    /// Completed orders can only be cancelled before the event starts.
    #[error("order {order_number} can no longer be cancelled: the event has started")]
    CancellationWindowClosed { order_number: String },

    #[error("order has no items")]
    NoItems,

    #[error("invalid quantity for ticket type {ticket_type_id}: must be greater than 0")]
    InvalidQuantity { ticket_type_id: TicketTypeId },

    #[error("all items must share one currency: expected {expected}, found {found}")]
    MixedCurrency { expected: Currency, found: Currency },

    #[error("ticket type {ticket_type_id} does not belong to event {event_id}")]
    TicketTypeNotInEvent {
        ticket_type_id: TicketTypeId,
        event_id: EventId,
    },

    #[error("event {event_id} has been cancelled")]
    EventCancelled { event_id: EventId },

    #[error("order total is zero; there is nothing to pay")]
    NothingToPay,
}

impl OrderError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            OrderError::InvalidTransition { .. } => "invalid_transition",
            OrderError::CancellationWindowClosed { .. } => "cancellation_window_closed",
            OrderError::NoItems => "no_items",
            OrderError::InvalidQuantity { .. } => "invalid_quantity",
            OrderError::MixedCurrency { .. } => "mixed_currency",
            OrderError::TicketTypeNotInEvent { .. } => "ticket_type_not_in_event",
            OrderError::EventCancelled { .. } => "event_cancelled",
            OrderError::NothingToPay => "nothing_to_pay",
        }
    }
}
