//! Order domain events.

use chrono::{DateTime, Utc};
use common::{BuyerId, Currency, EventId, Money};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

use super::{OrderStatus, OrderTotals};

/// Events appended to an order's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    /// Order was created with its seats reserved.
    OrderPlaced(OrderPlacedData),

    /// A payment intent was opened for the order.
    PaymentRequested(PaymentRequestedData),

    /// Payment was confirmed (or not needed) and tickets are due.
    OrderCompleted(OrderCompletedData),

    /// Payment failed or the reservation was reclaimed.
    OrderFailed(OrderFailedData),

    /// Order was cancelled.
    OrderCancelled(OrderCancelledData),

    /// Order was refunded.
    OrderRefunded(OrderRefundedData),
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderPlaced(_) => "OrderPlaced",
            OrderEvent::PaymentRequested(_) => "PaymentRequested",
            OrderEvent::OrderCompleted(_) => "OrderCompleted",
            OrderEvent::OrderFailed(_) => "OrderFailed",
            OrderEvent::OrderCancelled(_) => "OrderCancelled",
            OrderEvent::OrderRefunded(_) => "OrderRefunded",
        }
    }
}

impl OrderEvent {
    /// When the event happened.
    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::OrderPlaced(data) => data.placed_at,
            OrderEvent::PaymentRequested(data) => data.requested_at,
            OrderEvent::OrderCompleted(data) => data.completed_at,
            OrderEvent::OrderFailed(data) => data.failed_at,
            OrderEvent::OrderCancelled(data) => data.cancelled_at,
            OrderEvent::OrderRefunded(data) => data.refunded_at,
        }
    }
}

/// Data for OrderPlaced event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPlacedData {
    pub order_number: String,
    pub event_id: EventId,
    pub buyer_id: BuyerId,
    pub ticket_count: u32,
    pub totals: OrderTotals,
    pub currency: Currency,
    pub promo_code: Option<String>,
    pub placed_at: DateTime<Utc>,
}

/// Data for PaymentRequested event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequestedData {
    pub reference: String,
    /// 1-based attempt number; earlier references are superseded.
    pub attempt: u32,
    pub amount: Money,
    pub currency: Currency,
    pub requested_at: DateTime<Utc>,
}

/// Data for OrderCompleted event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCompletedData {
    /// Reference of the payment that settled the order; `None` for free orders.
    pub payment_reference: Option<String>,
    pub completed_at: DateTime<Utc>,
}

/// Why an order failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The gateway reported the payment as failed or declined.
    PaymentFailed,
    /// The gateway reported success for a different amount or currency.
    PaymentMismatch,
    /// The order stayed PENDING past the reclaim timeout.
    ReclaimTimeout,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::PaymentFailed => "payment_failed",
            FailureReason::PaymentMismatch => "payment_mismatch",
            FailureReason::ReclaimTimeout => "reclaim_timeout",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Data for OrderFailed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderFailedData {
    pub reason: FailureReason,
    pub detail: Option<String>,
    pub failed_at: DateTime<Utc>,
}

/// Data for OrderCancelled event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCancelledData {
    pub previous_status: OrderStatus,
    pub reason: Option<String>,
    pub cancelled_at: DateTime<Utc>,
}

/// Data for OrderRefunded event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRefundedData {
    pub reason: Option<String>,
    /// Whether the seats went back on sale.
    pub restocked: bool,
    pub refunded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let now = Utc::now();
        let event = OrderEvent::OrderFailed(OrderFailedData {
            reason: FailureReason::ReclaimTimeout,
            detail: None,
            failed_at: now,
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "OrderFailed");
        assert_eq!(json["data"]["reason"], "reclaim_timeout");

        let back: OrderEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.event_type(), "OrderFailed");
        assert_eq!(back.occurred_at(), now);
    }
}
