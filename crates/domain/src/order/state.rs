//! Order state machine.

use serde::{Deserialize, Serialize};

use crate::error::UnknownStatus;

/// The status of an order in its lifecycle.
///
/// State transitions:
/// ```text
/// PENDING ──┬──► COMPLETED ──┬──► REFUNDED
///           │                └──► CANCELLED (before the event starts)
///           ├──► FAILED
///           └──► CANCELLED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Seats reserved, awaiting payment.
    #[default]
    Pending,

    /// Paid (or free); tickets issued.
    Completed,

    /// Payment failed or the reservation timed out (terminal).
    Failed,

    /// Cancelled by the buyer or the system (terminal).
    Cancelled,

    /// Refunded after completion (terminal).
    Refunded,
}

impl OrderStatus {
    /// Returns true if payment reconciliation may complete the order.
    pub fn can_complete(&self) -> bool {
        matches!(self, OrderStatus::Pending)
    }

    /// Returns true if the order may be failed.
    pub fn can_fail(&self) -> bool {
        matches!(self, OrderStatus::Pending)
    }

    /// Returns true if the order may be cancelled.
    ///
    /// Completed orders additionally require the event not to have started.
    pub fn can_cancel(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Completed)
    }

    /// Returns true if the order may be refunded.
    pub fn can_refund(&self) -> bool {
        matches!(self, OrderStatus::Completed)
    }

    /// Returns true if a new payment intent may be opened.
    pub fn can_request_payment(&self) -> bool {
        matches!(self, OrderStatus::Pending)
    }

    /// Returns true while the order awaits reconciliation.
    pub fn is_pending(&self) -> bool {
        matches!(self, OrderStatus::Pending)
    }

    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Failed | OrderStatus::Cancelled | OrderStatus::Refunded
        )
    }

    /// Returns true if the order's seats are held (reserved or sold).
    pub fn holds_inventory(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Completed)
    }

    /// Returns the status name as stored and serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Failed => "FAILED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Refunded => "REFUNDED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OrderStatus::Pending),
            "COMPLETED" => Ok(OrderStatus::Completed),
            "FAILED" => Ok(OrderStatus::Failed),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            "REFUNDED" => Ok(OrderStatus::Refunded),
            other => Err(UnknownStatus::new("order", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [OrderStatus; 5] = [
        OrderStatus::Pending,
        OrderStatus::Completed,
        OrderStatus::Failed,
        OrderStatus::Cancelled,
        OrderStatus::Refunded,
    ];

    #[test]
    fn test_default_status_is_pending() {
        assert_eq!(OrderStatus::default(), OrderStatus::Pending);
    }

    #[test]
    fn test_only_pending_can_complete_or_fail() {
        for status in ALL {
            assert_eq!(status.can_complete(), status == OrderStatus::Pending);
            assert_eq!(status.can_fail(), status == OrderStatus::Pending);
        }
    }

    #[test]
    fn test_cancel_and_refund_sources() {
        assert!(OrderStatus::Pending.can_cancel());
        assert!(OrderStatus::Completed.can_cancel());
        assert!(!OrderStatus::Failed.can_cancel());
        assert!(!OrderStatus::Cancelled.can_cancel());
        assert!(!OrderStatus::Refunded.can_cancel());

        assert!(OrderStatus::Completed.can_refund());
        assert!(!OrderStatus::Pending.can_refund());
    }

    #[test]
    fn test_terminal_statuses_allow_nothing() {
        for status in ALL.into_iter().filter(OrderStatus::is_terminal) {
            assert!(!status.can_complete());
            assert!(!status.can_fail());
            assert!(!status.can_cancel());
            assert!(!status.can_refund());
            assert!(!status.can_request_payment());
        }
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in ALL {
            assert_eq!(status.as_str().parse::<OrderStatus>(), Ok(status));
        }
        assert!("SHIPPED".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_status_serializes_upper_case() {
        let json = serde_json::to_string(&OrderStatus::Completed).unwrap();
        assert_eq!(json, "\"COMPLETED\"");
    }
}
