//! Order aggregate implementation.

use chrono::{DateTime, Utc};
use common::{Currency, EventId, OrderId, PromoCodeId, human_reference};
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;
use crate::catalog::Buyer;
use crate::promo::Discount;

use super::{
    Attendee, FailureReason, FeePolicy, OrderCancelledData, OrderCompletedData, OrderError,
    OrderEvent, OrderFailedData, OrderItem, OrderPlacedData, OrderRefundedData, OrderStatus,
    OrderTotals, PaymentRequestedData, compute_totals,
};

/// Input for placing an order.
///
/// Items must already be merged per ticket type and priced from the catalog.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub event_id: EventId,
    pub buyer: Buyer,
    pub attendee: Option<Attendee>,
    pub items: Vec<OrderItem>,
    pub discount: Option<Discount>,
    pub currency: Currency,
    pub fees: FeePolicy,
    pub idempotency_key: Option<String>,
}

/// Order aggregate root.
///
/// Fields are public for persistence; every lifecycle change goes through a
/// command method and `apply`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    /// Human-readable `ORD-` reference.
    pub order_number: String,
    pub event_id: EventId,
    pub buyer: Buyer,
    pub attendee: Attendee,
    pub items: Vec<OrderItem>,
    pub promo_code_id: Option<PromoCodeId>,
    pub promo_code: Option<String>,
    pub totals: OrderTotals,
    pub currency: Currency,
    pub status: OrderStatus,
    /// Reference of the latest payment intent.
    pub payment_reference: Option<String>,
    pub payment_attempts: u32,
    pub idempotency_key: Option<String>,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Aggregate for Order {
    type Event = OrderEvent;

    fn aggregate_type() -> &'static str {
        "Order"
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            OrderEvent::OrderPlaced(data) => {
                self.status = OrderStatus::Pending;
                self.created_at = data.placed_at;
            }
            OrderEvent::PaymentRequested(data) => {
                self.payment_reference = Some(data.reference);
                self.payment_attempts = data.attempt;
            }
            OrderEvent::OrderCompleted(data) => {
                self.status = OrderStatus::Completed;
                self.completed_at = Some(data.completed_at);
                if let Some(reference) = data.payment_reference {
                    self.payment_reference = Some(reference);
                    self.paid_at = Some(data.completed_at);
                }
            }
            OrderEvent::OrderFailed(data) => {
                self.status = OrderStatus::Failed;
                self.closed_at = Some(data.failed_at);
            }
            OrderEvent::OrderCancelled(data) => {
                self.status = OrderStatus::Cancelled;
                self.closed_at = Some(data.cancelled_at);
            }
            OrderEvent::OrderRefunded(data) => {
                self.status = OrderStatus::Refunded;
                self.closed_at = Some(data.refunded_at);
            }
        }
        self.version += 1;
    }
}

// Query methods
impl Order {
    /// Total number of seats across all lines.
    pub fn ticket_count(&self) -> u32 {
        self.items.iter().map(|item| item.quantity).sum()
    }

    /// Returns true if nothing is owed.
    pub fn is_free(&self) -> bool {
        self.totals.total.is_zero()
    }

    /// Recomputes totals from the stored line snapshots and discount.
    pub fn recompute_totals(&self, fees: &FeePolicy) -> OrderTotals {
        compute_totals(&self.items, self.totals.discount, fees)
    }

    /// Reference the next payment intent will use.
    pub fn next_payment_reference(&self) -> String {
        format!("{}-{}", self.order_number, self.payment_attempts + 1)
    }

    /// Returns true if the order was created with this buyer's key.
    pub fn matches_idempotency_key(&self, key: &str) -> bool {
        self.idempotency_key.as_deref() == Some(key)
    }
}

// Command methods (return events)
impl Order {
    /// Places a new order.
    ///
    /// Returns the order with its events applied. A zero total completes the
    /// order immediately, since there is nothing to pay.
    pub fn place(
        request: NewOrder,
        now: DateTime<Utc>,
    ) -> Result<(Order, Vec<OrderEvent>), OrderError> {
        if request.items.is_empty() {
            return Err(OrderError::NoItems);
        }
        if let Some(item) = request.items.iter().find(|item| item.quantity == 0) {
            return Err(OrderError::InvalidQuantity {
                ticket_type_id: item.ticket_type_id,
            });
        }

        let discount_amount = request
            .discount
            .as_ref()
            .map(|discount| discount.amount)
            .unwrap_or_default();
        let totals = compute_totals(&request.items, discount_amount, &request.fees);
        let attendee = request
            .attendee
            .unwrap_or_else(|| Attendee::from(&request.buyer));

        let mut order = Order {
            id: OrderId::new(),
            order_number: human_reference("ORD"),
            event_id: request.event_id,
            buyer: request.buyer,
            attendee,
            items: request.items,
            promo_code_id: request.discount.as_ref().map(|d| d.promo_code_id),
            promo_code: request.discount.map(|d| d.code),
            totals,
            currency: request.currency,
            status: OrderStatus::Pending,
            payment_reference: None,
            payment_attempts: 0,
            idempotency_key: request.idempotency_key,
            version: 0,
            created_at: now,
            paid_at: None,
            completed_at: None,
            closed_at: None,
        };

        let mut events = vec![OrderEvent::OrderPlaced(OrderPlacedData {
            order_number: order.order_number.clone(),
            event_id: order.event_id,
            buyer_id: order.buyer.id,
            ticket_count: order.ticket_count(),
            totals: order.totals,
            currency: order.currency.clone(),
            promo_code: order.promo_code.clone(),
            placed_at: now,
        })];
        order.apply_events(events.clone());

        if order.is_free() {
            let completed = order.complete(None, now)?;
            order.apply_events(completed.clone());
            events.extend(completed);
        }

        Ok((order, events))
    }

    /// Opens a new payment intent, superseding any earlier reference.
    pub fn request_payment(&self, now: DateTime<Utc>) -> Result<Vec<OrderEvent>, OrderError> {
        if !self.status.can_request_payment() {
            return Err(OrderError::InvalidTransition {
                from: self.status,
                action: "request payment",
            });
        }
        if self.is_free() {
            return Err(OrderError::NothingToPay);
        }

        Ok(vec![OrderEvent::PaymentRequested(PaymentRequestedData {
            reference: self.next_payment_reference(),
            attempt: self.payment_attempts + 1,
            amount: self.totals.total,
            currency: self.currency.clone(),
            requested_at: now,
        })])
    }

    /// Completes the order after a confirmed payment (or none, if free).
    pub fn complete(
        &self,
        payment_reference: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        if !self.status.can_complete() {
            return Err(OrderError::InvalidTransition {
                from: self.status,
                action: "complete",
            });
        }

        Ok(vec![OrderEvent::OrderCompleted(OrderCompletedData {
            payment_reference,
            completed_at: now,
        })])
    }

    /// Fails a pending order.
    pub fn fail(
        &self,
        reason: FailureReason,
        detail: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        if !self.status.can_fail() {
            return Err(OrderError::InvalidTransition {
                from: self.status,
                action: "fail",
            });
        }

        Ok(vec![OrderEvent::OrderFailed(OrderFailedData {
            reason,
            detail,
            failed_at: now,
        })])
    }

    /// Cancels the order.
    ///
    /// A completed order may only be cancelled before its event starts.
    pub fn cancel(
        &self,
        reason: Option<String>,
        event_started: bool,
        now: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        if !self.status.can_cancel() {
            return Err(OrderError::InvalidTransition {
                from: self.status,
                action: "cancel",
            });
        }
        if self.status == OrderStatus::Completed && event_started {
            return Err(OrderError::CancellationWindowClosed {
                order_number: self.order_number.clone(),
            });
        }

        Ok(vec![OrderEvent::OrderCancelled(OrderCancelledData {
            previous_status: self.status,
            reason,
            cancelled_at: now,
        })])
    }

    /// Refunds a completed order.
    pub fn refund(
        &self,
        reason: Option<String>,
        restock: bool,
        now: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        if !self.status.can_refund() {
            return Err(OrderError::InvalidTransition {
                from: self.status,
                action: "refund",
            });
        }

        Ok(vec![OrderEvent::OrderRefunded(OrderRefundedData {
            reason,
            restocked: restock,
            refunded_at: now,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::DomainEvent;
    use crate::promo::DiscountKind;
    use common::{BuyerId, Money, TicketTypeId};

    fn new_order(unit_price: i64, quantity: u32) -> NewOrder {
        NewOrder {
            event_id: EventId::new(),
            buyer: Buyer::new(BuyerId::new(), "Ada Obi", "ada@example.com"),
            attendee: None,
            items: vec![OrderItem::new(
                TicketTypeId::new(),
                "General Admission",
                quantity,
                Money::from_minor(unit_price),
            )],
            discount: None,
            currency: Currency::new("NGN").unwrap(),
            fees: FeePolicy::none(),
            idempotency_key: None,
        }
    }

    fn pending_order() -> Order {
        Order::place(new_order(5_000, 2), Utc::now()).unwrap().0
    }

    fn with_events(mut order: Order, events: Vec<OrderEvent>) -> Order {
        order.apply_events(events);
        order
    }

    #[test]
    fn test_place_paid_order_is_pending() {
        let (order, events) = Order::place(new_order(5_000, 2), Utc::now()).unwrap();

        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.totals.total.minor(), 10_000);
        assert_eq!(order.version, 1);
        assert!(order.order_number.starts_with("ORD-"));
        assert_eq!(order.attendee.email, "ada@example.com");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type(), "OrderPlaced");
    }

    #[test]
    fn test_place_free_order_completes_immediately() {
        let (order, events) = Order::place(new_order(0, 3), Utc::now()).unwrap();

        assert_eq!(order.status, OrderStatus::Completed);
        assert!(order.payment_reference.is_none());
        assert!(order.completed_at.is_some());
        assert_eq!(
            events.iter().map(|e| e.event_type()).collect::<Vec<_>>(),
            vec!["OrderPlaced", "OrderCompleted"]
        );
    }

    #[test]
    fn test_place_with_discount() {
        let mut request = new_order(5_000, 2);
        request.discount = Some(Discount {
            promo_code_id: PromoCodeId::new(),
            code: "SAVE10".to_string(),
            kind: DiscountKind::Percentage(10),
            eligible_subtotal: Money::from_minor(10_000),
            amount: Money::from_minor(1_000),
        });

        let (order, _) = Order::place(request, Utc::now()).unwrap();
        assert_eq!(order.totals.discount.minor(), 1_000);
        assert_eq!(order.totals.total.minor(), 9_000);
        assert_eq!(order.promo_code.as_deref(), Some("SAVE10"));
        assert_eq!(order.recompute_totals(&FeePolicy::none()), order.totals);
    }

    #[test]
    fn test_place_rejects_empty_and_zero_quantity() {
        let mut request = new_order(5_000, 1);
        request.items.clear();
        assert!(matches!(
            Order::place(request, Utc::now()),
            Err(OrderError::NoItems)
        ));

        let request = new_order(5_000, 0);
        assert!(matches!(
            Order::place(request, Utc::now()),
            Err(OrderError::InvalidQuantity { .. })
        ));
    }

    #[test]
    fn test_payment_reference_supersedes() {
        let order = pending_order();
        let events = order.request_payment(Utc::now()).unwrap();
        let order = with_events(order, events);
        let first = order.payment_reference.clone().unwrap();
        assert_eq!(first, format!("{}-1", order.order_number));

        let events = order.request_payment(Utc::now()).unwrap();
        let order = with_events(order, events);
        assert_eq!(
            order.payment_reference.as_deref(),
            Some(format!("{}-2", order.order_number).as_str())
        );
        assert_eq!(order.payment_attempts, 2);
    }

    #[test]
    fn test_complete_sets_paid_at() {
        let order = pending_order();
        let reference = order.next_payment_reference();
        let events = order.complete(Some(reference.clone()), Utc::now()).unwrap();
        let order = with_events(order, events);

        assert_eq!(order.status, OrderStatus::Completed);
        assert_eq!(order.payment_reference, Some(reference));
        assert!(order.paid_at.is_some());
    }

    #[test]
    fn test_complete_twice_is_rejected() {
        let order = pending_order();
        let events = order.complete(None, Utc::now()).unwrap();
        let order = with_events(order, events);

        let err = order.complete(None, Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            OrderError::InvalidTransition {
                from: OrderStatus::Completed,
                action: "complete"
            }
        ));
    }

    #[test]
    fn test_failed_order_is_closed() {
        let order = pending_order();
        let events = order
            .fail(FailureReason::ReclaimTimeout, None, Utc::now())
            .unwrap();
        let order = with_events(order, events);

        assert_eq!(order.status, OrderStatus::Failed);
        assert!(order.closed_at.is_some());
        assert!(order.cancel(None, false, Utc::now()).is_err());
        assert!(order.refund(None, false, Utc::now()).is_err());
        assert!(order.request_payment(Utc::now()).is_err());
    }

    #[test]
    fn test_cancel_completed_before_and_after_start() {
        let order = pending_order();
        let events = order.complete(None, Utc::now()).unwrap();
        let order = with_events(order, events);

        assert!(matches!(
            order.cancel(None, true, Utc::now()),
            Err(OrderError::CancellationWindowClosed { .. })
        ));

        let events = order
            .cancel(Some("change of plans".to_string()), false, Utc::now())
            .unwrap();
        match &events[0] {
            OrderEvent::OrderCancelled(data) => {
                assert_eq!(data.previous_status, OrderStatus::Completed)
            }
            other => panic!("unexpected event: {other:?}"),
        }
        let order = with_events(order, events);
        assert_eq!(order.status, OrderStatus::Cancelled);
    }

    #[test]
    fn test_refund_only_from_completed() {
        let order = pending_order();
        assert!(order.refund(None, false, Utc::now()).is_err());

        let events = order.complete(None, Utc::now()).unwrap();
        let order = with_events(order, events);
        let events = order.refund(None, true, Utc::now()).unwrap();
        let order = with_events(order, events);
        assert_eq!(order.status, OrderStatus::Refunded);
    }

    #[test]
    fn test_free_order_cannot_request_payment() {
        let (order, _) = Order::place(new_order(0, 1), Utc::now()).unwrap();
        assert!(order.request_payment(Utc::now()).is_err());
    }
}
