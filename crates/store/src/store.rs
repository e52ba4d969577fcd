use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    BuyerId, Currency, EventId, Money, OrderId, PromoCodeId, ReservationId, TicketId, TicketTypeId,
    TransferId,
};
use domain::{
    EventInfo, Order, OrderEvent, OrderStatus, PromoCode, Ticket, TicketStatus, TicketTransfer,
    TicketType, TransferStatus,
};
use serde::{Deserialize, Serialize};

use crate::Result;

/// A claim on ticket-type capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub ticket_type_id: TicketTypeId,
    /// `None` for reservations taken outside an order.
    pub order_id: Option<OrderId>,
    pub quantity: u32,
    pub created_at: DateTime<Utc>,
    pub committed_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
}

impl Reservation {
    pub fn is_released(&self) -> bool {
        self.released_at.is_some()
    }
}

/// One payment intent opened for an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentAttempt {
    pub reference: String,
    pub order_id: OrderId,
    pub attempt: u32,
    pub amount: Money,
    pub currency: Currency,
    pub created_at: DateTime<Utc>,
    /// Set once a newer attempt exists.
    pub superseded: bool,
}

/// An order event as stored in the audit history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedEvent {
    pub sequence: i64,
    pub order_id: OrderId,
    pub event_type: String,
    pub event: OrderEvent,
    pub recorded_at: DateTime<Utc>,
}

/// Idempotency key supplied with an order creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyClaim {
    pub buyer_id: BuyerId,
    pub key: String,
    /// Claims created before this instant are stale and may be reused.
    pub not_before: DateTime<Utc>,
}

/// Everything persisted when an order is created.
#[derive(Debug, Clone)]
pub struct NewOrderRecord {
    /// The order with its creation events applied.
    pub order: Order,
    pub events: Vec<OrderEvent>,
    /// Tickets issued at creation (free orders only).
    pub tickets: Vec<Ticket>,
    /// Redeem the order's promo code in the same transaction.
    pub redeem_promo: bool,
    pub idempotency: Option<IdempotencyClaim>,
}

/// Result of `place_order`.
#[derive(Debug, Clone)]
pub enum PlaceOutcome {
    Created(Order),
    /// A live idempotency claim already pointed at this order.
    Existing(Order),
}

impl PlaceOutcome {
    pub fn order(&self) -> &Order {
        match self {
            PlaceOutcome::Created(order) | PlaceOutcome::Existing(order) => order,
        }
    }

    pub fn into_order(self) -> Order {
        match self {
            PlaceOutcome::Created(order) | PlaceOutcome::Existing(order) => order,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, PlaceOutcome::Created(_))
    }
}

/// What a transition does to the order's reservations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InventoryEffect {
    #[default]
    Keep,
    /// Stamp reservations as committed.
    Commit,
    /// Return every unreleased seat to sale.
    Release,
}

/// A guarded order state change and its side effects.
#[derive(Debug, Clone)]
pub struct OrderTransition {
    /// The order with the new events applied.
    pub order: Order,
    /// Status the stored order must still have.
    pub expected_status: OrderStatus,
    pub events: Vec<OrderEvent>,
    pub inventory: InventoryEffect,
    /// Conditionally increment the promo usage counter.
    pub redeem_promo: bool,
    pub issue_tickets: Vec<Ticket>,
    /// New status for the order's ACTIVE tickets.
    pub invalidate_tickets: Option<TicketStatus>,
    /// Close pending transfers of the order's tickets as CANCELLED.
    pub cancel_transfers: bool,
    pub payment_attempt: Option<PaymentAttempt>,
    pub at: DateTime<Utc>,
}

impl OrderTransition {
    /// A transition with no side effects beyond the status change.
    pub fn new(order: Order, expected_status: OrderStatus, events: Vec<OrderEvent>, at: DateTime<Utc>) -> Self {
        Self {
            order,
            expected_status,
            events,
            inventory: InventoryEffect::Keep,
            redeem_promo: false,
            issue_tickets: Vec::new(),
            invalidate_tickets: None,
            cancel_transfers: false,
            payment_attempt: None,
            at,
        }
    }

    pub fn with_inventory(mut self, effect: InventoryEffect) -> Self {
        self.inventory = effect;
        self
    }

    pub fn redeeming_promo(mut self, redeem: bool) -> Self {
        self.redeem_promo = redeem;
        self
    }

    pub fn issuing(mut self, tickets: Vec<Ticket>) -> Self {
        self.issue_tickets = tickets;
        self
    }

    pub fn invalidating_tickets(mut self, status: TicketStatus) -> Self {
        self.invalidate_tickets = Some(status);
        self
    }

    pub fn cancelling_transfers(mut self) -> Self {
        self.cancel_transfers = true;
        self
    }

    pub fn with_payment_attempt(mut self, attempt: PaymentAttempt) -> Self {
        self.payment_attempt = Some(attempt);
        self
    }
}

/// Result of a committed transition.
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub order: Order,
    /// The promo counter was already at its limit; the order went through anyway.
    pub promo_over_limit: bool,
    /// Seats returned to sale.
    pub released_quantity: u32,
}

/// Core trait for store implementations.
///
/// Shared counters (ticket-type sold counts, promo usage) are only changed
/// through single-row conditional updates, and every order transition is
/// guarded by the order's current status. All implementations must be
/// thread-safe (Send + Sync).
#[async_trait]
pub trait Store: Send + Sync {
    // Catalog

    /// Inserts or replaces event metadata.
    async fn upsert_event(&self, event: EventInfo) -> Result<()>;

    async fn get_event(&self, event_id: EventId) -> Result<Option<EventInfo>>;

    /// Inserts a new ticket type. Its sold counter is ignored and starts at 0.
    async fn insert_ticket_type(&self, ticket_type: TicketType) -> Result<TicketType>;

    async fn get_ticket_type(&self, ticket_type_id: TicketTypeId) -> Result<Option<TicketType>>;

    async fn list_ticket_types(&self, event_id: EventId) -> Result<Vec<TicketType>>;

    /// Inserts a promo code; codes are unique per event.
    async fn insert_promo_code(&self, promo: PromoCode) -> Result<PromoCode>;

    /// Looks up a code (already normalised) within an event.
    async fn find_promo_code(&self, event_id: EventId, code: &str) -> Result<Option<PromoCode>>;

    async fn get_promo_code(&self, promo_code_id: PromoCodeId) -> Result<Option<PromoCode>>;

    // Inventory ledger

    /// Atomically increments the sold counter if capacity allows and records
    /// the reservation.
    async fn reserve(
        &self,
        reservation_id: ReservationId,
        ticket_type_id: TicketTypeId,
        quantity: u32,
        at: DateTime<Utc>,
    ) -> Result<Reservation>;

    /// Releases a reservation. Returns false if it was already released.
    async fn release(&self, reservation_id: ReservationId, at: DateTime<Utc>) -> Result<bool>;

    /// Commits a reservation. Returns false if it was released or already committed.
    async fn commit(&self, reservation_id: ReservationId, at: DateTime<Utc>) -> Result<bool>;

    async fn get_reservation(&self, reservation_id: ReservationId) -> Result<Option<Reservation>>;

    /// Decrements the sold counter, never below zero.
    async fn restock(&self, ticket_type_id: TicketTypeId, quantity: u32) -> Result<TicketType>;

    // Orders

    /// Creates an order, its reservations and (for free orders) tickets in
    /// one atomic step. A live idempotency claim short-circuits to the
    /// existing order without reserving anything.
    async fn place_order(&self, record: NewOrderRecord) -> Result<PlaceOutcome>;

    /// The order a live idempotency claim points at, if any.
    async fn find_idempotent_order(&self, claim: &IdempotencyClaim) -> Result<Option<Order>>;

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>>;

    /// Finds the order that issued `reference`, including superseded ones.
    async fn find_order_by_payment_reference(&self, reference: &str) -> Result<Option<Order>>;

    /// Applies a guarded transition.
    ///
    /// Fails with `StatusConflict` if the stored status differs from
    /// `expected_status`.
    async fn transition_order(&self, transition: OrderTransition) -> Result<TransitionOutcome>;

    async fn order_events(&self, order_id: OrderId) -> Result<Vec<RecordedEvent>>;

    async fn payment_attempts(&self, order_id: OrderId) -> Result<Vec<PaymentAttempt>>;

    /// PENDING orders created before `cutoff`, oldest first.
    async fn pending_orders_created_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Order>>;

    // Tickets

    async fn get_ticket(&self, ticket_id: TicketId) -> Result<Option<Ticket>>;

    async fn find_ticket_by_number(&self, ticket_number: &str) -> Result<Option<Ticket>>;

    async fn tickets_for_order(&self, order_id: OrderId) -> Result<Vec<Ticket>>;

    /// Marks a ticket USED if it is ACTIVE, not checked in and still on
    /// `code_revision`. Returns `None` when the condition fails.
    async fn check_in_ticket(
        &self,
        ticket_id: TicketId,
        code_revision: u32,
        at: DateTime<Utc>,
    ) -> Result<Option<Ticket>>;

    // Transfers

    /// Records a new PENDING transfer; at most one may exist per ticket.
    async fn create_transfer(&self, transfer: TicketTransfer) -> Result<TicketTransfer>;

    async fn get_transfer(&self, transfer_id: TransferId) -> Result<Option<TicketTransfer>>;

    async fn pending_transfer_for_ticket(&self, ticket_id: TicketId) -> Result<Option<TicketTransfer>>;

    /// Accepts a PENDING, unexpired transfer and stores the reassigned ticket,
    /// provided the ticket is still ACTIVE on `previous_revision`.
    async fn accept_transfer(
        &self,
        transfer_id: TransferId,
        ticket: Ticket,
        previous_revision: u32,
        at: DateTime<Utc>,
    ) -> Result<TicketTransfer>;

    /// Closes a PENDING transfer as CANCELLED or EXPIRED. Returns `None` if
    /// it was no longer pending.
    async fn close_transfer(
        &self,
        transfer_id: TransferId,
        status: TransferStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<TicketTransfer>>;

    /// Expires every PENDING transfer whose expiry is at or before `now`.
    async fn expire_transfers(&self, now: DateTime<Utc>) -> Result<Vec<TicketTransfer>>;

    /// Checks connectivity.
    async fn ping(&self) -> Result<()>;
}
