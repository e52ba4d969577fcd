use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    BuyerId, EventId, OrderId, PromoCodeId, ReservationId, TicketId, TicketTypeId, TransferId,
};
use domain::{
    DomainEvent, EventInfo, InsufficientInventory, Order, OrderEvent, OrderStatus, PromoCode,
    Ticket, TicketStatus, TicketTransfer, TicketType, TransferStatus,
};
use tokio::sync::RwLock;

use crate::{
    Result, StoreError,
    store::{
        IdempotencyClaim, InventoryEffect, NewOrderRecord, OrderTransition, PaymentAttempt,
        PlaceOutcome, RecordedEvent, Reservation, Store, TransitionOutcome,
    },
};

#[derive(Default)]
struct State {
    events: HashMap<EventId, EventInfo>,
    ticket_types: HashMap<TicketTypeId, TicketType>,
    promo_codes: HashMap<PromoCodeId, PromoCode>,
    orders: HashMap<OrderId, Order>,
    order_events: Vec<RecordedEvent>,
    reservations: HashMap<ReservationId, Reservation>,
    payment_attempts: HashMap<String, PaymentAttempt>,
    idempotency: HashMap<(BuyerId, String), (OrderId, DateTime<Utc>)>,
    tickets: HashMap<TicketId, Ticket>,
    transfers: HashMap<TransferId, TicketTransfer>,
}

impl State {
    fn fits(ticket_type: &TicketType, quantity: u32) -> bool {
        u64::from(ticket_type.quantity_sold) + u64::from(quantity) <= u64::from(ticket_type.quantity)
    }

    fn append_events(&mut self, order_id: OrderId, events: &[OrderEvent]) {
        for event in events {
            let sequence = self.order_events.len() as i64 + 1;
            self.order_events.push(RecordedEvent {
                sequence,
                order_id,
                event_type: event.event_type().to_string(),
                event: event.clone(),
                recorded_at: event.occurred_at(),
            });
        }
    }

    fn release_order_reservations(&mut self, order_id: OrderId, at: DateTime<Utc>) -> u32 {
        let State {
            reservations,
            ticket_types,
            ..
        } = self;
        let mut released = 0;
        for reservation in reservations
            .values_mut()
            .filter(|r| r.order_id == Some(order_id) && !r.is_released())
        {
            reservation.released_at = Some(at);
            if let Some(ticket_type) = ticket_types.get_mut(&reservation.ticket_type_id) {
                ticket_type.quantity_sold = ticket_type.quantity_sold.saturating_sub(reservation.quantity);
            }
            released += reservation.quantity;
        }
        released
    }
}

/// In-memory store implementation for tests and local development.
///
/// Every primitive runs inside a single write-lock critical section, which
/// gives it the same all-or-nothing semantics as a database transaction.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of recorded order events.
    pub async fn event_count(&self) -> usize {
        self.state.read().await.order_events.len()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn upsert_event(&self, event: EventInfo) -> Result<()> {
        self.state.write().await.events.insert(event.id, event);
        Ok(())
    }

    async fn get_event(&self, event_id: EventId) -> Result<Option<EventInfo>> {
        Ok(self.state.read().await.events.get(&event_id).cloned())
    }

    async fn insert_ticket_type(&self, mut ticket_type: TicketType) -> Result<TicketType> {
        let mut state = self.state.write().await;
        if !state.events.contains_key(&ticket_type.event_id) {
            return Err(StoreError::not_found("event", ticket_type.event_id));
        }
        if state.ticket_types.contains_key(&ticket_type.id) {
            return Err(StoreError::Duplicate {
                entity: "ticket type",
                key: ticket_type.id.to_string(),
            });
        }
        ticket_type.quantity_sold = 0;
        state.ticket_types.insert(ticket_type.id, ticket_type.clone());
        Ok(ticket_type)
    }

    async fn get_ticket_type(&self, ticket_type_id: TicketTypeId) -> Result<Option<TicketType>> {
        Ok(self.state.read().await.ticket_types.get(&ticket_type_id).cloned())
    }

    async fn list_ticket_types(&self, event_id: EventId) -> Result<Vec<TicketType>> {
        let state = self.state.read().await;
        let mut types: Vec<TicketType> = state
            .ticket_types
            .values()
            .filter(|tt| tt.event_id == event_id)
            .cloned()
            .collect();
        types.sort_by(|a, b| a.unit_price.cmp(&b.unit_price).then_with(|| a.name.cmp(&b.name)));
        Ok(types)
    }

    async fn insert_promo_code(&self, mut promo: PromoCode) -> Result<PromoCode> {
        let mut state = self.state.write().await;
        if !state.events.contains_key(&promo.event_id) {
            return Err(StoreError::not_found("event", promo.event_id));
        }
        promo.code = PromoCode::normalize(&promo.code);
        let taken = state
            .promo_codes
            .values()
            .any(|p| p.id == promo.id || (p.event_id == promo.event_id && p.code == promo.code));
        if taken {
            return Err(StoreError::Duplicate {
                entity: "promo code",
                key: promo.code,
            });
        }
        state.promo_codes.insert(promo.id, promo.clone());
        Ok(promo)
    }

    async fn find_promo_code(&self, event_id: EventId, code: &str) -> Result<Option<PromoCode>> {
        let state = self.state.read().await;
        Ok(state
            .promo_codes
            .values()
            .find(|p| p.event_id == event_id && p.code == code)
            .cloned())
    }

    async fn get_promo_code(&self, promo_code_id: PromoCodeId) -> Result<Option<PromoCode>> {
        Ok(self.state.read().await.promo_codes.get(&promo_code_id).cloned())
    }

    async fn reserve(
        &self,
        reservation_id: ReservationId,
        ticket_type_id: TicketTypeId,
        quantity: u32,
        at: DateTime<Utc>,
    ) -> Result<Reservation> {
        let mut state = self.state.write().await;
        if quantity == 0 {
            return Err(InsufficientInventory::InvalidQuantity { ticket_type_id }.into());
        }
        if state.reservations.contains_key(&reservation_id) {
            return Err(StoreError::Duplicate {
                entity: "reservation",
                key: reservation_id.to_string(),
            });
        }

        let ticket_type = state
            .ticket_types
            .get_mut(&ticket_type_id)
            .ok_or_else(|| StoreError::not_found("ticket type", ticket_type_id))?;
        if !State::fits(ticket_type, quantity) {
            return Err(ticket_type.sold_out(quantity).into());
        }
        ticket_type.quantity_sold += quantity;

        let reservation = Reservation {
            id: reservation_id,
            ticket_type_id,
            order_id: None,
            quantity,
            created_at: at,
            committed_at: None,
            released_at: None,
        };
        state.reservations.insert(reservation_id, reservation.clone());
        Ok(reservation)
    }

    async fn release(&self, reservation_id: ReservationId, at: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.write().await;
        let State {
            reservations,
            ticket_types,
            ..
        } = &mut *state;

        let reservation = reservations
            .get_mut(&reservation_id)
            .ok_or_else(|| StoreError::not_found("reservation", reservation_id))?;
        if reservation.is_released() {
            return Ok(false);
        }
        reservation.released_at = Some(at);
        if let Some(ticket_type) = ticket_types.get_mut(&reservation.ticket_type_id) {
            ticket_type.quantity_sold = ticket_type.quantity_sold.saturating_sub(reservation.quantity);
        }
        Ok(true)
    }

    async fn commit(&self, reservation_id: ReservationId, at: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.write().await;
        let reservation = state
            .reservations
            .get_mut(&reservation_id)
            .ok_or_else(|| StoreError::not_found("reservation", reservation_id))?;
        if reservation.is_released() || reservation.committed_at.is_some() {
            return Ok(false);
        }
        reservation.committed_at = Some(at);
        Ok(true)
    }

    async fn get_reservation(&self, reservation_id: ReservationId) -> Result<Option<Reservation>> {
        Ok(self.state.read().await.reservations.get(&reservation_id).cloned())
    }

    async fn restock(&self, ticket_type_id: TicketTypeId, quantity: u32) -> Result<TicketType> {
        let mut state = self.state.write().await;
        let ticket_type = state
            .ticket_types
            .get_mut(&ticket_type_id)
            .ok_or_else(|| StoreError::not_found("ticket type", ticket_type_id))?;
        ticket_type.quantity_sold = ticket_type.quantity_sold.saturating_sub(quantity);
        Ok(ticket_type.clone())
    }

    async fn place_order(&self, record: NewOrderRecord) -> Result<PlaceOutcome> {
        let mut state = self.state.write().await;
        let order = record.order;

        if let Some(claim) = &record.idempotency
            && let Some((existing_id, created_at)) =
                state.idempotency.get(&(claim.buyer_id, claim.key.clone()))
            && *created_at >= claim.not_before
        {
            let existing = state
                .orders
                .get(existing_id)
                .cloned()
                .ok_or_else(|| StoreError::not_found("order", existing_id))?;
            return Ok(PlaceOutcome::Existing(existing));
        }

        if !state.events.contains_key(&order.event_id) {
            return Err(StoreError::not_found("event", order.event_id));
        }
        if state.orders.contains_key(&order.id)
            || state.orders.values().any(|o| o.order_number == order.order_number)
        {
            return Err(StoreError::Duplicate {
                entity: "order",
                key: order.order_number.clone(),
            });
        }

        // Check everything before touching any counter.
        let mut demand: HashMap<TicketTypeId, u32> = HashMap::new();
        for item in &order.items {
            if item.quantity == 0 {
                return Err(InsufficientInventory::InvalidQuantity {
                    ticket_type_id: item.ticket_type_id,
                }
                .into());
            }
            *demand.entry(item.ticket_type_id).or_default() += item.quantity;
        }
        for (ticket_type_id, quantity) in &demand {
            let ticket_type = state
                .ticket_types
                .get(ticket_type_id)
                .ok_or_else(|| StoreError::not_found("ticket type", ticket_type_id))?;
            if !State::fits(ticket_type, *quantity) {
                return Err(ticket_type.sold_out(*quantity).into());
            }
        }
        let redeem = if record.redeem_promo {
            order.promo_code_id
        } else {
            None
        };
        if let Some(promo_code_id) = redeem {
            let promo = state
                .promo_codes
                .get(&promo_code_id)
                .ok_or_else(|| StoreError::not_found("promo code", promo_code_id))?;
            if !promo.has_remaining_uses() {
                return Err(StoreError::PromoUsageExhausted { promo_code_id });
            }
        }

        let committed_at = (order.status == OrderStatus::Completed).then_some(order.created_at);
        for item in &order.items {
            if let Some(ticket_type) = state.ticket_types.get_mut(&item.ticket_type_id) {
                ticket_type.quantity_sold += item.quantity;
            }
            state.reservations.insert(
                item.reservation_id,
                Reservation {
                    id: item.reservation_id,
                    ticket_type_id: item.ticket_type_id,
                    order_id: Some(order.id),
                    quantity: item.quantity,
                    created_at: order.created_at,
                    committed_at,
                    released_at: None,
                },
            );
        }
        if let Some(promo) = redeem.and_then(|id| state.promo_codes.get_mut(&id)) {
            promo.usage_count += 1;
        }

        state.append_events(order.id, &record.events);
        for ticket in record.tickets {
            state.tickets.insert(ticket.id, ticket);
        }
        if let Some(claim) = record.idempotency {
            state
                .idempotency
                .insert((claim.buyer_id, claim.key), (order.id, order.created_at));
        }
        state.orders.insert(order.id, order.clone());

        Ok(PlaceOutcome::Created(order))
    }

    async fn find_idempotent_order(&self, claim: &IdempotencyClaim) -> Result<Option<Order>> {
        let state = self.state.read().await;
        Ok(state
            .idempotency
            .get(&(claim.buyer_id, claim.key.clone()))
            .filter(|(_, created_at)| *created_at >= claim.not_before)
            .and_then(|(order_id, _)| state.orders.get(order_id).cloned()))
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.state.read().await.orders.get(&order_id).cloned())
    }

    async fn find_order_by_payment_reference(&self, reference: &str) -> Result<Option<Order>> {
        let state = self.state.read().await;
        Ok(state
            .payment_attempts
            .get(reference)
            .and_then(|attempt| state.orders.get(&attempt.order_id))
            .cloned())
    }

    async fn transition_order(&self, transition: OrderTransition) -> Result<TransitionOutcome> {
        let mut state = self.state.write().await;
        let order = transition.order;
        let at = transition.at;

        let current = state
            .orders
            .get(&order.id)
            .ok_or_else(|| StoreError::not_found("order", order.id))?;
        if current.status != transition.expected_status {
            return Err(StoreError::StatusConflict {
                order_id: order.id,
                expected: transition.expected_status,
                actual: current.status,
            });
        }
        if let Some(attempt) = &transition.payment_attempt
            && state.payment_attempts.contains_key(&attempt.reference)
        {
            return Err(StoreError::Duplicate {
                entity: "payment attempt",
                key: attempt.reference.clone(),
            });
        }

        let released_quantity = match transition.inventory {
            InventoryEffect::Keep => 0,
            InventoryEffect::Commit => {
                for reservation in state.reservations.values_mut().filter(|r| {
                    r.order_id == Some(order.id) && !r.is_released() && r.committed_at.is_none()
                }) {
                    reservation.committed_at = Some(at);
                }
                0
            }
            InventoryEffect::Release => state.release_order_reservations(order.id, at),
        };

        let mut promo_over_limit = false;
        if transition.redeem_promo
            && let Some(promo) = order.promo_code_id.and_then(|id| state.promo_codes.get_mut(&id))
        {
            if promo.has_remaining_uses() {
                promo.usage_count += 1;
            } else {
                promo_over_limit = true;
            }
        }

        for ticket in transition.issue_tickets {
            state.tickets.insert(ticket.id, ticket);
        }

        let order_tickets: Vec<TicketId> = state
            .tickets
            .values()
            .filter(|t| t.order_id == order.id)
            .map(|t| t.id)
            .collect();
        if let Some(status) = transition.invalidate_tickets {
            for ticket_id in &order_tickets {
                if let Some(ticket) = state.tickets.get_mut(ticket_id)
                    && ticket.status == TicketStatus::Active
                {
                    ticket.status = status;
                }
            }
        }
        if transition.cancel_transfers {
            for transfer in state.transfers.values_mut().filter(|t| {
                t.status == TransferStatus::Pending && order_tickets.contains(&t.ticket_id)
            }) {
                transfer.status = TransferStatus::Cancelled;
                transfer.closed_at = Some(at);
            }
        }

        if let Some(attempt) = transition.payment_attempt {
            for previous in state
                .payment_attempts
                .values_mut()
                .filter(|a| a.order_id == order.id)
            {
                previous.superseded = true;
            }
            state.payment_attempts.insert(attempt.reference.clone(), attempt);
        }

        state.append_events(order.id, &transition.events);
        state.orders.insert(order.id, order.clone());

        Ok(TransitionOutcome {
            order,
            promo_over_limit,
            released_quantity,
        })
    }

    async fn order_events(&self, order_id: OrderId) -> Result<Vec<RecordedEvent>> {
        let state = self.state.read().await;
        Ok(state
            .order_events
            .iter()
            .filter(|e| e.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn payment_attempts(&self, order_id: OrderId) -> Result<Vec<PaymentAttempt>> {
        let state = self.state.read().await;
        let mut attempts: Vec<PaymentAttempt> = state
            .payment_attempts
            .values()
            .filter(|a| a.order_id == order_id)
            .cloned()
            .collect();
        attempts.sort_by_key(|a| a.attempt);
        Ok(attempts)
    }

    async fn pending_orders_created_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.status == OrderStatus::Pending && o.created_at < cutoff)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.created_at);
        orders.truncate(limit as usize);
        Ok(orders)
    }

    async fn get_ticket(&self, ticket_id: TicketId) -> Result<Option<Ticket>> {
        Ok(self.state.read().await.tickets.get(&ticket_id).cloned())
    }

    async fn find_ticket_by_number(&self, ticket_number: &str) -> Result<Option<Ticket>> {
        let state = self.state.read().await;
        Ok(state
            .tickets
            .values()
            .find(|t| t.ticket_number == ticket_number)
            .cloned())
    }

    async fn tickets_for_order(&self, order_id: OrderId) -> Result<Vec<Ticket>> {
        let state = self.state.read().await;
        let mut tickets: Vec<Ticket> = state
            .tickets
            .values()
            .filter(|t| t.order_id == order_id)
            .cloned()
            .collect();
        tickets.sort_by(|a, b| a.issued_at.cmp(&b.issued_at).then_with(|| a.ticket_number.cmp(&b.ticket_number)));
        Ok(tickets)
    }

    async fn check_in_ticket(
        &self,
        ticket_id: TicketId,
        code_revision: u32,
        at: DateTime<Utc>,
    ) -> Result<Option<Ticket>> {
        let mut state = self.state.write().await;
        let ticket = state
            .tickets
            .get_mut(&ticket_id)
            .ok_or_else(|| StoreError::not_found("ticket", ticket_id))?;
        if ticket.status != TicketStatus::Active
            || ticket.is_checked_in()
            || ticket.code_revision != code_revision
        {
            return Ok(None);
        }
        ticket.status = TicketStatus::Used;
        ticket.checked_in_at = Some(at);
        Ok(Some(ticket.clone()))
    }

    async fn create_transfer(&self, transfer: TicketTransfer) -> Result<TicketTransfer> {
        let mut state = self.state.write().await;
        if !state.tickets.contains_key(&transfer.ticket_id) {
            return Err(StoreError::not_found("ticket", transfer.ticket_id));
        }
        let pending = state
            .transfers
            .values()
            .any(|t| t.ticket_id == transfer.ticket_id && t.status == TransferStatus::Pending);
        if pending {
            return Err(StoreError::TransferAlreadyPending {
                ticket_id: transfer.ticket_id,
            });
        }
        state.transfers.insert(transfer.id, transfer.clone());
        Ok(transfer)
    }

    async fn get_transfer(&self, transfer_id: TransferId) -> Result<Option<TicketTransfer>> {
        Ok(self.state.read().await.transfers.get(&transfer_id).cloned())
    }

    async fn pending_transfer_for_ticket(&self, ticket_id: TicketId) -> Result<Option<TicketTransfer>> {
        let state = self.state.read().await;
        Ok(state
            .transfers
            .values()
            .find(|t| t.ticket_id == ticket_id && t.status == TransferStatus::Pending)
            .cloned())
    }

    async fn accept_transfer(
        &self,
        transfer_id: TransferId,
        ticket: Ticket,
        previous_revision: u32,
        at: DateTime<Utc>,
    ) -> Result<TicketTransfer> {
        let mut state = self.state.write().await;

        let transfer = state
            .transfers
            .get(&transfer_id)
            .ok_or_else(|| StoreError::not_found("ticket transfer", transfer_id))?;
        if transfer.status != TransferStatus::Pending || transfer.expires_at <= at {
            return Err(StoreError::conflict("ticket transfer", transfer_id));
        }
        let current = state
            .tickets
            .get(&ticket.id)
            .ok_or_else(|| StoreError::not_found("ticket", ticket.id))?;
        if current.status != TicketStatus::Active || current.code_revision != previous_revision {
            return Err(StoreError::conflict("ticket", ticket.id));
        }

        state.tickets.insert(ticket.id, ticket);
        let transfer = state
            .transfers
            .get_mut(&transfer_id)
            .ok_or_else(|| StoreError::not_found("ticket transfer", transfer_id))?;
        transfer.status = TransferStatus::Accepted;
        transfer.closed_at = Some(at);
        Ok(transfer.clone())
    }

    async fn close_transfer(
        &self,
        transfer_id: TransferId,
        status: TransferStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<TicketTransfer>> {
        let mut state = self.state.write().await;
        let transfer = state
            .transfers
            .get_mut(&transfer_id)
            .ok_or_else(|| StoreError::not_found("ticket transfer", transfer_id))?;
        if transfer.status != TransferStatus::Pending {
            return Ok(None);
        }
        transfer.status = status;
        transfer.closed_at = Some(at);
        Ok(Some(transfer.clone()))
    }

    async fn expire_transfers(&self, now: DateTime<Utc>) -> Result<Vec<TicketTransfer>> {
        let mut state = self.state.write().await;
        let mut expired = Vec::new();
        for transfer in state
            .transfers
            .values_mut()
            .filter(|t| t.status == TransferStatus::Pending && t.expires_at <= now)
        {
            transfer.status = TransferStatus::Expired;
            transfer.closed_at = Some(now);
            expired.push(transfer.clone());
        }
        Ok(expired)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
