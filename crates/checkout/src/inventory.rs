//! Inventory ledger.
//!
//! The capacity decision itself belongs to the store's conditional update;
//! the ledger adds the sale-window and per-order checks and the metrics.

use std::sync::Arc;

use common::{Clock, ReservationId, TicketTypeId};
use domain::{InsufficientInventory, TicketType};
use store::{Reservation, Store, StoreError};

use crate::error::{CheckoutError, Result};

pub(crate) fn record_rejection(err: &InsufficientInventory) {
    metrics::counter!("inventory_reservations_rejected_total", "reason" => err.code())
        .increment(1);
}

/// Reserves, releases and restocks ticket-type capacity.
#[derive(Clone)]
pub struct InventoryLedger {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl InventoryLedger {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Checks everything but capacity for `quantity` units of `ticket_type`.
    pub fn check(&self, ticket_type: &TicketType, quantity: u32) -> Result<()> {
        ticket_type
            .check_request(quantity, self.clock.now())
            .map_err(|err| {
                record_rejection(&err);
                CheckoutError::Inventory(err)
            })
    }

    /// Claims `quantity` units outside of an order.
    #[tracing::instrument(skip(self))]
    pub async fn reserve(&self, ticket_type_id: TicketTypeId, quantity: u32) -> Result<Reservation> {
        let ticket_type = self
            .store
            .get_ticket_type(ticket_type_id)
            .await?
            .ok_or_else(|| CheckoutError::not_found("ticket type", ticket_type_id))?;
        self.check(&ticket_type, quantity)?;

        match self
            .store
            .reserve(ReservationId::new(), ticket_type_id, quantity, self.clock.now())
            .await
        {
            Ok(reservation) => {
                metrics::counter!("inventory_reserved_total").increment(u64::from(quantity));
                Ok(reservation)
            }
            Err(StoreError::Inventory(err)) => {
                record_rejection(&err);
                tracing::info!(reason = err.code(), "Reservation refused");
                Err(err.into())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Returns a reservation's seats to sale.
    ///
    /// Releasing twice, or releasing a committed reservation, is a no-op;
    /// committed seats only come back through order cancellation.
    #[tracing::instrument(skip(self))]
    pub async fn release(&self, reservation_id: ReservationId) -> Result<bool> {
        let reservation = self
            .store
            .get_reservation(reservation_id)
            .await?
            .ok_or_else(|| CheckoutError::not_found("reservation", reservation_id))?;
        if reservation.committed_at.is_some() {
            return Ok(false);
        }
        let released = self.store.release(reservation_id, self.clock.now()).await?;
        if released {
            metrics::counter!("inventory_released_total").increment(1);
        }
        Ok(released)
    }

    /// Marks a reservation as committed.
    #[tracing::instrument(skip(self))]
    pub async fn commit(&self, reservation_id: ReservationId) -> Result<bool> {
        Ok(self.store.commit(reservation_id, self.clock.now()).await?)
    }

    /// Organizer-initiated decrement of the sold counter, floored at zero.
    #[tracing::instrument(skip(self))]
    pub async fn restock(&self, ticket_type_id: TicketTypeId, quantity: u32) -> Result<TicketType> {
        if quantity == 0 {
            return Err(InsufficientInventory::InvalidQuantity { ticket_type_id }.into());
        }
        let ticket_type = self.store.restock(ticket_type_id, quantity).await?;
        tracing::info!(sold = ticket_type.quantity_sold, "Ticket type restocked");
        Ok(ticket_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use common::{Currency, EventId, FixedClock, Money, OrganizerId};
    use domain::EventInfo;
    use store::InMemoryStore;

    async fn ledger_with(quantity: u32, max_per_order: u32) -> (InventoryLedger, TicketType, FixedClock) {
        let store = Arc::new(InMemoryStore::new());
        let event = EventInfo {
            id: EventId::new(),
            organizer_id: OrganizerId::new(),
            name: "Show".to_string(),
            starts_at: Utc::now() + Duration::days(7),
            ends_at: None,
            cancelled: false,
            is_free: false,
        };
        store.upsert_event(event.clone()).await.unwrap();
        let tt = store
            .insert_ticket_type(TicketType::new(
                event.id,
                "GA",
                Money::from_minor(1_000),
                Currency::new("NGN").unwrap(),
                quantity,
                max_per_order,
            ))
            .await
            .unwrap();
        let clock = FixedClock::new(Utc::now());
        let ledger = InventoryLedger::new(store, Arc::new(clock.clone()));
        (ledger, tt, clock)
    }

    #[tokio::test]
    async fn test_reserve_release_is_idempotent() {
        let (ledger, tt, _) = ledger_with(3, 3).await;

        let reservation = ledger.reserve(tt.id, 3).await.unwrap();
        let err = ledger.reserve(tt.id, 1).await.unwrap_err();
        assert_eq!(err.code(), "sold_out");

        assert!(ledger.release(reservation.id).await.unwrap());
        assert!(!ledger.release(reservation.id).await.unwrap());
        ledger.reserve(tt.id, 3).await.unwrap();
    }

    #[tokio::test]
    async fn test_typed_rejections() {
        let (ledger, tt, _) = ledger_with(10, 2).await;

        let err = ledger.reserve(tt.id, 0).await.unwrap_err();
        assert_eq!(err.code(), "invalid_quantity");

        let err = ledger.reserve(tt.id, 3).await.unwrap_err();
        assert_eq!(err.code(), "exceeds_per_order_cap");
    }

    #[tokio::test]
    async fn test_closed_window_rejected() {
        let (ledger, mut tt, clock) = ledger_with(10, 2).await;
        tt.sale_ends_at = Some(clock.now() - Duration::minutes(1));
        let err = ledger.check(&tt, 1).unwrap_err();
        assert_eq!(err.code(), "sale_window_closed");
    }

    #[tokio::test]
    async fn test_committed_reservation_is_not_released() {
        let (ledger, tt, _) = ledger_with(5, 5).await;
        let reservation = ledger.reserve(tt.id, 2).await.unwrap();
        assert!(ledger.commit(reservation.id).await.unwrap());
        assert!(!ledger.commit(reservation.id).await.unwrap());
        assert!(!ledger.release(reservation.id).await.unwrap());
        let err = ledger.reserve(tt.id, 4).await.unwrap_err();
        assert_eq!(err.code(), "sold_out");

        let restocked = ledger.restock(tt.id, 5).await.unwrap();
        assert_eq!(restocked.quantity_sold, 0);
    }
}
