//! Value objects for the order domain.

use common::{Money, ReservationId, TicketTypeId};
use serde::{Deserialize, Serialize};

use crate::catalog::Buyer;

/// A priced line of an order.
///
/// `unit_price` and `ticket_type_name` are snapshots taken at creation;
/// later catalog edits never change an existing order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub ticket_type_id: TicketTypeId,
    pub ticket_type_name: String,
    pub quantity: u32,
    pub unit_price: Money,
    /// Token of the inventory reservation backing this line.
    pub reservation_id: ReservationId,
}

impl OrderItem {
    pub fn new(
        ticket_type_id: TicketTypeId,
        ticket_type_name: impl Into<String>,
        quantity: u32,
        unit_price: Money,
    ) -> Self {
        Self {
            ticket_type_id,
            ticket_type_name: ticket_type_name.into(),
            quantity,
            unit_price,
            reservation_id: ReservationId::new(),
        }
    }

    /// Returns `unit_price * quantity`.
    pub fn line_total(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

/// Name and email printed on issued tickets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendee {
    pub name: String,
    pub email: String,
}

impl From<&Buyer> for Attendee {
    fn from(buyer: &Buyer) -> Self {
        Self {
            name: buyer.name.clone(),
            email: buyer.email.clone(),
        }
    }
}
