//! Capacity-tracked ticket types.

use chrono::{DateTime, Utc};
use common::{Currency, EventId, Money, TicketTypeId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sale status derived from the sale window and sold counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaleStatus {
    NotStarted,
    OnSale,
    SoldOut,
    Ended,
}

impl SaleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaleStatus::NotStarted => "not_started",
            SaleStatus::OnSale => "on_sale",
            SaleStatus::SoldOut => "sold_out",
            SaleStatus::Ended => "ended",
        }
    }
}

impl std::fmt::Display for SaleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reasons a reservation request is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InsufficientInventory {
    #[error("ticket type {ticket_type_id} is sold out: requested {requested}, {available} left")]
    SoldOut {
        ticket_type_id: TicketTypeId,
        requested: u32,
        available: u32,
    },

    #[error(
        "requested {requested} tickets of {ticket_type_id}, at most {max_per_order} allowed per order"
    )]
    ExceedsPerOrderCap {
        ticket_type_id: TicketTypeId,
        requested: u32,
        max_per_order: u32,
    },

    #[error("sales for ticket type {ticket_type_id} are closed ({status})")]
    SaleWindowClosed {
        ticket_type_id: TicketTypeId,
        status: SaleStatus,
    },

    #[error("invalid quantity for ticket type {ticket_type_id}: must be greater than 0")]
    InvalidQuantity { ticket_type_id: TicketTypeId },
}

impl InsufficientInventory {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            InsufficientInventory::SoldOut { .. } => "sold_out",
            InsufficientInventory::ExceedsPerOrderCap { .. } => "exceeds_per_order_cap",
            InsufficientInventory::SaleWindowClosed { .. } => "sale_window_closed",
            InsufficientInventory::InvalidQuantity { .. } => "invalid_quantity",
        }
    }
}

/// A priced category of admission with a finite capacity.
///
/// `quantity_sold` is only ever changed by the store's conditional updates;
/// the value held here is a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketType {
    pub id: TicketTypeId,
    pub event_id: EventId,
    pub name: String,
    pub unit_price: Money,
    pub currency: Currency,
    pub quantity: u32,
    pub quantity_sold: u32,
    pub max_per_order: u32,
    pub sale_starts_at: Option<DateTime<Utc>>,
    pub sale_ends_at: Option<DateTime<Utc>>,
}

impl TicketType {
    /// Creates a ticket type with an open sale window and nothing sold.
    pub fn new(
        event_id: EventId,
        name: impl Into<String>,
        unit_price: Money,
        currency: Currency,
        quantity: u32,
        max_per_order: u32,
    ) -> Self {
        Self {
            id: TicketTypeId::new(),
            event_id,
            name: name.into(),
            unit_price,
            currency,
            quantity,
            quantity_sold: 0,
            max_per_order,
            sale_starts_at: None,
            sale_ends_at: None,
        }
    }

    /// Sets the sale window.
    pub fn with_sale_window(
        mut self,
        starts_at: Option<DateTime<Utc>>,
        ends_at: Option<DateTime<Utc>>,
    ) -> Self {
        self.sale_starts_at = starts_at;
        self.sale_ends_at = ends_at;
        self
    }

    /// Seats not yet sold or reserved.
    pub fn remaining(&self) -> u32 {
        self.quantity.saturating_sub(self.quantity_sold)
    }

    /// Derives the sale status at `now`.
    ///
    /// The window is checked before capacity: an ended sale reports `ended`
    /// even when every seat is sold.
    pub fn status(&self, now: DateTime<Utc>) -> SaleStatus {
        if self.sale_ends_at.is_some_and(|end| now >= end) {
            SaleStatus::Ended
        } else if self.sale_starts_at.is_some_and(|start| now < start) {
            SaleStatus::NotStarted
        } else if self.quantity_sold >= self.quantity {
            SaleStatus::SoldOut
        } else {
            SaleStatus::OnSale
        }
    }

    /// Returns true if the sale window is open at `now`.
    pub fn is_window_open(&self, now: DateTime<Utc>) -> bool {
        !matches!(self.status(now), SaleStatus::Ended | SaleStatus::NotStarted)
    }

    /// Validates a reservation request against everything except capacity.
    ///
    /// Capacity is decided by the store's conditional increment, which
    /// reports `SoldOut` itself.
    pub fn check_request(
        &self,
        quantity: u32,
        now: DateTime<Utc>,
    ) -> Result<(), InsufficientInventory> {
        if quantity == 0 {
            return Err(InsufficientInventory::InvalidQuantity {
                ticket_type_id: self.id,
            });
        }

        let status = self.status(now);
        if matches!(status, SaleStatus::Ended | SaleStatus::NotStarted) {
            return Err(InsufficientInventory::SaleWindowClosed {
                ticket_type_id: self.id,
                status,
            });
        }

        if quantity > self.max_per_order {
            return Err(InsufficientInventory::ExceedsPerOrderCap {
                ticket_type_id: self.id,
                requested: quantity,
                max_per_order: self.max_per_order,
            });
        }

        Ok(())
    }

    /// Builds the sold-out error for this type given the current counter.
    pub fn sold_out(&self, requested: u32) -> InsufficientInventory {
        InsufficientInventory::SoldOut {
            ticket_type_id: self.id,
            requested,
            available: self.remaining(),
        }
    }
}
