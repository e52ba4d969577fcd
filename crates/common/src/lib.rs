//! Shared types for the ticketing core.

mod clock;
mod money;
mod types;

pub use clock::{Clock, FixedClock, SystemClock};
pub use money::{Currency, Money};
pub use types::{
    BuyerId, EventId, OrderId, OrganizerId, PromoCodeId, ReservationId, TicketId, TicketTypeId,
    TransferId, human_reference,
};
