//! Domain layer for the ticketing core.
//!
//! This crate is pure: no IO, no clocks. It provides:
//! - Ticket types with derived sale status and reservation validation
//! - The promo code evaluator
//! - The order aggregate and its state machine
//! - Ticket issuance, signed scannable codes and transfers

pub mod aggregate;
pub mod catalog;
pub mod code;
pub mod error;
pub mod order;
pub mod promo;
pub mod ticket;
pub mod ticket_type;
pub mod transfer;

pub use aggregate::{Aggregate, DomainEvent};
pub use catalog::{Buyer, EventInfo, is_plausible_email, normalize_email};
pub use code::{CodeClaims, CodeError, TicketCodeSigner};
pub use error::UnknownStatus;
pub use order::{
    Attendee, FailureReason, FeePolicy, NewOrder, Order, OrderError, OrderEvent, OrderItem,
    OrderStatus, OrderTotals, compute_totals,
};
pub use promo::{CandidateItem, Discount, DiscountKind, PromoCode, PromoError, evaluate};
pub use ticket::{EntryRejection, Ticket, TicketStatus, issue_tickets};
pub use ticket_type::{InsufficientInventory, SaleStatus, TicketType};
pub use transfer::{
    Ineligibility, TicketTransfer, TransferError, TransferStatus, check_transferable,
};
