//! Issued tickets.

use chrono::{DateTime, Utc};
use common::{BuyerId, EventId, OrderId, TicketId, TicketTypeId, human_reference};
use serde::{Deserialize, Serialize};

use crate::catalog::{Buyer, EventInfo};
use crate::code::{CodeClaims, TicketCodeSigner};
use crate::error::UnknownStatus;
use crate::order::Order;

/// Status of an issued ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    #[default]
    Active,
    /// Checked in at the door.
    Used,
    Cancelled,
    Refunded,
    /// Kept for compatibility with older records; never valid for entry.
    Transferred,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Active => "ACTIVE",
            TicketStatus::Used => "USED",
            TicketStatus::Cancelled => "CANCELLED",
            TicketStatus::Refunded => "REFUNDED",
            TicketStatus::Transferred => "TRANSFERRED",
        }
    }
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TicketStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(TicketStatus::Active),
            "USED" => Ok(TicketStatus::Used),
            "CANCELLED" => Ok(TicketStatus::Cancelled),
            "REFUNDED" => Ok(TicketStatus::Refunded),
            "TRANSFERRED" => Ok(TicketStatus::Transferred),
            other => Err(UnknownStatus::new("ticket", other)),
        }
    }
}

/// Why a presented ticket must not be admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryRejection {
    /// The ticket is not ACTIVE.
    NotActive,
    AlreadyCheckedIn,
    EventCancelled,
    /// The code was superseded by a transfer.
    StaleCode,
}

impl EntryRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryRejection::NotActive => "not_active",
            EntryRejection::AlreadyCheckedIn => "already_checked_in",
            EntryRejection::EventCancelled => "event_cancelled",
            EntryRejection::StaleCode => "stale_code",
        }
    }
}

/// One admission, issued per purchased seat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    /// Human-readable `TKT-` reference.
    pub ticket_number: String,
    pub order_id: OrderId,
    pub order_number: String,
    pub event_id: EventId,
    pub ticket_type_id: TicketTypeId,
    pub ticket_type_name: String,
    pub holder_id: BuyerId,
    pub attendee_name: String,
    pub attendee_email: String,
    pub status: TicketStatus,
    /// Signed scannable payload.
    pub code: String,
    pub code_revision: u32,
    pub checked_in_at: Option<DateTime<Utc>>,
    pub issued_at: DateTime<Utc>,
}

impl Ticket {
    pub fn is_checked_in(&self) -> bool {
        self.checked_in_at.is_some()
    }

    /// Claims the current code must carry.
    pub fn claims(&self) -> CodeClaims {
        CodeClaims {
            ticket_number: self.ticket_number.clone(),
            order_number: self.order_number.clone(),
            revision: self.code_revision,
        }
    }

    /// Checks whether a code with `claims` admits this ticket to `event`.
    pub fn entry_rejection(&self, claims: &CodeClaims, event: &EventInfo) -> Option<EntryRejection> {
        if claims.revision != self.code_revision || claims.order_number != self.order_number {
            Some(EntryRejection::StaleCode)
        } else if event.cancelled {
            Some(EntryRejection::EventCancelled)
        } else if self.status == TicketStatus::Used || self.is_checked_in() {
            Some(EntryRejection::AlreadyCheckedIn)
        } else if self.status != TicketStatus::Active {
            Some(EntryRejection::NotActive)
        } else {
            None
        }
    }

    /// Hands the ticket to `recipient` and rotates its code.
    pub fn reassign(&mut self, recipient: &Buyer, signer: &TicketCodeSigner) {
        self.holder_id = recipient.id;
        self.attendee_name = recipient.name.clone();
        self.attendee_email = recipient.email.clone();
        self.code_revision += 1;
        self.code = signer.sign(&self.claims());
    }
}

/// Issues one ticket per unit of quantity across the order's lines.
pub fn issue_tickets(order: &Order, signer: &TicketCodeSigner, now: DateTime<Utc>) -> Vec<Ticket> {
    let mut tickets = Vec::with_capacity(order.ticket_count() as usize);
    for item in &order.items {
        for _ in 0..item.quantity {
            let mut ticket = Ticket {
                id: TicketId::new(),
                ticket_number: human_reference("TKT"),
                order_id: order.id,
                order_number: order.order_number.clone(),
                event_id: order.event_id,
                ticket_type_id: item.ticket_type_id,
                ticket_type_name: item.ticket_type_name.clone(),
                holder_id: order.buyer.id,
                attendee_name: order.attendee.name.clone(),
                attendee_email: order.attendee.email.clone(),
                status: TicketStatus::Active,
                code: String::new(),
                code_revision: 0,
                checked_in_at: None,
                issued_at: now,
            };
            ticket.code = signer.sign(&ticket.claims());
            tickets.push(ticket);
        }
    }
    tickets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{FeePolicy, NewOrder, OrderItem};
    use chrono::Duration;
    use common::{Currency, Money, OrganizerId};
    use std::collections::HashSet;

    fn signer() -> TicketCodeSigner {
        TicketCodeSigner::new(b"secret").unwrap()
    }

    fn completed_order() -> Order {
        let request = NewOrder {
            event_id: EventId::new(),
            buyer: Buyer::new(BuyerId::new(), "Ada Obi", "ada@example.com"),
            attendee: None,
            items: vec![
                OrderItem::new(TicketTypeId::new(), "GA", 3, Money::zero()),
                OrderItem::new(TicketTypeId::new(), "VIP", 1, Money::zero()),
            ],
            discount: None,
            currency: Currency::new("NGN").unwrap(),
            fees: FeePolicy::none(),
            idempotency_key: None,
        };
        Order::place(request, Utc::now()).unwrap().0
    }

    fn event_for(order: &Order) -> EventInfo {
        EventInfo {
            id: order.event_id,
            organizer_id: OrganizerId::new(),
            name: "Show".to_string(),
            starts_at: Utc::now() + Duration::days(7),
            ends_at: None,
            cancelled: false,
            is_free: true,
        }
    }

    #[test]
    fn test_one_ticket_per_unit() {
        let order = completed_order();
        let tickets = issue_tickets(&order, &signer(), Utc::now());

        assert_eq!(tickets.len(), 4);
        let numbers: HashSet<_> = tickets.iter().map(|t| t.ticket_number.clone()).collect();
        assert_eq!(numbers.len(), 4);
        assert_eq!(
            tickets.iter().filter(|t| t.ticket_type_name == "GA").count(),
            3
        );
        assert!(tickets.iter().all(|t| t.status == TicketStatus::Active));
        assert!(tickets.iter().all(|t| t.attendee_email == "ada@example.com"));
    }

    #[test]
    fn test_issued_code_verifies() {
        let order = completed_order();
        let signer = signer();
        let ticket = issue_tickets(&order, &signer, Utc::now()).remove(0);

        let claims = signer.verify(&ticket.code).unwrap();
        assert_eq!(claims.ticket_number, ticket.ticket_number);
        assert_eq!(claims.order_number, order.order_number);
        assert_eq!(ticket.entry_rejection(&claims, &event_for(&order)), None);
    }

    #[test]
    fn test_reassign_rotates_code() {
        let order = completed_order();
        let signer = signer();
        let mut ticket = issue_tickets(&order, &signer, Utc::now()).remove(0);
        let old_claims = signer.verify(&ticket.code).unwrap();

        let friend = Buyer::new(BuyerId::new(), "Friend", "friend@example.com");
        ticket.reassign(&friend, &signer);

        assert_eq!(ticket.holder_id, friend.id);
        assert_eq!(ticket.attendee_email, "friend@example.com");
        assert_eq!(ticket.status, TicketStatus::Active);
        assert_eq!(
            ticket.entry_rejection(&old_claims, &event_for(&order)),
            Some(EntryRejection::StaleCode)
        );
        let new_claims = signer.verify(&ticket.code).unwrap();
        assert_eq!(ticket.entry_rejection(&new_claims, &event_for(&order)), None);
    }

    #[test]
    fn test_entry_rejections() {
        let order = completed_order();
        let signer = signer();
        let mut ticket = issue_tickets(&order, &signer, Utc::now()).remove(0);
        let claims = ticket.claims();
        let mut event = event_for(&order);

        ticket.status = TicketStatus::Transferred;
        assert_eq!(
            ticket.entry_rejection(&claims, &event),
            Some(EntryRejection::NotActive)
        );

        ticket.status = TicketStatus::Used;
        ticket.checked_in_at = Some(Utc::now());
        assert_eq!(
            ticket.entry_rejection(&claims, &event),
            Some(EntryRejection::AlreadyCheckedIn)
        );

        event.cancelled = true;
        assert_eq!(
            ticket.entry_rejection(&claims, &event),
            Some(EntryRejection::EventCancelled)
        );
    }

    #[test]
    fn test_ticket_status_parse() {
        assert_eq!("USED".parse::<TicketStatus>(), Ok(TicketStatus::Used));
        assert!("LOST".parse::<TicketStatus>().is_err());
    }
}
