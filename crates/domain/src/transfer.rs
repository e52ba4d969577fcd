//! Peer-to-peer ticket transfers.

use chrono::{DateTime, Duration, Utc};
use common::{BuyerId, TicketId, TransferId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::{Buyer, EventInfo, is_plausible_email, normalize_email};
use crate::error::UnknownStatus;
use crate::ticket::{Ticket, TicketStatus};

/// Status of a transfer intent. Everything but `Pending` is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    #[default]
    Pending,
    Accepted,
    Expired,
    Cancelled,
}

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransferStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "PENDING",
            TransferStatus::Accepted => "ACCEPTED",
            TransferStatus::Expired => "EXPIRED",
            TransferStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TransferStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TransferStatus::Pending),
            "ACCEPTED" => Ok(TransferStatus::Accepted),
            "EXPIRED" => Ok(TransferStatus::Expired),
            "CANCELLED" => Ok(TransferStatus::Cancelled),
            other => Err(UnknownStatus::new("transfer", other)),
        }
    }
}

/// Why a ticket cannot currently be transferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ineligibility {
    NotActive(TicketStatus),
    CheckedIn,
    EventStarted,
    EventCancelled,
    SameRecipient,
}

impl std::fmt::Display for Ineligibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Ineligibility::NotActive(status) => write!(f, "ticket is {status}"),
            Ineligibility::CheckedIn => write!(f, "ticket is already checked in"),
            Ineligibility::EventStarted => write!(f, "event has already started"),
            Ineligibility::EventCancelled => write!(f, "event is cancelled"),
            Ineligibility::SameRecipient => write!(f, "recipient already holds the ticket"),
        }
    }
}

/// Errors raised by transfer operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("ticket {ticket_id} cannot be transferred: {reason}")]
    TicketNotEligible {
        ticket_id: TicketId,
        reason: Ineligibility,
    },

    #[error("ticket {ticket_id} already has a pending transfer")]
    AlreadyPending { ticket_id: TicketId },

    #[error("transfer {transfer_id} has expired")]
    Expired { transfer_id: TransferId },

    #[error("transfer {transfer_id} is {status}")]
    NotPending {
        transfer_id: TransferId,
        status: TransferStatus,
    },

    #[error("transfer {transfer_id} was sent to a different recipient")]
    RecipientMismatch { transfer_id: TransferId },

    #[error("only the current holder may transfer ticket {ticket_id}")]
    NotHolder { ticket_id: TicketId },

    #[error("invalid recipient email: {email}")]
    InvalidRecipient { email: String },

    #[error("ticket {ticket_id} has no pending transfer")]
    NoPendingTransfer { ticket_id: TicketId },
}

impl TransferError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::TicketNotEligible { .. } => "ticket_not_eligible",
            TransferError::AlreadyPending { .. } => "transfer_already_pending",
            TransferError::Expired { .. } => "transfer_expired",
            TransferError::NotPending { .. } => "transfer_not_pending",
            TransferError::RecipientMismatch { .. } => "transfer_recipient_mismatch",
            TransferError::NotHolder { .. } => "not_ticket_holder",
            TransferError::InvalidRecipient { .. } => "invalid_recipient",
            TransferError::NoPendingTransfer { .. } => "no_pending_transfer",
        }
    }
}

/// Checks the ticket-side conditions for moving a ticket to someone else.
pub fn check_transferable(
    ticket: &Ticket,
    event: &EventInfo,
    now: DateTime<Utc>,
) -> Result<(), TransferError> {
    let reason = if ticket.status != TicketStatus::Active {
        Some(Ineligibility::NotActive(ticket.status))
    } else if ticket.is_checked_in() {
        Some(Ineligibility::CheckedIn)
    } else if event.cancelled {
        Some(Ineligibility::EventCancelled)
    } else if event.has_started(now) {
        Some(Ineligibility::EventStarted)
    } else {
        None
    };

    match reason {
        Some(reason) => Err(TransferError::TicketNotEligible {
            ticket_id: ticket.id,
            reason,
        }),
        None => Ok(()),
    }
}

/// An intent to hand a ticket to the owner of `recipient_email`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketTransfer {
    pub id: TransferId,
    pub ticket_id: TicketId,
    pub sender_id: BuyerId,
    /// Lower-cased.
    pub recipient_email: String,
    pub status: TransferStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl TicketTransfer {
    /// Opens a transfer of `ticket` on behalf of `requester`.
    ///
    /// The single-pending-transfer rule is enforced by the store.
    pub fn initiate(
        ticket: &Ticket,
        event: &EventInfo,
        requester: BuyerId,
        recipient_email: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Self, TransferError> {
        if ticket.holder_id != requester {
            return Err(TransferError::NotHolder {
                ticket_id: ticket.id,
            });
        }
        if !is_plausible_email(recipient_email) {
            return Err(TransferError::InvalidRecipient {
                email: recipient_email.to_string(),
            });
        }
        check_transferable(ticket, event, now)?;

        let recipient_email = normalize_email(recipient_email);
        if recipient_email == normalize_email(&ticket.attendee_email) {
            return Err(TransferError::TicketNotEligible {
                ticket_id: ticket.id,
                reason: Ineligibility::SameRecipient,
            });
        }

        Ok(Self {
            id: TransferId::new(),
            ticket_id: ticket.id,
            sender_id: requester,
            recipient_email,
            status: TransferStatus::Pending,
            expires_at: now + ttl,
            created_at: now,
            closed_at: None,
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Checks that `recipient` may accept this transfer at `now`.
    pub fn check_acceptance(&self, recipient: &Buyer, now: DateTime<Utc>) -> Result<(), TransferError> {
        if self.status != TransferStatus::Pending {
            return Err(TransferError::NotPending {
                transfer_id: self.id,
                status: self.status,
            });
        }
        if self.is_expired(now) {
            return Err(TransferError::Expired {
                transfer_id: self.id,
            });
        }
        if !recipient.has_email(&self.recipient_email) {
            return Err(TransferError::RecipientMismatch {
                transfer_id: self.id,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{EventId, OrderId, OrganizerId, TicketTypeId};

    fn ticket(holder: BuyerId) -> Ticket {
        Ticket {
            id: TicketId::new(),
            ticket_number: "TKT-000000000001".to_string(),
            order_id: OrderId::new(),
            order_number: "ORD-000000000001".to_string(),
            event_id: EventId::new(),
            ticket_type_id: TicketTypeId::new(),
            ticket_type_name: "GA".to_string(),
            holder_id: holder,
            attendee_name: "Ada".to_string(),
            attendee_email: "ada@example.com".to_string(),
            status: TicketStatus::Active,
            code: String::new(),
            code_revision: 0,
            checked_in_at: None,
            issued_at: Utc::now(),
        }
    }

    fn event(starts_in: Duration) -> EventInfo {
        EventInfo {
            id: EventId::new(),
            organizer_id: OrganizerId::new(),
            name: "Show".to_string(),
            starts_at: Utc::now() + starts_in,
            ends_at: None,
            cancelled: false,
            is_free: false,
        }
    }

    #[test]
    fn test_initiate_normalises_recipient() {
        let holder = BuyerId::new();
        let now = Utc::now();
        let transfer = TicketTransfer::initiate(
            &ticket(holder),
            &event(Duration::days(3)),
            holder,
            " Friend@Example.com",
            Duration::hours(72),
            now,
        )
        .unwrap();

        assert_eq!(transfer.recipient_email, "friend@example.com");
        assert_eq!(transfer.status, TransferStatus::Pending);
        assert_eq!(transfer.expires_at, now + Duration::hours(72));
    }

    #[test]
    fn test_initiate_requires_holder() {
        let t = ticket(BuyerId::new());
        let err = TicketTransfer::initiate(
            &t,
            &event(Duration::days(3)),
            BuyerId::new(),
            "friend@example.com",
            Duration::hours(72),
            Utc::now(),
        )
        .unwrap_err();
        assert_eq!(err.code(), "not_ticket_holder");
    }

    #[test]
    fn test_initiate_rejects_ineligible_tickets() {
        let holder = BuyerId::new();
        let now = Utc::now();
        let ttl = Duration::hours(72);

        let mut used = ticket(holder);
        used.checked_in_at = Some(now);
        let err = TicketTransfer::initiate(&used, &event(Duration::days(1)), holder, "f@example.com", ttl, now)
            .unwrap_err();
        assert!(matches!(
            err,
            TransferError::TicketNotEligible {
                reason: Ineligibility::CheckedIn,
                ..
            }
        ));

        let started = event(-Duration::minutes(5));
        let err = TicketTransfer::initiate(&ticket(holder), &started, holder, "f@example.com", ttl, now)
            .unwrap_err();
        assert!(matches!(
            err,
            TransferError::TicketNotEligible {
                reason: Ineligibility::EventStarted,
                ..
            }
        ));

        let err = TicketTransfer::initiate(
            &ticket(holder),
            &event(Duration::days(1)),
            holder,
            "ADA@example.com",
            ttl,
            now,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            TransferError::TicketNotEligible {
                reason: Ineligibility::SameRecipient,
                ..
            }
        ));

        let err = TicketTransfer::initiate(&ticket(holder), &event(Duration::days(1)), holder, "nope", ttl, now)
            .unwrap_err();
        assert_eq!(err.code(), "invalid_recipient");
    }

    #[test]
    fn test_acceptance_checks() {
        let holder = BuyerId::new();
        let now = Utc::now();
        let mut transfer = TicketTransfer::initiate(
            &ticket(holder),
            &event(Duration::days(3)),
            holder,
            "friend@example.com",
            Duration::hours(1),
            now,
        )
        .unwrap();

        let friend = Buyer::new(BuyerId::new(), "Friend", "FRIEND@example.com");
        let stranger = Buyer::new(BuyerId::new(), "Stranger", "stranger@example.com");

        assert!(transfer.check_acceptance(&friend, now).is_ok());
        assert_eq!(
            transfer.check_acceptance(&stranger, now).unwrap_err().code(),
            "transfer_recipient_mismatch"
        );
        assert_eq!(
            transfer
                .check_acceptance(&friend, now + Duration::hours(1))
                .unwrap_err()
                .code(),
            "transfer_expired"
        );

        transfer.status = TransferStatus::Cancelled;
        assert_eq!(
            transfer.check_acceptance(&friend, now).unwrap_err().code(),
            "transfer_not_pending"
        );
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!TransferStatus::Pending.is_terminal());
        assert!(TransferStatus::Accepted.is_terminal());
        assert!(TransferStatus::Expired.is_terminal());
        assert!(TransferStatus::Cancelled.is_terminal());
        assert_eq!("EXPIRED".parse::<TransferStatus>(), Ok(TransferStatus::Expired));
    }
}
