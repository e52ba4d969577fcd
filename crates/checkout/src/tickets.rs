//! Ticket lookup, transfers, code verification and check-in.

use std::sync::Arc;

use common::{BuyerId, Clock, TicketId, TransferId};
use domain::{
    Buyer, CodeError, EntryRejection, EventInfo, Ticket, TicketCodeSigner, TicketTransfer,
    TransferError, TransferStatus, check_transferable,
};
use serde::Serialize;
use store::Store;

use crate::config::CheckoutConfig;
use crate::error::{CheckoutError, Result};
use crate::notify::{Notification, Notifier, dispatch};

/// Answer given to a check-in scanner.
#[derive(Debug, Clone, Serialize)]
pub struct Verification {
    pub valid: bool,
    /// Machine-readable reason when `valid` is false.
    pub reason: Option<String>,
    pub ticket: Option<Ticket>,
    pub event: Option<EventInfo>,
}

impl Verification {
    fn invalid(reason: &str) -> Self {
        Self {
            valid: false,
            reason: Some(reason.to_string()),
            ticket: None,
            event: None,
        }
    }
}

fn code_reason(err: &CodeError) -> &'static str {
    match err {
        CodeError::InvalidSignature => "invalid_signature",
        CodeError::Malformed | CodeError::InvalidKey => "malformed_code",
    }
}

/// A completed transfer and the reassigned ticket.
#[derive(Debug, Clone, Serialize)]
pub struct AcceptedTransfer {
    pub transfer: TicketTransfer,
    pub ticket: Ticket,
}

/// Tickets after issuance.
#[derive(Clone)]
pub struct TicketService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    signer: TicketCodeSigner,
    config: Arc<CheckoutConfig>,
}

impl TicketService {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        signer: TicketCodeSigner,
        config: Arc<CheckoutConfig>,
    ) -> Self {
        Self {
            store,
            clock,
            notifier,
            signer,
            config,
        }
    }

    /// Loads a ticket held by `requester`.
    pub async fn get_ticket(&self, ticket_id: TicketId, requester: BuyerId) -> Result<Ticket> {
        let ticket = self.load(ticket_id).await?;
        if ticket.holder_id != requester {
            return Err(CheckoutError::Forbidden(format!(
                "ticket {} is held by another buyer",
                ticket.ticket_number
            )));
        }
        Ok(ticket)
    }

    /// Offers a ticket to the owner of `recipient_email`.
    #[tracing::instrument(skip(self, recipient_email))]
    pub async fn initiate_transfer(
        &self,
        ticket_id: TicketId,
        requester: BuyerId,
        recipient_email: &str,
    ) -> Result<TicketTransfer> {
        let ticket = self.load(ticket_id).await?;
        let event = self.event(&ticket).await?;
        let now = self.clock.now();

        if let Some(pending) = self.store.pending_transfer_for_ticket(ticket.id).await? {
            if !pending.is_expired(now) {
                return Err(TransferError::AlreadyPending {
                    ticket_id: ticket.id,
                }
                .into());
            }
            self.store
                .close_transfer(pending.id, TransferStatus::Expired, now)
                .await?;
        }

        let transfer = TicketTransfer::initiate(
            &ticket,
            &event,
            requester,
            recipient_email,
            self.config.transfer_ttl,
            now,
        )?;
        let transfer = self.store.create_transfer(transfer).await?;

        metrics::counter!("transfers_initiated_total").increment(1);
        tracing::info!(
            ticket_number = %ticket.ticket_number,
            transfer_id = %transfer.id,
            expires_at = %transfer.expires_at,
            "Transfer offered"
        );
        dispatch(
            &self.notifier,
            Notification::TransferOffered {
                transfer_id: transfer.id,
                ticket_number: ticket.ticket_number.clone(),
                recipient_email: transfer.recipient_email.clone(),
                expires_at: transfer.expires_at,
            },
        );
        Ok(transfer)
    }

    /// Withdraws the pending transfer of a ticket.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_transfer(
        &self,
        ticket_id: TicketId,
        requester: BuyerId,
    ) -> Result<TicketTransfer> {
        let ticket = self.load(ticket_id).await?;
        if ticket.holder_id != requester {
            return Err(TransferError::NotHolder {
                ticket_id: ticket.id,
            }
            .into());
        }

        let no_pending = || TransferError::NoPendingTransfer {
            ticket_id: ticket.id,
        };
        let pending = self
            .store
            .pending_transfer_for_ticket(ticket.id)
            .await?
            .ok_or_else(no_pending)?;
        let closed = self
            .store
            .close_transfer(pending.id, TransferStatus::Cancelled, self.clock.now())
            .await?
            .ok_or_else(no_pending)?;

        metrics::counter!("transfers_closed_total", "status" => "cancelled").increment(1);
        tracing::info!(ticket_number = %ticket.ticket_number, transfer_id = %closed.id, "Transfer cancelled");
        Ok(closed)
    }

    /// Accepts a transfer on behalf of `recipient`.
    ///
    /// The ticket moves to the recipient with a rotated code, so the
    /// sender's copy stops verifying.
    #[tracing::instrument(skip(self, recipient), fields(recipient_id = %recipient.id))]
    pub async fn accept_transfer(
        &self,
        transfer_id: TransferId,
        recipient: &Buyer,
    ) -> Result<AcceptedTransfer> {
        let transfer = self
            .store
            .get_transfer(transfer_id)
            .await?
            .ok_or_else(|| CheckoutError::not_found("ticket transfer", transfer_id))?;
        let now = self.clock.now();

        if transfer.status == TransferStatus::Pending && transfer.is_expired(now) {
            self.store
                .close_transfer(transfer.id, TransferStatus::Expired, now)
                .await?;
            metrics::counter!("transfers_closed_total", "status" => "expired").increment(1);
            return Err(TransferError::Expired {
                transfer_id: transfer.id,
            }
            .into());
        }
        transfer.check_acceptance(recipient, now)?;

        let mut ticket = self.load(transfer.ticket_id).await?;
        let event = self.event(&ticket).await?;
        check_transferable(&ticket, &event, now)?;

        let previous_revision = ticket.code_revision;
        ticket.reassign(recipient, &self.signer);
        let transfer = self
            .store
            .accept_transfer(transfer.id, ticket.clone(), previous_revision, now)
            .await?;

        metrics::counter!("transfers_closed_total", "status" => "accepted").increment(1);
        tracing::info!(
            ticket_number = %ticket.ticket_number,
            transfer_id = %transfer.id,
            "Transfer accepted"
        );
        dispatch(
            &self.notifier,
            Notification::TransferAccepted {
                ticket_number: ticket.ticket_number.clone(),
                recipient_email: transfer.recipient_email.clone(),
            },
        );
        Ok(AcceptedTransfer { transfer, ticket })
    }

    /// Checks a scanned code without changing anything.
    #[tracing::instrument(skip_all)]
    pub async fn verify_code(&self, code: &str) -> Result<Verification> {
        let claims = match self.signer.verify(code) {
            Ok(claims) => claims,
            Err(err) => return Ok(Verification::invalid(code_reason(&err))),
        };
        let Some(ticket) = self.store.find_ticket_by_number(&claims.ticket_number).await? else {
            return Ok(Verification::invalid("unknown_ticket"));
        };
        let event = self.event(&ticket).await?;

        let rejection = ticket.entry_rejection(&claims, &event);
        Ok(Verification {
            valid: rejection.is_none(),
            reason: rejection.map(|r| r.as_str().to_string()),
            ticket: Some(ticket),
            event: Some(event),
        })
    }

    /// Admits the holder of `code`, marking the ticket USED.
    #[tracing::instrument(skip_all)]
    pub async fn check_in(&self, code: &str) -> Result<Ticket> {
        let claims = self.signer.verify(code)?;
        let ticket = self
            .store
            .find_ticket_by_number(&claims.ticket_number)
            .await?
            .ok_or_else(|| CheckoutError::not_found("ticket", &claims.ticket_number))?;
        let event = self.event(&ticket).await?;

        if let Some(reason) = ticket.entry_rejection(&claims, &event) {
            return Err(self.rejected(&ticket, reason));
        }

        match self
            .store
            .check_in_ticket(ticket.id, claims.revision, self.clock.now())
            .await?
        {
            Some(ticket) => {
                metrics::counter!("tickets_checked_in_total").increment(1);
                tracing::info!(ticket_number = %ticket.ticket_number, "Ticket checked in");
                Ok(ticket)
            }
            None => {
                // Lost a race with another scanner or a transfer.
                let current = self.load(ticket.id).await?;
                let reason = current
                    .entry_rejection(&claims, &event)
                    .unwrap_or(EntryRejection::AlreadyCheckedIn);
                Err(self.rejected(&current, reason))
            }
        }
    }

    fn rejected(&self, ticket: &Ticket, reason: EntryRejection) -> CheckoutError {
        metrics::counter!("check_ins_rejected_total", "reason" => reason.as_str()).increment(1);
        tracing::info!(ticket_number = %ticket.ticket_number, reason = reason.as_str(), "Entry refused");
        CheckoutError::EntryRejected {
            ticket_number: ticket.ticket_number.clone(),
            reason,
        }
    }

    async fn load(&self, ticket_id: TicketId) -> Result<Ticket> {
        self.store
            .get_ticket(ticket_id)
            .await?
            .ok_or_else(|| CheckoutError::not_found("ticket", ticket_id))
    }

    async fn event(&self, ticket: &Ticket) -> Result<EventInfo> {
        self.store
            .get_event(ticket.event_id)
            .await?
            .ok_or_else(|| CheckoutError::not_found("event", ticket.event_id))
    }
}
