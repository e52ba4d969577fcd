//! Order lifecycle.
//!
//! Every state change goes through `Store::transition_order`, guarded by the
//! status the order had when it was loaded. A caller that loses the race gets
//! `StatusConflict`; the reconciliation and sweep paths treat that as "someone
//! else already moved it" and return the stored order instead.

use std::sync::Arc;
use std::time::Instant;

use common::{BuyerId, Clock, EventId, OrderId, OrganizerId};
use domain::{
    Aggregate, Attendee, Buyer, FailureReason, NewOrder, Order, OrderError, OrderStatus,
    PromoError, Ticket, TicketCodeSigner, TicketStatus, issue_tickets,
};
use serde::Serialize;
use store::{
    IdempotencyClaim, InventoryEffect, NewOrderRecord, OrderTransition, PaymentAttempt,
    PlaceOutcome, RecordedEvent, Store, StoreError,
};

use crate::catalog::{CatalogService, LineRequest};
use crate::config::CheckoutConfig;
use crate::error::{CheckoutError, Result};
use crate::inventory::{InventoryLedger, record_rejection};
use crate::notify::{Notification, Notifier, dispatch};
use crate::payment::{PaymentGateway, PaymentIntent, PaymentRequest};
use crate::promo::PromoService;

const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

/// A fully formed checkout request.
#[derive(Debug, Clone)]
pub struct CreateOrder {
    pub event_id: EventId,
    pub buyer: Buyer,
    pub lines: Vec<LineRequest>,
    pub promo_code: Option<String>,
    /// Defaults to the buyer.
    pub attendee: Option<Attendee>,
    pub idempotency_key: Option<String>,
}

/// Result of `create_order`.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutOutcome {
    pub order: Order,
    /// Present while the order awaits payment.
    pub payment: Option<PaymentIntent>,
    /// Issued tickets, for orders that completed at creation.
    pub tickets: Vec<Ticket>,
    /// True when an idempotency key matched an earlier order.
    pub replayed: bool,
}

/// Who is asking for a cancellation or refund.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Buyer(BuyerId),
    Organizer(OrganizerId),
}

/// Creates orders and drives them through their lifecycle.
#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn Store>,
    gateway: Arc<dyn PaymentGateway>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    signer: TicketCodeSigner,
    config: Arc<CheckoutConfig>,
    catalog: CatalogService,
    promos: PromoService,
    inventory: InventoryLedger,
}

impl OrderService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        signer: TicketCodeSigner,
        config: Arc<CheckoutConfig>,
        catalog: CatalogService,
        promos: PromoService,
        inventory: InventoryLedger,
    ) -> Self {
        Self {
            store,
            gateway,
            clock,
            notifier,
            signer,
            config,
            catalog,
            promos,
            inventory,
        }
    }

    /// Validates, prices, reserves and persists a new order.
    ///
    /// Paid orders are left PENDING with a payment intent; free orders
    /// complete immediately and come back with their tickets. Nothing is
    /// persisted when any check fails.
    #[tracing::instrument(
        skip(self, request),
        fields(event_id = %request.event_id, buyer_id = %request.buyer.id)
    )]
    pub async fn create_order(&self, request: CreateOrder) -> Result<CheckoutOutcome> {
        let started = Instant::now();
        let result = self.place(request).await;
        metrics::histogram!("checkout_duration_seconds").record(started.elapsed().as_secs_f64());
        result
    }

    async fn place(&self, request: CreateOrder) -> Result<CheckoutOutcome> {
        let idempotency_key = match request.idempotency_key.as_deref().map(str::trim) {
            Some("") | None => None,
            Some(key) if key.len() > MAX_IDEMPOTENCY_KEY_LEN => {
                return Err(CheckoutError::Validation(format!(
                    "idempotency key longer than {MAX_IDEMPOTENCY_KEY_LEN} characters"
                )));
            }
            Some(key) => Some(key.to_string()),
        };
        let now = self.clock.now();
        let claim = idempotency_key.map(|key| IdempotencyClaim {
            buyer_id: request.buyer.id,
            key,
            not_before: now - self.config.idempotency_window,
        });

        // A retry gets the original order back, whatever the catalog says now.
        if let Some(claim) = &claim
            && let Some(existing) = self.store.find_idempotent_order(claim).await?
        {
            return self.replay(existing).await;
        }

        let event = self.catalog.get_event(request.event_id).await?;
        if event.cancelled {
            return Err(OrderError::EventCancelled { event_id: event.id }.into());
        }

        let basket = self.catalog.price_lines(&event, &request.lines).await?;
        for (item, ticket_type) in basket.items.iter().zip(&basket.ticket_types) {
            self.inventory.check(ticket_type, item.quantity)?;
        }

        let discount = match request.promo_code.as_deref().map(str::trim) {
            Some(code) if !code.is_empty() => {
                Some(self.promos.evaluate(event.id, code, &basket).await?)
            }
            _ => None,
        };

        let (order, events) = Order::place(
            NewOrder {
                event_id: event.id,
                buyer: request.buyer.clone(),
                attendee: request.attendee,
                items: basket.items,
                discount,
                currency: basket.currency,
                fees: self.config.fees,
                idempotency_key: claim.as_ref().map(|c| c.key.clone()),
            },
            now,
        )?;

        let completed = order.status == OrderStatus::Completed;
        let tickets = if completed {
            issue_tickets(&order, &self.signer, now)
        } else {
            Vec::new()
        };
        let record = NewOrderRecord {
            redeem_promo: completed && order.promo_code_id.is_some(),
            idempotency: claim,
            order: order.clone(),
            events,
            tickets: tickets.clone(),
        };

        let outcome = match self.store.place_order(record).await {
            Ok(outcome) => outcome,
            Err(StoreError::Inventory(err)) => {
                record_rejection(&err);
                tracing::info!(reason = err.code(), "Checkout refused");
                return Err(err.into());
            }
            Err(StoreError::PromoUsageExhausted { .. }) => {
                return Err(PromoError::UsageLimitReached {
                    code: order.promo_code.clone().unwrap_or_default(),
                }
                .into());
            }
            Err(err) => return Err(err.into()),
        };

        let order = match outcome {
            PlaceOutcome::Existing(existing) => return self.replay(existing).await,
            PlaceOutcome::Created(order) => order,
        };
        metrics::counter!("orders_created_total", "kind" => if completed { "free" } else { "paid" })
            .increment(1);
        tracing::info!(
            order_number = %order.order_number,
            total = %order.totals.total,
            status = %order.status,
            "Order placed"
        );

        if completed {
            metrics::counter!("orders_completed_total").increment(1);
            self.announce_tickets(&order, &tickets);
            return Ok(CheckoutOutcome {
                order,
                payment: None,
                tickets,
                replayed: false,
            });
        }

        let (order, payment) = match self.open_payment(&order).await {
            Ok((order, intent)) => (order, Some(intent)),
            Err(CheckoutError::Gateway(err)) => {
                tracing::warn!(
                    order_number = %order.order_number,
                    error = %err,
                    "Payment initiation failed; order left pending"
                );
                let order = self.load(order.id).await?;
                (order, None)
            }
            Err(err) => return Err(err),
        };

        Ok(CheckoutOutcome {
            order,
            payment,
            tickets: Vec::new(),
            replayed: false,
        })
    }

    /// Rebuilds the response for an order created by an earlier request.
    async fn replay(&self, order: Order) -> Result<CheckoutOutcome> {
        tracing::info!(order_number = %order.order_number, "Idempotent replay");
        metrics::counter!("orders_replayed_total").increment(1);

        let tickets = self.store.tickets_for_order(order.id).await?;
        let payment = if order.status.is_pending() {
            let attempts = self.store.payment_attempts(order.id).await?;
            attempts
                .into_iter()
                .filter(|attempt| !attempt.superseded)
                .max_by_key(|attempt| attempt.attempt)
                .map(|attempt| PaymentIntent {
                    reference: attempt.reference,
                    amount: attempt.amount,
                    currency: attempt.currency,
                    checkout_url: None,
                })
        } else {
            None
        };

        Ok(CheckoutOutcome {
            order,
            payment,
            tickets,
            replayed: true,
        })
    }

    /// Records a new payment attempt on a PENDING order, then opens the
    /// matching intent with the gateway.
    pub(crate) async fn open_payment(&self, order: &Order) -> Result<(Order, PaymentIntent)> {
        let now = self.clock.now();
        let events = order.request_payment(now)?;
        let mut updated = order.clone();
        updated.apply_events(events.clone());

        let reference = updated
            .payment_reference
            .clone()
            .ok_or_else(|| CheckoutError::Validation("payment reference missing".into()))?;
        let attempt = PaymentAttempt {
            reference: reference.clone(),
            order_id: updated.id,
            attempt: updated.payment_attempts,
            amount: updated.totals.total,
            currency: updated.currency.clone(),
            created_at: now,
            superseded: false,
        };

        let outcome = self
            .store
            .transition_order(
                OrderTransition::new(updated, OrderStatus::Pending, events, now)
                    .with_payment_attempt(attempt),
            )
            .await?;
        let order = outcome.order;

        let intent = self
            .gateway
            .initiate(&PaymentRequest {
                reference,
                amount: order.totals.total,
                currency: order.currency.clone(),
                email: order.buyer.email.clone(),
                callback_url: self.config.payment_callback_url.clone(),
            })
            .await?;
        metrics::counter!("payment_intents_total").increment(1);
        tracing::info!(
            order_number = %order.order_number,
            reference = %intent.reference,
            attempt = order.payment_attempts,
            "Payment intent opened"
        );
        Ok((order, intent))
    }

    /// Opens a fresh payment intent for a still-PENDING order, superseding
    /// the previous reference.
    #[tracing::instrument(skip(self))]
    pub async fn retry_payment(&self, order_id: OrderId, requester: BuyerId) -> Result<PaymentIntent> {
        let order = self.load(order_id).await?;
        ensure_owner(&order, requester)?;
        let (_, intent) = self.open_payment(&order).await?;
        metrics::counter!("payment_retries_total").increment(1);
        Ok(intent)
    }

    /// PENDING -> COMPLETED after a confirmed payment: commits the seats,
    /// redeems the promo and issues tickets in one transition.
    pub(crate) async fn complete_payment(&self, order: &Order, reference: &str) -> Result<Order> {
        let now = self.clock.now();
        let events = order.complete(Some(reference.to_string()), now)?;
        let mut updated = order.clone();
        updated.apply_events(events.clone());
        let tickets = issue_tickets(&updated, &self.signer, now);

        let transition = OrderTransition::new(updated, OrderStatus::Pending, events, now)
            .with_inventory(InventoryEffect::Commit)
            .redeeming_promo(order.promo_code_id.is_some())
            .issuing(tickets.clone());

        match self.store.transition_order(transition).await {
            Ok(outcome) => {
                if outcome.promo_over_limit {
                    metrics::counter!("promo_redemptions_over_limit").increment(1);
                    tracing::warn!(
                        order_number = %order.order_number,
                        promo_code = ?order.promo_code,
                        "Promo redeemed past its usage limit"
                    );
                }
                metrics::counter!("orders_completed_total").increment(1);
                tracing::info!(
                    order_number = %order.order_number,
                    reference,
                    tickets = tickets.len(),
                    "Order completed"
                );
                self.announce_tickets(&outcome.order, &tickets);
                Ok(outcome.order)
            }
            Err(StoreError::StatusConflict { actual, .. }) => {
                tracing::warn!(
                    order_number = %order.order_number,
                    reference,
                    status = %actual,
                    "Payment confirmed for an order that already moved on"
                );
                self.load(order.id).await
            }
            Err(err) => Err(err.into()),
        }
    }

    /// PENDING -> FAILED, releasing the seats.
    pub(crate) async fn fail_pending(
        &self,
        order: &Order,
        reason: FailureReason,
        detail: Option<String>,
    ) -> Result<Order> {
        let now = self.clock.now();
        let events = order.fail(reason, detail, now)?;
        let mut updated = order.clone();
        updated.apply_events(events.clone());

        let transition = OrderTransition::new(updated, OrderStatus::Pending, events, now)
            .with_inventory(InventoryEffect::Release);
        match self.store.transition_order(transition).await {
            Ok(outcome) => {
                metrics::counter!("orders_failed_total", "reason" => reason.as_str()).increment(1);
                tracing::info!(
                    order_number = %order.order_number,
                    %reason,
                    released = outcome.released_quantity,
                    "Order failed"
                );
                Ok(outcome.order)
            }
            Err(StoreError::StatusConflict { .. }) => self.load(order.id).await,
            Err(err) => Err(err.into()),
        }
    }

    /// Cancels a PENDING order, or a COMPLETED one before its event starts.
    ///
    /// Seats go back to sale either way; a completed order's tickets are
    /// invalidated and their pending transfers cancelled.
    #[tracing::instrument(skip(self, reason))]
    pub async fn cancel_order(
        &self,
        order_id: OrderId,
        actor: Actor,
        reason: Option<String>,
    ) -> Result<Order> {
        let order = self.load(order_id).await?;
        let event = self.catalog.get_event(order.event_id).await?;
        ensure_actor(&order, event.organizer_id, actor)?;

        let now = self.clock.now();
        let events = order.cancel(reason, event.has_started(now), now)?;
        let mut updated = order.clone();
        updated.apply_events(events.clone());

        let mut transition = OrderTransition::new(updated, order.status, events, now)
            .with_inventory(InventoryEffect::Release);
        if order.status == OrderStatus::Completed {
            transition = transition
                .invalidating_tickets(TicketStatus::Cancelled)
                .cancelling_transfers();
        }

        let outcome = self.store.transition_order(transition).await?;
        metrics::counter!("orders_cancelled_total", "from" => order.status.as_str()).increment(1);
        tracing::info!(
            order_number = %order.order_number,
            from = %order.status,
            released = outcome.released_quantity,
            "Order cancelled"
        );
        dispatch(
            &self.notifier,
            Notification::OrderCancelled {
                order_number: outcome.order.order_number.clone(),
                email: outcome.order.buyer.email.clone(),
            },
        );
        Ok(outcome.order)
    }

    /// Refunds a COMPLETED order on behalf of the event's organizer.
    ///
    /// Seats are only returned to sale when restock-on-refund is enabled.
    #[tracing::instrument(skip(self, reason))]
    pub async fn refund_order(
        &self,
        order_id: OrderId,
        actor: Actor,
        reason: Option<String>,
    ) -> Result<Order> {
        let order = self.load(order_id).await?;
        let event = self.catalog.get_event(order.event_id).await?;
        match actor {
            Actor::Organizer(organizer_id) if organizer_id == event.organizer_id => {}
            _ => {
                return Err(CheckoutError::Forbidden(
                    "only the event organizer may refund an order".into(),
                ));
            }
        }

        let now = self.clock.now();
        let restock = self.config.restock_on_refund;
        let events = order.refund(reason, restock, now)?;
        let mut updated = order.clone();
        updated.apply_events(events.clone());

        let mut transition = OrderTransition::new(updated, OrderStatus::Completed, events, now)
            .invalidating_tickets(TicketStatus::Refunded)
            .cancelling_transfers();
        if restock {
            transition = transition.with_inventory(InventoryEffect::Release);
        }

        let outcome = self.store.transition_order(transition).await?;
        metrics::counter!("orders_refunded_total").increment(1);
        tracing::info!(
            order_number = %order.order_number,
            restocked = restock,
            released = outcome.released_quantity,
            "Order refunded"
        );
        dispatch(
            &self.notifier,
            Notification::OrderRefunded {
                order_number: outcome.order.order_number.clone(),
                email: outcome.order.buyer.email.clone(),
            },
        );
        Ok(outcome.order)
    }

    /// Loads an order owned by `requester`.
    pub async fn get_order(&self, order_id: OrderId, requester: BuyerId) -> Result<Order> {
        let order = self.load(order_id).await?;
        ensure_owner(&order, requester)?;
        Ok(order)
    }

    /// Audit history of an order, oldest first.
    pub async fn order_events(
        &self,
        order_id: OrderId,
        requester: BuyerId,
    ) -> Result<Vec<RecordedEvent>> {
        self.get_order(order_id, requester).await?;
        Ok(self.store.order_events(order_id).await?)
    }

    /// Tickets issued for an order.
    pub async fn tickets(&self, order_id: OrderId, requester: BuyerId) -> Result<Vec<Ticket>> {
        self.get_order(order_id, requester).await?;
        Ok(self.store.tickets_for_order(order_id).await?)
    }

    pub(crate) async fn load(&self, order_id: OrderId) -> Result<Order> {
        self.store
            .get_order(order_id)
            .await?
            .ok_or_else(|| CheckoutError::not_found("order", order_id))
    }

    fn announce_tickets(&self, order: &Order, tickets: &[Ticket]) {
        if tickets.is_empty() {
            return;
        }
        dispatch(
            &self.notifier,
            Notification::TicketsIssued {
                order_number: order.order_number.clone(),
                email: order.attendee.email.clone(),
                ticket_numbers: tickets.iter().map(|t| t.ticket_number.clone()).collect(),
            },
        );
    }
}

fn ensure_owner(order: &Order, requester: BuyerId) -> Result<()> {
    if order.buyer.id == requester {
        Ok(())
    } else {
        Err(CheckoutError::Forbidden(format!(
            "order {} belongs to another buyer",
            order.order_number
        )))
    }
}

fn ensure_actor(order: &Order, organizer_id: OrganizerId, actor: Actor) -> Result<()> {
    match actor {
        Actor::Buyer(buyer_id) => ensure_owner(order, buyer_id),
        Actor::Organizer(id) if id == organizer_id => Ok(()),
        Actor::Organizer(_) => Err(CheckoutError::Forbidden(
            "organizer does not own this event".into(),
        )),
    }
}
