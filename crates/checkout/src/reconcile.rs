//! Payment reconciliation.
//!
//! The gateway webhook and the buyer's "verify" poll both end up in
//! [`Reconciler::reconcile`]. Whichever arrives first moves the order; the
//! other finds it no longer PENDING and returns it unchanged.

use std::sync::Arc;

use domain::{FailureReason, Order};
use store::Store;

use crate::config::CheckoutConfig;
use crate::error::{CheckoutError, Result};
use crate::orders::OrderService;
use crate::payment::webhook::{extract_reference, verify_signature};
use crate::payment::{PaymentGateway, PaymentOutcome, PaymentStatus};

/// Applies gateway outcomes to orders.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn Store>,
    gateway: Arc<dyn PaymentGateway>,
    orders: OrderService,
    config: Arc<CheckoutConfig>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        orders: OrderService,
        config: Arc<CheckoutConfig>,
    ) -> Self {
        Self {
            store,
            gateway,
            orders,
            config,
        }
    }

    /// Reads the outcome of `reference` from the gateway and applies it.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile(&self, reference: &str) -> Result<Order> {
        let order = self
            .store
            .find_order_by_payment_reference(reference)
            .await?
            .ok_or_else(|| CheckoutError::not_found("payment reference", reference))?;

        if !order.status.is_pending() {
            metrics::counter!("reconciliations_total", "result" => "noop").increment(1);
            tracing::debug!(order_number = %order.order_number, status = %order.status, "Order already settled");
            return Ok(order);
        }

        let outcome = match self.gateway.reconcile(reference).await {
            Ok(outcome) => outcome,
            Err(err) => {
                metrics::counter!("reconciliations_total", "result" => "error").increment(1);
                tracing::warn!(order_number = %order.order_number, error = %err, "Reconciliation failed");
                return Err(err.into());
            }
        };
        self.apply_outcome(&order, reference, outcome).await
    }

    /// Moves a PENDING order according to a gateway outcome.
    ///
    /// A success whose amount or currency differs from the order total
    /// fails the order. A failure reported for a superseded reference is
    /// ignored, since a newer attempt may still succeed.
    pub(crate) async fn apply_outcome(
        &self,
        order: &Order,
        reference: &str,
        outcome: PaymentOutcome,
    ) -> Result<Order> {
        metrics::counter!("reconciliations_total", "result" => outcome.status.as_str())
            .increment(1);

        match outcome.status {
            PaymentStatus::Succeeded => {
                if outcome.amount != order.totals.total || outcome.currency != order.currency {
                    let detail = format!(
                        "paid {} but order total is {}",
                        outcome.currency.format(outcome.amount),
                        order.currency.format(order.totals.total)
                    );
                    tracing::error!(
                        order_number = %order.order_number,
                        reference,
                        %detail,
                        "Payment does not match order total"
                    );
                    return self
                        .orders
                        .fail_pending(order, FailureReason::PaymentMismatch, Some(detail))
                        .await;
                }
                self.orders.complete_payment(order, reference).await
            }
            PaymentStatus::Failed => {
                if order.payment_reference.as_deref() != Some(reference) {
                    tracing::info!(
                        order_number = %order.order_number,
                        reference,
                        "Ignoring failure of a superseded payment attempt"
                    );
                    return Ok(order.clone());
                }
                self.orders
                    .fail_pending(order, FailureReason::PaymentFailed, outcome.detail)
                    .await
            }
            PaymentStatus::Pending => Ok(order.clone()),
        }
    }

    /// Handles a gateway callback.
    ///
    /// The body is only trusted for the reference; the outcome is re-read
    /// from the gateway.
    #[tracing::instrument(skip_all)]
    pub async fn handle_webhook(&self, body: &[u8], signature: Option<&str>) -> Result<Order> {
        if let Some(secret) = &self.config.webhook_secret {
            let valid = signature.is_some_and(|sig| verify_signature(secret, body, sig));
            if !valid {
                metrics::counter!("webhooks_rejected_total").increment(1);
                tracing::warn!("Rejected webhook with a bad signature");
                return Err(CheckoutError::Forbidden("invalid webhook signature".into()));
            }
        }

        let reference = extract_reference(body)
            .ok_or_else(|| CheckoutError::Validation("webhook body has no reference".into()))?;
        self.reconcile(&reference).await
    }
}
