//! Reclaim sweeper.
//!
//! Periodically fails PENDING orders older than the reclaim timeout so their
//! seats go back on sale, and expires stale ticket transfers. An order with
//! payment attempts gets one last look at the gateway first: a late success
//! on any attempt completes it instead.

use std::sync::Arc;

use common::Clock;
use domain::{FailureReason, Order, OrderStatus};
use serde::Serialize;
use store::Store;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::CheckoutConfig;
use crate::error::Result;
use crate::orders::OrderService;
use crate::payment::{GatewayError, PaymentGateway, PaymentStatus};
use crate::reconcile::Reconciler;

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub reclaimed: usize,
    /// Orders whose late payment was found and applied.
    pub completed: usize,
    /// Orders left for the next sweep because the gateway was unreachable.
    pub skipped: usize,
    pub errors: usize,
    pub transfers_expired: usize,
}

enum Disposition {
    Reclaimed,
    Completed,
    Skipped,
    Untouched,
}

/// Background reclaim worker.
#[derive(Clone)]
pub struct ReclaimSweeper {
    store: Arc<dyn Store>,
    gateway: Arc<dyn PaymentGateway>,
    clock: Arc<dyn Clock>,
    orders: OrderService,
    reconciler: Reconciler,
    config: Arc<CheckoutConfig>,
}

impl ReclaimSweeper {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
        orders: OrderService,
        reconciler: Reconciler,
        config: Arc<CheckoutConfig>,
    ) -> Self {
        Self {
            store,
            gateway,
            clock,
            orders,
            reconciler,
            config,
        }
    }

    /// Runs one pass over abandoned orders and expired transfers.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let now = self.clock.now();
        let cutoff = now - self.config.reclaim_timeout;
        let stale = self
            .store
            .pending_orders_created_before(cutoff, self.config.sweep_batch_size)
            .await?;

        let mut report = SweepReport {
            examined: stale.len(),
            ..SweepReport::default()
        };
        for order in &stale {
            match self.reclaim(order).await {
                Ok(Disposition::Reclaimed) => report.reclaimed += 1,
                Ok(Disposition::Completed) => report.completed += 1,
                Ok(Disposition::Skipped) => report.skipped += 1,
                Ok(Disposition::Untouched) => {}
                Err(e) => {
                    report.errors += 1;
                    tracing::error!(order_number = %order.order_number, error = %e, "Reclaim failed");
                }
            }
        }

        report.transfers_expired = self.store.expire_transfers(now).await?.len();

        metrics::counter!("reclaim_sweep_reclaimed_total").increment(report.reclaimed as u64);
        metrics::counter!("reclaim_sweep_completed_total").increment(report.completed as u64);
        metrics::counter!("transfers_expired_total").increment(report.transfers_expired as u64);
        if report.examined > 0 || report.transfers_expired > 0 {
            tracing::info!(
                examined = report.examined,
                reclaimed = report.reclaimed,
                completed = report.completed,
                skipped = report.skipped,
                errors = report.errors,
                transfers_expired = report.transfers_expired,
                "Reclaim sweep finished"
            );
        }
        Ok(report)
    }

    /// Asks the gateway about every attempt on the order, newest first. A
    /// success on any of them completes the order; it is only reclaimed once
    /// none has succeeded and the gateway answered for all of them.
    async fn reclaim(&self, order: &Order) -> Result<Disposition> {
        let mut attempts = self.store.payment_attempts(order.id).await?;
        attempts.sort_by(|a, b| b.attempt.cmp(&a.attempt));
        let mut references: Vec<String> = attempts.into_iter().map(|a| a.reference).collect();
        if let Some(current) = &order.payment_reference
            && !references.contains(current)
        {
            references.insert(0, current.clone());
        }

        let mut unreachable = false;
        let mut declined = None;
        for reference in &references {
            match self.gateway.reconcile(reference).await {
                Ok(outcome) if outcome.status == PaymentStatus::Succeeded => {
                    let order = self.reconciler.apply_outcome(order, reference, outcome).await?;
                    return Ok(match order.status {
                        OrderStatus::Completed => Disposition::Completed,
                        OrderStatus::Failed => Disposition::Reclaimed,
                        _ => Disposition::Untouched,
                    });
                }
                Ok(outcome)
                    if outcome.status == PaymentStatus::Failed
                        && order.payment_reference.as_ref() == Some(reference) =>
                {
                    declined = Some(outcome.detail);
                }
                Ok(_) | Err(GatewayError::InvalidReference { .. }) => {}
                Err(e) => {
                    tracing::warn!(
                        order_number = %order.order_number,
                        reference = %reference,
                        error = %e,
                        "Gateway unreachable; retrying next sweep"
                    );
                    unreachable = true;
                }
            }
        }

        if unreachable {
            return Ok(Disposition::Skipped);
        }
        match declined {
            Some(detail) => self.expire(order, FailureReason::PaymentFailed, detail).await,
            None => self.expire(order, FailureReason::ReclaimTimeout, None).await,
        }
    }

    async fn expire(
        &self,
        order: &Order,
        reason: FailureReason,
        detail: Option<String>,
    ) -> Result<Disposition> {
        let order = self.orders.fail_pending(order, reason, detail).await?;
        Ok(if order.status == OrderStatus::Failed {
            Disposition::Reclaimed
        } else {
            Disposition::Untouched
        })
    }

    /// Sweeps on every tick until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.sweep_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(
            interval_secs = self.config.sweep_interval.as_secs(),
            timeout_secs = self.config.reclaim_timeout.num_seconds(),
            "Reclaim sweeper started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        metrics::counter!("reclaim_sweep_errors_total").increment(1);
                        tracing::error!(error = %e, "Reclaim sweep failed");
                    }
                }
            }
        }

        tracing::info!("Reclaim sweeper stopped");
    }

    /// Runs the sweeper on its own task.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
