//! Checkout services for the ticketing core.
//!
//! This crate wires the pure domain to a [`store::Store`] and a
//! [`payment::PaymentGateway`]:
//! - Catalog sync and pricing snapshots
//! - The inventory ledger
//! - Order creation, payment, cancellation and refunds
//! - Payment reconciliation (webhook and buyer poll)
//! - Ticket transfers and check-in
//! - The background reclaim sweeper

pub mod catalog;
pub mod config;
pub mod error;
pub mod inventory;
pub mod notify;
pub mod orders;
pub mod payment;
pub mod promo;
pub mod reconcile;
pub mod sweep;
pub mod tickets;

pub use catalog::{CatalogService, LineRequest, NewPromoCode, NewTicketType, TicketTypeView};
pub use config::CheckoutConfig;
pub use error::{CheckoutError, Result};
pub use inventory::InventoryLedger;
pub use notify::{Notification, Notifier, RecordingNotifier, TracingNotifier};
pub use orders::{Actor, CheckoutOutcome, CreateOrder, OrderService};
pub use payment::{
    GatewayError, HttpGatewayConfig, HttpPaymentGateway, InMemoryPaymentGateway, PaymentGateway,
    PaymentIntent, PaymentOutcome, PaymentStatus,
};
pub use promo::PromoService;
pub use reconcile::Reconciler;
pub use sweep::{ReclaimSweeper, SweepReport};
pub use tickets::{AcceptedTransfer, TicketService, Verification};

use std::sync::Arc;

use common::Clock;
use domain::TicketCodeSigner;
use store::Store;

/// All checkout services sharing one store, gateway and clock.
#[derive(Clone)]
pub struct Checkout {
    pub catalog: CatalogService,
    pub inventory: InventoryLedger,
    pub promos: PromoService,
    pub orders: OrderService,
    pub reconciler: Reconciler,
    pub tickets: TicketService,
    store: Arc<dyn Store>,
    gateway: Arc<dyn PaymentGateway>,
    clock: Arc<dyn Clock>,
    config: Arc<CheckoutConfig>,
}

impl Checkout {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        signer: TicketCodeSigner,
        config: CheckoutConfig,
    ) -> Self {
        let config = Arc::new(config);
        let catalog = CatalogService::new(store.clone(), clock.clone());
        let inventory = InventoryLedger::new(store.clone(), clock.clone());
        let promos = PromoService::new(store.clone(), clock.clone(), catalog.clone());
        let orders = OrderService::new(
            store.clone(),
            gateway.clone(),
            clock.clone(),
            notifier.clone(),
            signer.clone(),
            config.clone(),
            catalog.clone(),
            promos.clone(),
            inventory.clone(),
        );
        let reconciler = Reconciler::new(
            store.clone(),
            gateway.clone(),
            orders.clone(),
            config.clone(),
        );
        let tickets = TicketService::new(
            store.clone(),
            clock.clone(),
            notifier,
            signer,
            config.clone(),
        );

        Self {
            catalog,
            inventory,
            promos,
            orders,
            reconciler,
            tickets,
            store,
            gateway,
            clock,
            config,
        }
    }

    /// Builds the reclaim sweeper over the same services.
    pub fn sweeper(&self) -> ReclaimSweeper {
        ReclaimSweeper::new(
            self.store.clone(),
            self.gateway.clone(),
            self.clock.clone(),
            self.orders.clone(),
            self.reconciler.clone(),
            self.config.clone(),
        )
    }

    pub fn config(&self) -> &CheckoutConfig {
        &self.config
    }

    /// Checks that the store is reachable.
    pub async fn ping(&self) -> Result<()> {
        Ok(self.store.ping().await?)
    }
}
