//! Checkout policy settings.

use chrono::Duration;
use domain::FeePolicy;

/// Tunables for the checkout services.
///
/// The API crate fills this from environment variables; tests build it
/// directly.
#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    /// How long an idempotency key keeps pointing at its order.
    pub idempotency_window: Duration,
    /// Age after which an unpaid PENDING order is reclaimed.
    pub reclaim_timeout: Duration,
    /// Time between reclaim sweeps.
    pub sweep_interval: std::time::Duration,
    /// Orders examined per sweep.
    pub sweep_batch_size: u32,
    /// Lifetime of a pending ticket transfer.
    pub transfer_ttl: Duration,
    /// Return refunded seats to sale.
    pub restock_on_refund: bool,
    pub fees: FeePolicy,
    /// Where the gateway sends the buyer after payment.
    pub payment_callback_url: Option<String>,
    /// Shared secret for webhook signatures. `None` disables the check.
    pub webhook_secret: Option<String>,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            idempotency_window: Duration::minutes(10),
            reclaim_timeout: Duration::minutes(30),
            sweep_interval: std::time::Duration::from_secs(60),
            sweep_batch_size: 100,
            transfer_ttl: Duration::hours(72),
            restock_on_refund: false,
            fees: FeePolicy::none(),
            payment_callback_url: None,
            webhook_secret: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CheckoutConfig::default();
        assert_eq!(config.idempotency_window.num_seconds(), 600);
        assert_eq!(config.reclaim_timeout.num_seconds(), 1800);
        assert_eq!(config.transfer_ttl.num_seconds(), 259_200);
        assert!(!config.restock_on_refund);
        assert_eq!(config.fees, FeePolicy::none());
    }
}
