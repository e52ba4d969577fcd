//! Application configuration loaded from environment variables.

use std::time::Duration;

use checkout::{CheckoutConfig, HttpGatewayConfig};
use common::Money;
use domain::FeePolicy;

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `3000`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT` — `json` for JSON logs, anything else for plain text
/// - `DATABASE_URL` — PostgreSQL URL; in-memory store when unset
/// - `DATABASE_MAX_CONNECTIONS` — pool size (default: `10`)
/// - `PAYMENT_GATEWAY_URL`, `PAYMENT_GATEWAY_SECRET_KEY` — HTTP gateway;
///   in-memory gateway when either is unset
/// - `PAYMENT_CALLBACK_URL`, `PAYMENT_WEBHOOK_SECRET`
/// - `TICKET_CODE_SECRET` — HMAC key for ticket codes
/// - `RECLAIM_TIMEOUT_SECS` (1800), `RECLAIM_INTERVAL_SECS` (60),
///   `IDEMPOTENCY_WINDOW_SECS` (600), `TRANSFER_TTL_SECS` (259200)
/// - `RESTOCK_ON_REFUND` (false)
/// - `SERVICE_FEE_BPS` (0), `SERVICE_FEE_PER_TICKET_MINOR` (0)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_json: bool,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub gateway_url: Option<String>,
    pub gateway_secret_key: Option<String>,
    pub payment_callback_url: Option<String>,
    pub webhook_secret: Option<String>,
    pub ticket_code_secret: String,
    pub reclaim_timeout_secs: u64,
    pub reclaim_interval_secs: u64,
    pub idempotency_window_secs: u64,
    pub transfer_ttl_secs: u64,
    pub restock_on_refund: bool,
    pub service_fee_bps: u32,
    pub service_fee_per_ticket_minor: i64,
}

/// Used when `TICKET_CODE_SECRET` is unset. Only suitable for local runs.
const DEV_TICKET_CODE_SECRET: &str = "local-development-ticket-secret";

fn var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    var(key).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn flag(key: &str) -> bool {
    var(key).is_some_and(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: var("HOST").unwrap_or(defaults.host),
            port: parsed("PORT", defaults.port),
            log_level: var("RUST_LOG").unwrap_or(defaults.log_level),
            log_json: var("LOG_FORMAT").is_some_and(|f| f.eq_ignore_ascii_case("json")),
            database_url: var("DATABASE_URL"),
            database_max_connections: parsed(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            ),
            gateway_url: var("PAYMENT_GATEWAY_URL"),
            gateway_secret_key: var("PAYMENT_GATEWAY_SECRET_KEY"),
            payment_callback_url: var("PAYMENT_CALLBACK_URL"),
            webhook_secret: var("PAYMENT_WEBHOOK_SECRET"),
            ticket_code_secret: var("TICKET_CODE_SECRET").unwrap_or(defaults.ticket_code_secret),
            reclaim_timeout_secs: parsed("RECLAIM_TIMEOUT_SECS", defaults.reclaim_timeout_secs),
            reclaim_interval_secs: parsed("RECLAIM_INTERVAL_SECS", defaults.reclaim_interval_secs),
            idempotency_window_secs: parsed(
                "IDEMPOTENCY_WINDOW_SECS",
                defaults.idempotency_window_secs,
            ),
            transfer_ttl_secs: parsed("TRANSFER_TTL_SECS", defaults.transfer_ttl_secs),
            restock_on_refund: flag("RESTOCK_ON_REFUND"),
            service_fee_bps: parsed("SERVICE_FEE_BPS", defaults.service_fee_bps),
            service_fee_per_ticket_minor: parsed(
                "SERVICE_FEE_PER_TICKET_MINOR",
                defaults.service_fee_per_ticket_minor,
            ),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// True when the ticket code key is the built-in development key.
    pub fn uses_dev_ticket_secret(&self) -> bool {
        self.ticket_code_secret == DEV_TICKET_CODE_SECRET
    }

    /// HTTP gateway settings, if both URL and key are configured.
    pub fn gateway(&self) -> Option<HttpGatewayConfig> {
        match (&self.gateway_url, &self.gateway_secret_key) {
            (Some(url), Some(key)) => Some(HttpGatewayConfig::new(url, key)),
            _ => None,
        }
    }

    /// Checkout service settings.
    pub fn checkout(&self) -> CheckoutConfig {
        CheckoutConfig {
            idempotency_window: seconds(self.idempotency_window_secs),
            reclaim_timeout: seconds(self.reclaim_timeout_secs),
            sweep_interval: Duration::from_secs(self.reclaim_interval_secs.max(1)),
            transfer_ttl: seconds(self.transfer_ttl_secs),
            restock_on_refund: self.restock_on_refund,
            fees: FeePolicy {
                basis_points: self.service_fee_bps,
                per_ticket: Money::from_minor(self.service_fee_per_ticket_minor),
            },
            payment_callback_url: self.payment_callback_url.clone(),
            webhook_secret: self.webhook_secret.clone(),
            ..CheckoutConfig::default()
        }
    }
}

fn seconds(secs: u64) -> chrono::Duration {
    chrono::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX / 1_000))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_json: false,
            database_url: None,
            database_max_connections: 10,
            gateway_url: None,
            gateway_secret_key: None,
            payment_callback_url: None,
            webhook_secret: None,
            ticket_code_secret: DEV_TICKET_CODE_SECRET.to_string(),
            reclaim_timeout_secs: 1800,
            reclaim_interval_secs: 60,
            idempotency_window_secs: 600,
            transfer_ttl_secs: 259_200,
            restock_on_refund: false,
            service_fee_bps: 0,
            service_fee_per_ticket_minor: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert!(config.database_url.is_none());
        assert!(config.gateway().is_none());
        assert!(config.uses_dev_ticket_secret());
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_checkout_settings() {
        let config = Config {
            reclaim_timeout_secs: 900,
            idempotency_window_secs: 60,
            restock_on_refund: true,
            service_fee_bps: 250,
            service_fee_per_ticket_minor: 100,
            webhook_secret: Some("whsec".to_string()),
            ..Config::default()
        };
        let checkout = config.checkout();
        assert_eq!(checkout.reclaim_timeout, chrono::Duration::minutes(15));
        assert_eq!(checkout.idempotency_window, chrono::Duration::minutes(1));
        assert_eq!(checkout.transfer_ttl, chrono::Duration::hours(72));
        assert_eq!(checkout.sweep_interval, Duration::from_secs(60));
        assert!(checkout.restock_on_refund);
        assert_eq!(checkout.fees.basis_points, 250);
        assert_eq!(checkout.fees.per_ticket.minor(), 100);
        assert_eq!(checkout.webhook_secret.as_deref(), Some("whsec"));
    }

    #[test]
    fn test_gateway_requires_url_and_key() {
        let config = Config {
            gateway_url: Some("https://pay.example.com".to_string()),
            ..Config::default()
        };
        assert!(config.gateway().is_none());

        let config = Config {
            gateway_secret_key: Some("sk_live".to_string()),
            ..config
        };
        let gateway = config.gateway().unwrap();
        assert_eq!(gateway.base_url, "https://pay.example.com");
    }
}
