//! Payment gateway adapter.
//!
//! The core generates payment references itself and asks the gateway to open
//! an intent for them; outcomes are always read back through `reconcile`,
//! whichever trigger (webhook or buyer poll) arrives first.

mod http;
mod memory;
pub mod webhook;

pub use http::{HttpGatewayConfig, HttpPaymentGateway};
pub use memory::InMemoryPaymentGateway;

use async_trait::async_trait;
use common::{Currency, Money};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A request to open a payment intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub reference: String,
    pub amount: Money,
    pub currency: Currency,
    /// Email of the paying buyer.
    pub email: String,
    pub callback_url: Option<String>,
}

/// An opened payment intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub reference: String,
    pub amount: Money,
    pub currency: Currency,
    /// Where to send the buyer to pay, if the provider hosts a checkout page.
    pub checkout_url: Option<String>,
}

/// Normalised provider outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Succeeded,
    Failed,
    Pending,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Succeeded => "SUCCEEDED",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Pending => "PENDING",
        }
    }
}

/// What the provider reports for a reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentOutcome {
    pub reference: String,
    pub status: PaymentStatus,
    /// Amount actually paid, as reported by the provider.
    pub amount: Money,
    pub currency: Currency,
    /// Provider message, e.g. a decline reason.
    pub detail: Option<String>,
}

/// Errors raised by a payment gateway.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// Network failure, timeout, 5xx or rate limiting.
    #[error("payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("payment {reference} declined: {reason}")]
    Declined { reference: String, reason: String },

    /// The provider does not know the reference.
    #[error("unknown payment reference: {reference}")]
    InvalidReference { reference: String },
}

impl GatewayError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::GatewayUnavailable(_) => "gateway_unavailable",
            GatewayError::Declined { .. } => "payment_declined",
            GatewayError::InvalidReference { .. } => "invalid_payment_reference",
        }
    }

    /// Whether the same call may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::GatewayUnavailable(_))
    }
}

/// Trait for payment provider integrations.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Opens a payment intent for a core-generated reference.
    async fn initiate(&self, request: &PaymentRequest) -> Result<PaymentIntent, GatewayError>;

    /// Reads the current outcome of a reference from the provider.
    async fn reconcile(&self, reference: &str) -> Result<PaymentOutcome, GatewayError>;
}
