//! REST client for a reference-based card processor.
//!
//! Wire protocol:
//! - `POST {base}/transaction/initialize` with `{reference, amount, currency, email, callback_url}`
//! - `GET {base}/transaction/verify/{reference}`
//!
//! Both answer with `{status, message, data}`. Amounts are minor units.

use std::time::Duration;

use async_trait::async_trait;
use common::{Currency, Money};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::{
    GatewayError, PaymentGateway, PaymentIntent, PaymentOutcome, PaymentRequest, PaymentStatus,
};

/// Connection settings for [`HttpPaymentGateway`].
#[derive(Debug, Clone)]
pub struct HttpGatewayConfig {
    pub base_url: String,
    pub secret_key: String,
    pub timeout: Duration,
}

impl HttpGatewayConfig {
    pub fn new(base_url: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            secret_key: secret_key.into(),
            timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Serialize)]
struct InitializeBody<'a> {
    reference: &'a str,
    amount: i64,
    currency: &'a str,
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    callback_url: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: bool,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct InitializeData {
    #[serde(default)]
    authorization_url: Option<String>,
    reference: String,
}

#[derive(Debug, Deserialize)]
struct VerifyData {
    reference: String,
    status: String,
    amount: i64,
    currency: String,
    #[serde(default)]
    gateway_response: Option<String>,
}

/// Maps the provider's transaction status onto the core's three outcomes.
fn map_status(status: &str) -> PaymentStatus {
    match status.to_ascii_lowercase().as_str() {
        "success" => PaymentStatus::Succeeded,
        "failed" | "reversed" => PaymentStatus::Failed,
        _ => PaymentStatus::Pending,
    }
}

fn unavailable(err: impl std::fmt::Display) -> GatewayError {
    GatewayError::GatewayUnavailable(err.to_string())
}

fn is_outage(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

/// HTTP payment gateway.
#[derive(Debug, Clone)]
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    secret_key: String,
}

impl HttpPaymentGateway {
    /// Creates a client for the given processor.
    pub fn new(config: HttpGatewayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(unavailable)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            secret_key: config.secret_key,
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[tracing::instrument(skip(self, request), fields(reference = %request.reference))]
    async fn initiate(&self, request: &PaymentRequest) -> Result<PaymentIntent, GatewayError> {
        let body = InitializeBody {
            reference: &request.reference,
            amount: request.amount.minor(),
            currency: request.currency.code(),
            email: &request.email,
            callback_url: request.callback_url.as_deref(),
        };

        let response = self
            .client
            .post(format!("{}/transaction/initialize", self.base_url))
            .bearer_auth(&self.secret_key)
            .json(&body)
            .send()
            .await
            .map_err(unavailable)?;

        let status = response.status();
        if is_outage(status) {
            return Err(unavailable(format!("initialize returned {status}")));
        }
        let envelope: Envelope<InitializeData> = response.json().await.map_err(unavailable)?;

        match envelope.data {
            Some(data) if status.is_success() && envelope.status => {
                if data.reference != request.reference {
                    tracing::warn!(
                        returned = %data.reference,
                        "Gateway echoed a different reference"
                    );
                }
                Ok(PaymentIntent {
                    reference: request.reference.clone(),
                    amount: request.amount,
                    currency: request.currency.clone(),
                    checkout_url: data.authorization_url,
                })
            }
            _ => Err(GatewayError::Declined {
                reference: request.reference.clone(),
                reason: envelope.message,
            }),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn reconcile(&self, reference: &str) -> Result<PaymentOutcome, GatewayError> {
        let response = self
            .client
            .get(format!("{}/transaction/verify/{}", self.base_url, reference))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(unavailable)?;

        let status = response.status();
        if is_outage(status) {
            return Err(unavailable(format!("verify returned {status}")));
        }
        if status.is_client_error() {
            return Err(GatewayError::InvalidReference {
                reference: reference.to_string(),
            });
        }
        let envelope: Envelope<VerifyData> = response.json().await.map_err(unavailable)?;

        let data = match envelope.data {
            Some(data) if envelope.status => data,
            _ => {
                return Err(GatewayError::InvalidReference {
                    reference: reference.to_string(),
                });
            }
        };
        let currency = Currency::new(&data.currency)
            .ok_or_else(|| unavailable(format!("unknown currency {}", data.currency)))?;

        Ok(PaymentOutcome {
            reference: data.reference,
            status: map_status(&data.status),
            amount: Money::from_minor(data.amount),
            currency,
            detail: data.gateway_response,
        })
    }
}
