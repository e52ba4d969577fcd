//! Scriptable in-memory gateway for tests and local development.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use common::{Currency, Money};

use super::{
    GatewayError, PaymentGateway, PaymentIntent, PaymentOutcome, PaymentRequest, PaymentStatus,
};

#[derive(Debug, Default)]
struct GatewayState {
    intents: HashMap<String, PaymentRequest>,
    outcomes: HashMap<String, PaymentOutcome>,
    unavailable: bool,
    decline_on_initiate: Option<String>,
    reconcile_calls: usize,
}

/// In-memory payment gateway.
///
/// Every reference stays PENDING until a test scripts an outcome for it.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<Mutex<GatewayState>>,
}

impl InMemoryPaymentGateway {
    /// Creates a new in-memory gateway.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, GatewayState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Scripts a successful payment of the full intent amount.
    ///
    /// Does nothing if no intent was opened for `reference`.
    pub fn succeed(&self, reference: &str) {
        let mut state = self.lock();
        if let Some(intent) = state.intents.get(reference).cloned() {
            state.outcomes.insert(
                reference.to_string(),
                PaymentOutcome {
                    reference: reference.to_string(),
                    status: PaymentStatus::Succeeded,
                    amount: intent.amount,
                    currency: intent.currency,
                    detail: None,
                },
            );
        }
    }

    /// Scripts a successful payment of an arbitrary amount.
    pub fn succeed_with(&self, reference: &str, amount: Money, currency: Currency) {
        self.lock().outcomes.insert(
            reference.to_string(),
            PaymentOutcome {
                reference: reference.to_string(),
                status: PaymentStatus::Succeeded,
                amount,
                currency,
                detail: None,
            },
        );
    }

    /// Scripts a failed payment.
    pub fn fail(&self, reference: &str, reason: &str) {
        let mut state = self.lock();
        let (amount, currency) = match state.intents.get(reference) {
            Some(intent) => (intent.amount, intent.currency.clone()),
            None => return,
        };
        state.outcomes.insert(
            reference.to_string(),
            PaymentOutcome {
                reference: reference.to_string(),
                status: PaymentStatus::Failed,
                amount,
                currency,
                detail: Some(reason.to_string()),
            },
        );
    }

    /// Makes every call fail with `GatewayUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Makes `initiate` decline with `reason`.
    pub fn set_decline_on_initiate(&self, reason: Option<&str>) {
        self.lock().decline_on_initiate = reason.map(str::to_string);
    }

    /// Returns the number of intents opened.
    pub fn intent_count(&self) -> usize {
        self.lock().intents.len()
    }

    /// Returns true if an intent exists for `reference`.
    pub fn has_intent(&self, reference: &str) -> bool {
        self.lock().intents.contains_key(reference)
    }

    /// Returns how many times `reconcile` was called.
    pub fn reconcile_count(&self) -> usize {
        self.lock().reconcile_calls
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn initiate(&self, request: &PaymentRequest) -> Result<PaymentIntent, GatewayError> {
        let mut state = self.lock();
        if state.unavailable {
            return Err(GatewayError::GatewayUnavailable(
                "in-memory gateway offline".to_string(),
            ));
        }
        if let Some(reason) = &state.decline_on_initiate {
            return Err(GatewayError::Declined {
                reference: request.reference.clone(),
                reason: reason.clone(),
            });
        }

        state
            .intents
            .insert(request.reference.clone(), request.clone());
        Ok(PaymentIntent {
            reference: request.reference.clone(),
            amount: request.amount,
            currency: request.currency.clone(),
            checkout_url: Some(format!("memory://checkout/{}", request.reference)),
        })
    }

    async fn reconcile(&self, reference: &str) -> Result<PaymentOutcome, GatewayError> {
        let mut state = self.lock();
        state.reconcile_calls += 1;
        if state.unavailable {
            return Err(GatewayError::GatewayUnavailable(
                "in-memory gateway offline".to_string(),
            ));
        }

        if let Some(outcome) = state.outcomes.get(reference) {
            return Ok(outcome.clone());
        }
        match state.intents.get(reference) {
            Some(intent) => Ok(PaymentOutcome {
                reference: reference.to_string(),
                status: PaymentStatus::Pending,
                amount: intent.amount,
                currency: intent.currency.clone(),
                detail: None,
            }),
            None => Err(GatewayError::InvalidReference {
                reference: reference.to_string(),
            }),
        }
    }
}
