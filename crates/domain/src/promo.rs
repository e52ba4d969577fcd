//! Promo codes and the stateless discount evaluator.

use chrono::{DateTime, Utc};
use common::{EventId, Money, PromoCodeId, TicketTypeId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How a promo code reduces the subtotal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountKind {
    /// Whole percent in `1..=100`.
    Percentage(u32),
    /// Fixed amount in minor units.
    Flat(Money),
}

impl DiscountKind {
    /// Returns a percentage discount if `percent` is in `1..=100`.
    pub fn percentage(percent: u32) -> Option<Self> {
        (1..=100).contains(&percent).then_some(Self::Percentage(percent))
    }

    /// Returns a flat discount if `amount` is positive.
    pub fn flat(amount: Money) -> Option<Self> {
        amount.is_positive().then_some(Self::Flat(amount))
    }

    /// Computes the discount on `base`, clamped to `0..=base`.
    pub fn apply_to(&self, base: Money) -> Money {
        if !base.is_positive() {
            return Money::zero();
        }
        let raw = match self {
            DiscountKind::Percentage(percent) => base.percentage(*percent),
            DiscountKind::Flat(amount) => *amount,
        };
        raw.max(Money::zero()).min(base)
    }
}

/// Reasons a promo code is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PromoError {
    #[error("promo code {code} not found")]
    NotFound { code: String },

    #[error("promo code {code} is inactive")]
    Inactive { code: String },

    #[error("promo code {code} has expired")]
    Expired { code: String },

    #[error("promo code {code} has reached its usage limit")]
    UsageLimitReached { code: String },

    #[error("promo code {code} does not apply to the selected tickets")]
    NotApplicableToSelectedTickets { code: String },
}

impl PromoError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            PromoError::NotFound { .. } => "promo_not_found",
            PromoError::Inactive { .. } => "promo_inactive",
            PromoError::Expired { .. } => "promo_expired",
            PromoError::UsageLimitReached { .. } => "promo_usage_limit_reached",
            PromoError::NotApplicableToSelectedTickets { .. } => "promo_not_applicable",
        }
    }
}

/// A discount code scoped to one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromoCode {
    pub id: PromoCodeId,
    pub event_id: EventId,
    /// Upper-cased, trimmed.
    pub code: String,
    pub discount: DiscountKind,
    /// `None` means unlimited.
    pub usage_limit: Option<u32>,
    pub usage_count: u32,
    pub expires_at: Option<DateTime<Utc>>,
    pub active: bool,
    /// Empty means every ticket type of the event.
    #[serde(default)]
    pub ticket_type_ids: Vec<TicketTypeId>,
}

impl PromoCode {
    /// Creates an active, unlimited, unrestricted code.
    pub fn new(event_id: EventId, code: &str, discount: DiscountKind) -> Self {
        Self {
            id: PromoCodeId::new(),
            event_id,
            code: Self::normalize(code),
            discount,
            usage_limit: None,
            usage_count: 0,
            expires_at: None,
            active: true,
            ticket_type_ids: Vec::new(),
        }
    }

    /// Canonical form used for storage and lookup.
    pub fn normalize(code: &str) -> String {
        code.trim().to_uppercase()
    }

    pub fn with_usage_limit(mut self, limit: u32) -> Self {
        self.usage_limit = Some(limit);
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn restricted_to(mut self, ticket_type_ids: Vec<TicketTypeId>) -> Self {
        self.ticket_type_ids = ticket_type_ids;
        self
    }

    /// Returns true if the code covers `ticket_type_id`.
    pub fn applies_to(&self, ticket_type_id: TicketTypeId) -> bool {
        self.ticket_type_ids.is_empty() || self.ticket_type_ids.contains(&ticket_type_id)
    }

    /// Returns true if another redemption fits under the limit.
    pub fn has_remaining_uses(&self) -> bool {
        self.usage_limit.is_none_or(|limit| self.usage_count < limit)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expiry| now >= expiry)
    }
}

/// A line the buyer intends to purchase, priced from the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateItem {
    pub ticket_type_id: TicketTypeId,
    pub quantity: u32,
    pub unit_price: Money,
}

impl CandidateItem {
    pub fn line_total(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

/// A successfully evaluated promo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discount {
    pub promo_code_id: PromoCodeId,
    pub code: String,
    pub kind: DiscountKind,
    /// Part of the subtotal the code applied to.
    pub eligible_subtotal: Money,
    pub amount: Money,
}

/// Evaluates `code` for `event_id` against the candidate items.
///
/// `promo` is the result of the case-insensitive lookup; a code belonging to
/// another event is treated as not found. Checks run in the order
/// not found, inactive, expired, usage limit, applicability.
pub fn evaluate(
    promo: Option<&PromoCode>,
    code: &str,
    event_id: EventId,
    items: &[CandidateItem],
    subtotal: Money,
    now: DateTime<Utc>,
) -> Result<Discount, PromoError> {
    let normalized = PromoCode::normalize(code);
    let promo = match promo {
        Some(promo) if promo.event_id == event_id && promo.code == normalized => promo,
        _ => return Err(PromoError::NotFound { code: normalized }),
    };

    if !promo.active {
        return Err(PromoError::Inactive { code: normalized });
    }
    if promo.is_expired(now) {
        return Err(PromoError::Expired { code: normalized });
    }
    if !promo.has_remaining_uses() {
        return Err(PromoError::UsageLimitReached { code: normalized });
    }

    let eligible: Vec<&CandidateItem> = items
        .iter()
        .filter(|item| item.quantity > 0 && promo.applies_to(item.ticket_type_id))
        .collect();
    if eligible.is_empty() {
        return Err(PromoError::NotApplicableToSelectedTickets { code: normalized });
    }

    let eligible_subtotal = if promo.ticket_type_ids.is_empty() {
        subtotal
    } else {
        eligible
            .iter()
            .map(|item| item.line_total())
            .sum::<Money>()
            .min(subtotal)
    };

    Ok(Discount {
        promo_code_id: promo.id,
        code: promo.code.clone(),
        kind: promo.discount,
        eligible_subtotal,
        amount: promo.discount.apply_to(eligible_subtotal),
    })
}
