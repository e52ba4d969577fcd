//! Server-side order totals.

use common::Money;
use serde::{Deserialize, Serialize};

use super::OrderItem;

/// Service fee applied on top of the discounted subtotal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeePolicy {
    /// Percentage fee in basis points (1/100th of a percent).
    pub basis_points: u32,
    /// Flat fee charged per ticket.
    pub per_ticket: Money,
}

impl FeePolicy {
    /// No fees.
    pub fn none() -> Self {
        Self::default()
    }
}

/// Totals of an order, all in the order's currency minor units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTotals {
    pub subtotal: Money,
    pub discount: Money,
    pub service_fee: Money,
    pub total: Money,
}

/// Computes totals from line-item snapshots and an evaluated discount.
///
/// The discount is clamped to `0..=subtotal`. The fee is only charged when
/// something remains to pay, so a fully discounted order stays free.
pub fn compute_totals(items: &[OrderItem], discount: Money, fees: &FeePolicy) -> OrderTotals {
    let subtotal: Money = items.iter().map(OrderItem::line_total).sum();
    let discount = discount.max(Money::zero()).min(subtotal);
    let discounted = subtotal.saturating_sub(discount);

    let service_fee = if discounted.is_positive() {
        let tickets: u32 = items.iter().map(|item| item.quantity).sum();
        discounted.basis_points(fees.basis_points) + fees.per_ticket.multiply(tickets)
    } else {
        Money::zero()
    };

    OrderTotals {
        subtotal,
        discount,
        service_fee,
        total: discounted + service_fee,
    }
}
