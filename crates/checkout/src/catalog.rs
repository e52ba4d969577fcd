//! Catalog sync and pricing snapshots.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{Clock, Currency, EventId, Money, OrganizerId, TicketTypeId};
use domain::{
    CandidateItem, DiscountKind, EventInfo, InsufficientInventory, OrderError, OrderItem,
    PromoCode, SaleStatus, TicketType,
};
use serde::{Deserialize, Serialize};
use store::Store;

use crate::error::{CheckoutError, Result};

/// One requested line of a basket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRequest {
    pub ticket_type_id: TicketTypeId,
    pub quantity: u32,
}

/// Organizer input for a new ticket type.
#[derive(Debug, Clone, Deserialize)]
pub struct NewTicketType {
    pub name: String,
    pub unit_price: Money,
    pub currency: String,
    pub quantity: u32,
    pub max_per_order: u32,
    #[serde(default)]
    pub sale_starts_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sale_ends_at: Option<DateTime<Utc>>,
}

/// Organizer input for a new promo code.
#[derive(Debug, Clone, Deserialize)]
pub struct NewPromoCode {
    pub code: String,
    pub discount: DiscountKind,
    #[serde(default)]
    pub usage_limit: Option<u32>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ticket_type_ids: Vec<TicketTypeId>,
}

/// A ticket type with its derived sale status.
#[derive(Debug, Clone, Serialize)]
pub struct TicketTypeView {
    #[serde(flatten)]
    pub ticket_type: TicketType,
    pub status: SaleStatus,
    pub remaining: u32,
}

/// Authoritative prices for a basket, captured at order creation.
#[derive(Debug, Clone)]
pub struct PricedBasket {
    pub currency: Currency,
    pub items: Vec<OrderItem>,
    /// Ticket types in item order.
    pub ticket_types: Vec<TicketType>,
    pub subtotal: Money,
}

impl PricedBasket {
    pub fn candidates(&self) -> Vec<CandidateItem> {
        self.items
            .iter()
            .map(|item| CandidateItem {
                ticket_type_id: item.ticket_type_id,
                quantity: item.quantity,
                unit_price: item.unit_price,
            })
            .collect()
    }
}

/// Merges repeated ticket types, keeping first-seen order.
///
/// Fails with `InvalidQuantity` when a merged quantity does not fit a `u32`.
pub fn merge_lines(lines: &[LineRequest]) -> std::result::Result<Vec<LineRequest>, OrderError> {
    let mut merged: Vec<LineRequest> = Vec::with_capacity(lines.len());
    let mut index: HashMap<TicketTypeId, usize> = HashMap::new();
    for line in lines {
        match index.get(&line.ticket_type_id) {
            Some(&i) => {
                merged[i].quantity = merged[i].quantity.checked_add(line.quantity).ok_or(
                    OrderError::InvalidQuantity {
                        ticket_type_id: line.ticket_type_id,
                    },
                )?;
            }
            None => {
                index.insert(line.ticket_type_id, merged.len());
                merged.push(*line);
            }
        }
    }
    Ok(merged)
}

fn is_valid_code(code: &str) -> bool {
    !code.is_empty()
        && code.len() <= 32
        && code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Event metadata, ticket types and promo codes.
#[derive(Clone)]
pub struct CatalogService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl CatalogService {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Inserts or replaces event metadata pushed by the organizer service.
    #[tracing::instrument(skip(self, event), fields(event_id = %event.id))]
    pub async fn upsert_event(&self, event: EventInfo) -> Result<EventInfo> {
        if event.name.trim().is_empty() {
            return Err(CheckoutError::Validation("event name is required".into()));
        }
        if event.ends_at.is_some_and(|end| end < event.starts_at) {
            return Err(CheckoutError::Validation(
                "event cannot end before it starts".into(),
            ));
        }
        self.store.upsert_event(event.clone()).await?;
        tracing::info!(cancelled = event.cancelled, "Event synced");
        Ok(event)
    }

    pub async fn get_event(&self, event_id: EventId) -> Result<EventInfo> {
        self.store
            .get_event(event_id)
            .await?
            .ok_or_else(|| CheckoutError::not_found("event", event_id))
    }

    /// Loads an event managed by `organizer`.
    pub async fn owned_event(&self, event_id: EventId, organizer: OrganizerId) -> Result<EventInfo> {
        let event = self.get_event(event_id).await?;
        if event.organizer_id != organizer {
            return Err(CheckoutError::Forbidden(format!(
                "event {event_id} is managed by another organizer"
            )));
        }
        Ok(event)
    }

    #[tracing::instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_ticket_type(
        &self,
        event_id: EventId,
        input: NewTicketType,
    ) -> Result<TicketType> {
        let event = self.get_event(event_id).await?;
        let currency = Currency::new(&input.currency).ok_or_else(|| {
            CheckoutError::Validation(format!("invalid currency: {}", input.currency))
        })?;
        if input.name.trim().is_empty() {
            return Err(CheckoutError::Validation("ticket type name is required".into()));
        }
        if input.quantity == 0 {
            return Err(CheckoutError::Validation("quantity must be positive".into()));
        }
        if input.max_per_order == 0 {
            return Err(CheckoutError::Validation(
                "max_per_order must be positive".into(),
            ));
        }
        if input.unit_price.is_negative() {
            return Err(CheckoutError::Validation("unit price cannot be negative".into()));
        }
        if let (Some(start), Some(end)) = (input.sale_starts_at, input.sale_ends_at)
            && end <= start
        {
            return Err(CheckoutError::Validation(
                "sale window must end after it starts".into(),
            ));
        }

        let unit_price = if event.is_free {
            Money::zero()
        } else {
            input.unit_price
        };
        let ticket_type = TicketType::new(
            event.id,
            input.name.trim(),
            unit_price,
            currency,
            input.quantity,
            input.max_per_order,
        )
        .with_sale_window(input.sale_starts_at, input.sale_ends_at);

        let ticket_type = self.store.insert_ticket_type(ticket_type).await?;
        tracing::info!(ticket_type_id = %ticket_type.id, "Ticket type created");
        Ok(ticket_type)
    }

    pub async fn get_ticket_type(&self, ticket_type_id: TicketTypeId) -> Result<TicketType> {
        self.store
            .get_ticket_type(ticket_type_id)
            .await?
            .ok_or_else(|| CheckoutError::not_found("ticket type", ticket_type_id))
    }

    /// Ticket types of an event with their status at the current time.
    pub async fn list_ticket_types(&self, event_id: EventId) -> Result<Vec<TicketTypeView>> {
        self.get_event(event_id).await?;
        let now = self.clock.now();
        let views = self
            .store
            .list_ticket_types(event_id)
            .await?
            .into_iter()
            .map(|ticket_type| TicketTypeView {
                status: ticket_type.status(now),
                remaining: ticket_type.remaining(),
                ticket_type,
            })
            .collect();
        Ok(views)
    }

    #[tracing::instrument(skip(self, input), fields(code = %input.code))]
    pub async fn create_promo_code(
        &self,
        event_id: EventId,
        input: NewPromoCode,
    ) -> Result<PromoCode> {
        let event = self.get_event(event_id).await?;
        let code = PromoCode::normalize(&input.code);
        if !is_valid_code(&code) {
            return Err(CheckoutError::Validation(format!(
                "invalid promo code: {}",
                input.code
            )));
        }
        let discount = match input.discount {
            DiscountKind::Percentage(percent) => DiscountKind::percentage(percent),
            DiscountKind::Flat(amount) => DiscountKind::flat(amount),
        }
        .ok_or_else(|| {
            CheckoutError::Validation(
                "discount must be a percentage in 1..=100 or a positive amount".into(),
            )
        })?;
        if input.usage_limit == Some(0) {
            return Err(CheckoutError::Validation("usage limit must be positive".into()));
        }
        for ticket_type_id in &input.ticket_type_ids {
            let ticket_type = self.get_ticket_type(*ticket_type_id).await?;
            if ticket_type.event_id != event.id {
                return Err(OrderError::TicketTypeNotInEvent {
                    ticket_type_id: *ticket_type_id,
                    event_id: event.id,
                }
                .into());
            }
        }

        let mut promo = PromoCode::new(event.id, &code, discount)
            .restricted_to(input.ticket_type_ids);
        promo.usage_limit = input.usage_limit;
        promo.expires_at = input.expires_at;

        let promo = self.store.insert_promo_code(promo).await?;
        tracing::info!(promo_code_id = %promo.id, "Promo code created");
        Ok(promo)
    }

    /// Snapshots authoritative prices for a basket.
    ///
    /// Repeated ticket types are merged. Every type must belong to `event`
    /// and share one currency; a free event prices everything at zero.
    pub async fn price_lines(&self, event: &EventInfo, lines: &[LineRequest]) -> Result<PricedBasket> {
        if lines.is_empty() {
            return Err(OrderError::NoItems.into());
        }
        let lines = merge_lines(lines)?;
        if let Some(line) = lines.iter().find(|line| line.quantity == 0) {
            return Err(OrderError::InvalidQuantity {
                ticket_type_id: line.ticket_type_id,
            }
            .into());
        }

        let mut currency: Option<Currency> = None;
        let mut items = Vec::with_capacity(lines.len());
        let mut ticket_types = Vec::with_capacity(lines.len());
        let mut subtotal = Money::zero();
        for line in lines {
            let ticket_type = self.get_ticket_type(line.ticket_type_id).await?;
            if ticket_type.event_id != event.id {
                return Err(OrderError::TicketTypeNotInEvent {
                    ticket_type_id: ticket_type.id,
                    event_id: event.id,
                }
                .into());
            }
            match &currency {
                Some(expected) if *expected != ticket_type.currency => {
                    return Err(OrderError::MixedCurrency {
                        expected: expected.clone(),
                        found: ticket_type.currency.clone(),
                    }
                    .into());
                }
                Some(_) => {}
                None => currency = Some(ticket_type.currency.clone()),
            }

            if line.quantity > ticket_type.max_per_order {
                return Err(InsufficientInventory::ExceedsPerOrderCap {
                    ticket_type_id: ticket_type.id,
                    requested: line.quantity,
                    max_per_order: ticket_type.max_per_order,
                }
                .into());
            }

            let unit_price = if event.is_free {
                Money::zero()
            } else {
                ticket_type.unit_price
            };
            subtotal = unit_price
                .checked_multiply(line.quantity)
                .and_then(|line_total| subtotal.checked_add(line_total))
                .ok_or_else(|| CheckoutError::Validation("order total is too large".into()))?;
            items.push(OrderItem::new(
                ticket_type.id,
                ticket_type.name.clone(),
                line.quantity,
                unit_price,
            ));
            ticket_types.push(ticket_type);
        }

        let currency = currency.ok_or(OrderError::NoItems)?;
        Ok(PricedBasket {
            currency,
            items,
            ticket_types,
            subtotal,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use common::FixedClock;
    use store::InMemoryStore;

    fn event(is_free: bool) -> EventInfo {
        EventInfo {
            id: EventId::new(),
            organizer_id: OrganizerId::new(),
            name: "Afrobeats Night".to_string(),
            starts_at: Utc::now() + Duration::days(30),
            ends_at: None,
            cancelled: false,
            is_free,
        }
    }

    fn ticket_type(name: &str, price: i64, currency: &str) -> NewTicketType {
        NewTicketType {
            name: name.to_string(),
            unit_price: Money::from_minor(price),
            currency: currency.to_string(),
            quantity: 100,
            max_per_order: 10,
            sale_starts_at: None,
            sale_ends_at: None,
        }
    }

    async fn catalog() -> CatalogService {
        CatalogService::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(FixedClock::new(Utc::now())),
        )
    }

    #[test]
    fn test_merge_lines() {
        let a = TicketTypeId::new();
        let b = TicketTypeId::new();
        let merged = merge_lines(&[
            LineRequest { ticket_type_id: a, quantity: 1 },
            LineRequest { ticket_type_id: b, quantity: 2 },
            LineRequest { ticket_type_id: a, quantity: 3 },
        ])
        .unwrap();
        assert_eq!(
            merged,
            vec![
                LineRequest { ticket_type_id: a, quantity: 4 },
                LineRequest { ticket_type_id: b, quantity: 2 },
            ]
        );
    }

    #[test]
    fn test_merge_lines_rejects_overflow() {
        let a = TicketTypeId::new();
        let err = merge_lines(&[
            LineRequest { ticket_type_id: a, quantity: u32::MAX },
            LineRequest { ticket_type_id: a, quantity: 2 },
        ])
        .unwrap_err();
        assert_eq!(err.code(), "invalid_quantity");
    }

    #[tokio::test]
    async fn test_price_lines_snapshots_catalog_prices() {
        let catalog = catalog().await;
        let event = catalog.upsert_event(event(false)).await.unwrap();
        let ga = catalog
            .create_ticket_type(event.id, ticket_type("GA", 5_000, "ngn"))
            .await
            .unwrap();
        let vip = catalog
            .create_ticket_type(event.id, ticket_type("VIP", 20_000, "NGN"))
            .await
            .unwrap();

        let basket = catalog
            .price_lines(
                &event,
                &[
                    LineRequest { ticket_type_id: ga.id, quantity: 2 },
                    LineRequest { ticket_type_id: vip.id, quantity: 1 },
                ],
            )
            .await
            .unwrap();

        assert_eq!(basket.currency.code(), "NGN");
        assert_eq!(basket.subtotal.minor(), 30_000);
        assert_eq!(basket.items[0].ticket_type_name, "GA");
        assert_eq!(basket.candidates().len(), 2);
    }

    #[tokio::test]
    async fn test_price_lines_rejections() {
        let catalog = catalog().await;
        let event = catalog.upsert_event(event(false)).await.unwrap();
        let other = catalog.upsert_event(event_fixture_named("Other")).await.unwrap();
        let ngn = catalog
            .create_ticket_type(event.id, ticket_type("GA", 5_000, "NGN"))
            .await
            .unwrap();
        let usd = catalog
            .create_ticket_type(event.id, ticket_type("Intl", 5_000, "USD"))
            .await
            .unwrap();
        let foreign = catalog
            .create_ticket_type(other.id, ticket_type("GA", 5_000, "NGN"))
            .await
            .unwrap();

        let err = catalog.price_lines(&event, &[]).await.unwrap_err();
        assert_eq!(err.code(), "no_items");

        let err = catalog
            .price_lines(
                &event,
                &[
                    LineRequest { ticket_type_id: ngn.id, quantity: 1 },
                    LineRequest { ticket_type_id: usd.id, quantity: 1 },
                ],
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "mixed_currency");

        let err = catalog
            .price_lines(&event, &[LineRequest { ticket_type_id: foreign.id, quantity: 1 }])
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ticket_type_not_in_event");

        let err = catalog
            .price_lines(&event, &[LineRequest { ticket_type_id: ngn.id, quantity: 0 }])
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_quantity");

        let err = catalog
            .price_lines(
                &event,
                &[
                    LineRequest { ticket_type_id: ngn.id, quantity: u32::MAX },
                    LineRequest { ticket_type_id: ngn.id, quantity: 2 },
                ],
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_quantity");

        let err = catalog
            .price_lines(&event, &[LineRequest { ticket_type_id: ngn.id, quantity: 11 }])
            .await
            .unwrap_err();
        assert_eq!(err.code(), "exceeds_per_order_cap");
    }

    #[tokio::test]
    async fn test_price_lines_rejects_overflowing_total() {
        let catalog = catalog().await;
        let event = catalog.upsert_event(event(false)).await.unwrap();
        let pricey = catalog
            .create_ticket_type(event.id, ticket_type("Patron", i64::MAX / 2, "NGN"))
            .await
            .unwrap();

        let err = catalog
            .price_lines(&event, &[LineRequest { ticket_type_id: pricey.id, quantity: 3 }])
            .await
            .unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }

    fn event_fixture_named(name: &str) -> EventInfo {
        EventInfo {
            name: name.to_string(),
            ..event(false)
        }
    }

    #[tokio::test]
    async fn test_free_event_prices_at_zero() {
        let catalog = catalog().await;
        let event = catalog.upsert_event(event(true)).await.unwrap();
        let tt = catalog
            .create_ticket_type(event.id, ticket_type("RSVP", 1_000, "NGN"))
            .await
            .unwrap();
        assert_eq!(tt.unit_price, Money::zero());

        let basket = catalog
            .price_lines(&event, &[LineRequest { ticket_type_id: tt.id, quantity: 3 }])
            .await
            .unwrap();
        assert!(basket.subtotal.is_zero());
    }

    #[tokio::test]
    async fn test_promo_code_validation() {
        let catalog = catalog().await;
        let event = catalog.upsert_event(event(false)).await.unwrap();

        let promo = catalog
            .create_promo_code(
                event.id,
                NewPromoCode {
                    code: " save10 ".to_string(),
                    discount: DiscountKind::Percentage(10),
                    usage_limit: Some(1),
                    expires_at: None,
                    ticket_type_ids: Vec::new(),
                },
            )
            .await
            .unwrap();
        assert_eq!(promo.code, "SAVE10");
        assert_eq!(promo.usage_limit, Some(1));

        let err = catalog
            .create_promo_code(
                event.id,
                NewPromoCode {
                    code: "TOOMUCH".to_string(),
                    discount: DiscountKind::Percentage(150),
                    usage_limit: None,
                    expires_at: None,
                    ticket_type_ids: Vec::new(),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }

    #[tokio::test]
    async fn test_list_reports_status() {
        let catalog = catalog().await;
        let event = catalog.upsert_event(event(false)).await.unwrap();
        let mut input = ticket_type("Early Bird", 3_000, "NGN");
        input.sale_ends_at = Some(Utc::now() - Duration::days(1));
        input.sale_starts_at = Some(Utc::now() - Duration::days(10));
        catalog.create_ticket_type(event.id, input).await.unwrap();

        let views = catalog.list_ticket_types(event.id).await.unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].status, SaleStatus::Ended);
        assert_eq!(views[0].remaining, 100);
    }

    #[tokio::test]
    async fn test_owned_event_checks_organizer() {
        let catalog = catalog().await;
        let event = catalog.upsert_event(event(false)).await.unwrap();

        let owned = catalog.owned_event(event.id, event.organizer_id).await.unwrap();
        assert_eq!(owned.id, event.id);

        let err = catalog
            .owned_event(event.id, OrganizerId::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "forbidden");
    }
}
