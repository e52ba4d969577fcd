//! Promo code lookup and evaluation.

use std::sync::Arc;

use common::{Clock, EventId};
use domain::{Discount, PromoCode, evaluate};
use store::Store;

use crate::catalog::{CatalogService, LineRequest, PricedBasket};
use crate::error::Result;

/// Evaluates promo codes against priced baskets.
#[derive(Clone)]
pub struct PromoService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    catalog: CatalogService,
}

impl PromoService {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, catalog: CatalogService) -> Self {
        Self {
            store,
            clock,
            catalog,
        }
    }

    /// Evaluates `code` for an already priced basket.
    pub async fn evaluate(
        &self,
        event_id: EventId,
        code: &str,
        basket: &PricedBasket,
    ) -> Result<Discount> {
        let normalized = PromoCode::normalize(code);
        let promo = self.store.find_promo_code(event_id, &normalized).await?;
        let result = evaluate(
            promo.as_ref(),
            &normalized,
            event_id,
            &basket.candidates(),
            basket.subtotal,
            self.clock.now(),
        );

        match result {
            Ok(discount) => Ok(discount),
            Err(err) => {
                metrics::counter!("promo_rejections_total", "reason" => err.code()).increment(1);
                tracing::debug!(code = %normalized, reason = err.code(), "Promo code rejected");
                Err(err.into())
            }
        }
    }

    /// Prices `lines` from the catalog and evaluates `code` against them.
    #[tracing::instrument(skip(self, lines))]
    pub async fn validate(
        &self,
        event_id: EventId,
        code: &str,
        lines: &[LineRequest],
    ) -> Result<Discount> {
        let event = self.catalog.get_event(event_id).await?;
        let basket = self.catalog.price_lines(&event, lines).await?;
        self.evaluate(event.id, code, &basket).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{NewPromoCode, NewTicketType};
    use chrono::{Duration, Utc};
    use common::{FixedClock, Money, OrganizerId};
    use domain::{DiscountKind, EventInfo};
    use store::InMemoryStore;

    struct Fixture {
        promos: PromoService,
        catalog: CatalogService,
        clock: FixedClock,
        event: EventInfo,
    }

    async fn fixture() -> Fixture {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let clock = FixedClock::new(Utc::now());
        let catalog = CatalogService::new(store.clone(), Arc::new(clock.clone()));
        let promos = PromoService::new(store, Arc::new(clock.clone()), catalog.clone());
        let event = catalog
            .upsert_event(EventInfo {
                id: EventId::new(),
                organizer_id: OrganizerId::new(),
                name: "Lagos Jazz".to_string(),
                starts_at: clock.now() + Duration::days(14),
                ends_at: None,
                cancelled: false,
                is_free: false,
            })
            .await
            .unwrap();
        Fixture {
            promos,
            catalog,
            clock,
            event,
        }
    }

    fn ticket_type(name: &str, price: i64) -> NewTicketType {
        NewTicketType {
            name: name.to_string(),
            unit_price: Money::from_minor(price),
            currency: "NGN".to_string(),
            quantity: 50,
            max_per_order: 10,
            sale_starts_at: None,
            sale_ends_at: None,
        }
    }

    fn promo(code: &str, discount: DiscountKind) -> NewPromoCode {
        NewPromoCode {
            code: code.to_string(),
            discount,
            usage_limit: None,
            expires_at: None,
            ticket_type_ids: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_save10_on_ten_thousand() {
        let f = fixture().await;
        let tt = f
            .catalog
            .create_ticket_type(f.event.id, ticket_type("GA", 5_000))
            .await
            .unwrap();
        f.catalog
            .create_promo_code(f.event.id, promo("SAVE10", DiscountKind::Percentage(10)))
            .await
            .unwrap();

        let discount = f
            .promos
            .validate(
                f.event.id,
                "save10",
                &[LineRequest {
                    ticket_type_id: tt.id,
                    quantity: 2,
                }],
            )
            .await
            .unwrap();
        assert_eq!(discount.amount.minor(), 1_000);
        assert_eq!(discount.code, "SAVE10");
    }

    #[tokio::test]
    async fn test_code_is_scoped_to_event() {
        let f = fixture().await;
        let other = f
            .catalog
            .upsert_event(EventInfo {
                id: EventId::new(),
                ..f.event.clone()
            })
            .await
            .unwrap();
        let tt = f
            .catalog
            .create_ticket_type(other.id, ticket_type("GA", 5_000))
            .await
            .unwrap();
        f.catalog
            .create_promo_code(f.event.id, promo("ONLYA", DiscountKind::Percentage(50)))
            .await
            .unwrap();

        let err = f
            .promos
            .validate(
                other.id,
                "ONLYA",
                &[LineRequest {
                    ticket_type_id: tt.id,
                    quantity: 1,
                }],
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "promo_not_found");
    }

    #[tokio::test]
    async fn test_expired_and_restricted_codes() {
        let f = fixture().await;
        let ga = f
            .catalog
            .create_ticket_type(f.event.id, ticket_type("GA", 5_000))
            .await
            .unwrap();
        let vip = f
            .catalog
            .create_ticket_type(f.event.id, ticket_type("VIP", 20_000))
            .await
            .unwrap();

        let mut expiring = promo("SOON", DiscountKind::Flat(Money::from_minor(500)));
        expiring.expires_at = Some(f.clock.now() + Duration::hours(1));
        f.catalog.create_promo_code(f.event.id, expiring).await.unwrap();

        let mut vip_only = promo("VIPONLY", DiscountKind::Percentage(20));
        vip_only.ticket_type_ids = vec![vip.id];
        f.catalog.create_promo_code(f.event.id, vip_only).await.unwrap();

        let ga_line = [LineRequest {
            ticket_type_id: ga.id,
            quantity: 1,
        }];
        let err = f.promos.validate(f.event.id, "VIPONLY", &ga_line).await.unwrap_err();
        assert_eq!(err.code(), "promo_not_applicable");

        let mixed = [
            LineRequest {
                ticket_type_id: ga.id,
                quantity: 1,
            },
            LineRequest {
                ticket_type_id: vip.id,
                quantity: 1,
            },
        ];
        let discount = f.promos.validate(f.event.id, "VIPONLY", &mixed).await.unwrap();
        assert_eq!(discount.eligible_subtotal.minor(), 20_000);
        assert_eq!(discount.amount.minor(), 4_000);

        assert!(f.promos.validate(f.event.id, "soon", &ga_line).await.is_ok());
        f.clock.advance(Duration::hours(2));
        let err = f.promos.validate(f.event.id, "soon", &ga_line).await.unwrap_err();
        assert_eq!(err.code(), "promo_expired");
    }
}
