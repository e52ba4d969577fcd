use chrono::Utc;
use common::{BuyerId, Currency, EventId, Money, TicketTypeId};
use criterion::{Criterion, criterion_group, criterion_main};
use domain::{
    Buyer, CandidateItem, DiscountKind, FeePolicy, NewOrder, Order, OrderItem, PromoCode,
    TicketCodeSigner, compute_totals, evaluate, issue_tickets,
};

fn items(lines: usize) -> Vec<OrderItem> {
    (0..lines)
        .map(|i| {
            OrderItem::new(
                TicketTypeId::new(),
                format!("Tier {i}"),
                2,
                Money::from_minor(2_500 + i as i64 * 1_000),
            )
        })
        .collect()
}

fn bench_compute_totals(c: &mut Criterion) {
    let items = items(8);
    let fees = FeePolicy {
        basis_points: 250,
        per_ticket: Money::from_minor(100),
    };

    c.bench_function("domain/compute_totals", |b| {
        b.iter(|| compute_totals(&items, Money::from_minor(1_000), &fees));
    });
}

fn bench_evaluate_promo(c: &mut Criterion) {
    let event_id = EventId::new();
    let vip = TicketTypeId::new();
    let promo = PromoCode::new(event_id, "VIP20", DiscountKind::Percentage(20))
        .with_usage_limit(1_000)
        .restricted_to(vec![vip]);
    let mut candidates: Vec<CandidateItem> = (0..8)
        .map(|_| CandidateItem {
            ticket_type_id: TicketTypeId::new(),
            quantity: 1,
            unit_price: Money::from_minor(5_000),
        })
        .collect();
    candidates.push(CandidateItem {
        ticket_type_id: vip,
        quantity: 2,
        unit_price: Money::from_minor(20_000),
    });
    let subtotal: Money = candidates.iter().map(CandidateItem::line_total).sum();
    let now = Utc::now();

    c.bench_function("domain/evaluate_promo", |b| {
        b.iter(|| evaluate(Some(&promo), "vip20", event_id, &candidates, subtotal, now).unwrap());
    });
}

fn bench_place_and_issue(c: &mut Criterion) {
    let signer = TicketCodeSigner::new(b"bench-secret").unwrap();
    let buyer = Buyer::new(BuyerId::new(), "Bench Buyer", "bench@example.com");
    let currency = Currency::new("NGN").unwrap();

    c.bench_function("domain/place_free_order_and_issue", |b| {
        b.iter(|| {
            let request = NewOrder {
                event_id: EventId::new(),
                buyer: buyer.clone(),
                attendee: None,
                items: vec![OrderItem::new(TicketTypeId::new(), "Free", 4, Money::zero())],
                discount: None,
                currency: currency.clone(),
                fees: FeePolicy::none(),
                idempotency_key: None,
            };
            let (order, _) = Order::place(request, Utc::now()).unwrap();
            issue_tickets(&order, &signer, Utc::now())
        });
    });
}

fn bench_verify_code(c: &mut Criterion) {
    let signer = TicketCodeSigner::new(b"bench-secret").unwrap();
    let claims = domain::CodeClaims {
        ticket_number: "TKT-0123456789AB".to_string(),
        order_number: "ORD-0123456789AB".to_string(),
        revision: 3,
    };
    let code = signer.sign(&claims);

    c.bench_function("domain/verify_code", |b| {
        b.iter(|| signer.verify(&code).unwrap());
    });
}

criterion_group!(
    benches,
    bench_compute_totals,
    bench_evaluate_promo,
    bench_place_and_issue,
    bench_verify_code
);
criterion_main!(benches);
