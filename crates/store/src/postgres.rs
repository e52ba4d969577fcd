use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    BuyerId, Currency, EventId, Money, OrderId, OrganizerId, PromoCodeId, ReservationId, TicketId,
    TicketTypeId, TransferId,
};
use domain::{
    Attendee, Buyer, DomainEvent, EventInfo, InsufficientInventory, Order, OrderEvent, OrderItem,
    OrderStatus, OrderTotals, PromoCode, Ticket, TicketTransfer, TicketType, TransferStatus,
};
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Result, StoreError,
    store::{
        IdempotencyClaim, InventoryEffect, NewOrderRecord, OrderTransition, PaymentAttempt,
        PlaceOutcome, RecordedEvent, Reservation, Store, TransitionOutcome,
    },
};

const EVENT_COLUMNS: &str = "id, organizer_id, name, starts_at, ends_at, cancelled, is_free";

const TICKET_TYPE_COLUMNS: &str = "id, event_id, name, unit_price, currency, quantity, \
     quantity_sold, max_per_order, sale_starts_at, sale_ends_at";

const PROMO_COLUMNS: &str = "id, event_id, code, discount, usage_limit, usage_count, expires_at, \
     active, ticket_type_ids";

const ORDER_COLUMNS: &str = "id, order_number, event_id, buyer_id, buyer_name, buyer_email, \
     attendee_name, attendee_email, items, promo_code_id, promo_code, subtotal, discount, \
     service_fee, total, currency, status, payment_reference, payment_attempts, idempotency_key, \
     version, created_at, paid_at, completed_at, closed_at";

const RESERVATION_COLUMNS: &str =
    "id, ticket_type_id, order_id, quantity, created_at, committed_at, released_at";

const TICKET_COLUMNS: &str = "id, ticket_number, order_id, order_number, event_id, \
     ticket_type_id, ticket_type_name, holder_id, attendee_name, attendee_email, status, code, \
     code_revision, checked_in_at, issued_at";

const TRANSFER_COLUMNS: &str =
    "id, ticket_id, sender_id, recipient_email, status, expires_at, created_at, closed_at";

/// PostgreSQL-backed store implementation.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }
}

// Row decoding

fn read_u32(row: &PgRow, column: &str) -> Result<u32> {
    let value: i64 = row.try_get(column)?;
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("{column} out of range: {value}")))
}

fn read_money(row: &PgRow, column: &str) -> Result<Money> {
    Ok(Money::from_minor(row.try_get(column)?))
}

fn read_currency(row: &PgRow, column: &str) -> Result<Currency> {
    let code: String = row.try_get(column)?;
    Currency::new(&code).ok_or_else(|| StoreError::Corrupt(format!("invalid currency: {code}")))
}

fn row_to_event(row: PgRow) -> Result<EventInfo> {
    Ok(EventInfo {
        id: EventId::from_uuid(row.try_get("id")?),
        organizer_id: OrganizerId::from_uuid(row.try_get("organizer_id")?),
        name: row.try_get("name")?,
        starts_at: row.try_get("starts_at")?,
        ends_at: row.try_get("ends_at")?,
        cancelled: row.try_get("cancelled")?,
        is_free: row.try_get("is_free")?,
    })
}

fn row_to_ticket_type(row: PgRow) -> Result<TicketType> {
    Ok(TicketType {
        id: TicketTypeId::from_uuid(row.try_get("id")?),
        event_id: EventId::from_uuid(row.try_get("event_id")?),
        name: row.try_get("name")?,
        unit_price: read_money(&row, "unit_price")?,
        currency: read_currency(&row, "currency")?,
        quantity: read_u32(&row, "quantity")?,
        quantity_sold: read_u32(&row, "quantity_sold")?,
        max_per_order: read_u32(&row, "max_per_order")?,
        sale_starts_at: row.try_get("sale_starts_at")?,
        sale_ends_at: row.try_get("sale_ends_at")?,
    })
}

fn row_to_promo(row: PgRow) -> Result<PromoCode> {
    let discount: serde_json::Value = row.try_get("discount")?;
    let usage_limit: Option<i64> = row.try_get("usage_limit")?;
    let ticket_type_ids: Vec<Uuid> = row.try_get("ticket_type_ids")?;

    Ok(PromoCode {
        id: PromoCodeId::from_uuid(row.try_get("id")?),
        event_id: EventId::from_uuid(row.try_get("event_id")?),
        code: row.try_get("code")?,
        discount: serde_json::from_value(discount)?,
        usage_limit: usage_limit
            .map(u32::try_from)
            .transpose()
            .map_err(|_| StoreError::Corrupt("usage_limit out of range".to_string()))?,
        usage_count: read_u32(&row, "usage_count")?,
        expires_at: row.try_get("expires_at")?,
        active: row.try_get("active")?,
        ticket_type_ids: ticket_type_ids.into_iter().map(TicketTypeId::from_uuid).collect(),
    })
}

fn row_to_order(row: PgRow) -> Result<Order> {
    let items: serde_json::Value = row.try_get("items")?;
    let items: Vec<OrderItem> = serde_json::from_value(items)?;
    let status: String = row.try_get("status")?;
    let promo_code_id: Option<Uuid> = row.try_get("promo_code_id")?;

    Ok(Order {
        id: OrderId::from_uuid(row.try_get("id")?),
        order_number: row.try_get("order_number")?,
        event_id: EventId::from_uuid(row.try_get("event_id")?),
        buyer: Buyer {
            id: BuyerId::from_uuid(row.try_get("buyer_id")?),
            name: row.try_get("buyer_name")?,
            email: row.try_get("buyer_email")?,
        },
        attendee: Attendee {
            name: row.try_get("attendee_name")?,
            email: row.try_get("attendee_email")?,
        },
        items,
        promo_code_id: promo_code_id.map(PromoCodeId::from_uuid),
        promo_code: row.try_get("promo_code")?,
        totals: OrderTotals {
            subtotal: read_money(&row, "subtotal")?,
            discount: read_money(&row, "discount")?,
            service_fee: read_money(&row, "service_fee")?,
            total: read_money(&row, "total")?,
        },
        currency: read_currency(&row, "currency")?,
        status: status.parse()?,
        payment_reference: row.try_get("payment_reference")?,
        payment_attempts: read_u32(&row, "payment_attempts")?,
        idempotency_key: row.try_get("idempotency_key")?,
        version: read_u32(&row, "version")?,
        created_at: row.try_get("created_at")?,
        paid_at: row.try_get("paid_at")?,
        completed_at: row.try_get("completed_at")?,
        closed_at: row.try_get("closed_at")?,
    })
}

fn row_to_reservation(row: PgRow) -> Result<Reservation> {
    let order_id: Option<Uuid> = row.try_get("order_id")?;
    Ok(Reservation {
        id: ReservationId::from_uuid(row.try_get("id")?),
        ticket_type_id: TicketTypeId::from_uuid(row.try_get("ticket_type_id")?),
        order_id: order_id.map(OrderId::from_uuid),
        quantity: read_u32(&row, "quantity")?,
        created_at: row.try_get("created_at")?,
        committed_at: row.try_get("committed_at")?,
        released_at: row.try_get("released_at")?,
    })
}

fn row_to_attempt(row: PgRow) -> Result<PaymentAttempt> {
    Ok(PaymentAttempt {
        reference: row.try_get("reference")?,
        order_id: OrderId::from_uuid(row.try_get("order_id")?),
        attempt: read_u32(&row, "attempt")?,
        amount: read_money(&row, "amount")?,
        currency: read_currency(&row, "currency")?,
        created_at: row.try_get("created_at")?,
        superseded: row.try_get("superseded")?,
    })
}

fn row_to_ticket(row: PgRow) -> Result<Ticket> {
    let status: String = row.try_get("status")?;
    Ok(Ticket {
        id: TicketId::from_uuid(row.try_get("id")?),
        ticket_number: row.try_get("ticket_number")?,
        order_id: OrderId::from_uuid(row.try_get("order_id")?),
        order_number: row.try_get("order_number")?,
        event_id: EventId::from_uuid(row.try_get("event_id")?),
        ticket_type_id: TicketTypeId::from_uuid(row.try_get("ticket_type_id")?),
        ticket_type_name: row.try_get("ticket_type_name")?,
        holder_id: BuyerId::from_uuid(row.try_get("holder_id")?),
        attendee_name: row.try_get("attendee_name")?,
        attendee_email: row.try_get("attendee_email")?,
        status: status.parse()?,
        code: row.try_get("code")?,
        code_revision: read_u32(&row, "code_revision")?,
        checked_in_at: row.try_get("checked_in_at")?,
        issued_at: row.try_get("issued_at")?,
    })
}

fn row_to_transfer(row: PgRow) -> Result<TicketTransfer> {
    let status: String = row.try_get("status")?;
    Ok(TicketTransfer {
        id: TransferId::from_uuid(row.try_get("id")?),
        ticket_id: TicketId::from_uuid(row.try_get("ticket_id")?),
        sender_id: BuyerId::from_uuid(row.try_get("sender_id")?),
        recipient_email: row.try_get("recipient_email")?,
        status: status.parse()?,
        expires_at: row.try_get("expires_at")?,
        created_at: row.try_get("created_at")?,
        closed_at: row.try_get("closed_at")?,
    })
}

fn row_to_recorded_event(row: PgRow) -> Result<RecordedEvent> {
    let payload: serde_json::Value = row.try_get("payload")?;
    Ok(RecordedEvent {
        sequence: row.try_get("sequence")?,
        order_id: OrderId::from_uuid(row.try_get("order_id")?),
        event_type: row.try_get("event_type")?,
        event: serde_json::from_value(payload)?,
        recorded_at: row.try_get("recorded_at")?,
    })
}

/// Name of the unique constraint or index an error violated, if any.
fn unique_violation(err: &sqlx::Error) -> Option<String> {
    if let sqlx::Error::Database(db_err) = err
        && db_err.is_unique_violation()
    {
        return Some(db_err.constraint().unwrap_or_default().to_string());
    }
    None
}

// Statements shared between primitives. Each takes the caller's connection so
// it joins the caller's transaction.

async fn event_exists(conn: &mut PgConnection, event_id: EventId) -> Result<bool> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM events WHERE id = $1)")
        .bind(event_id.as_uuid())
        .fetch_one(conn)
        .await?;
    Ok(exists)
}

/// Conditionally claims capacity. On refusal, returns the precise reason.
async fn increment_sold(
    conn: &mut PgConnection,
    ticket_type_id: TicketTypeId,
    quantity: u32,
) -> Result<()> {
    if quantity == 0 {
        return Err(InsufficientInventory::InvalidQuantity { ticket_type_id }.into());
    }

    let updated = sqlx::query(
        r#"
        UPDATE ticket_types
        SET quantity_sold = quantity_sold + $2
        WHERE id = $1 AND quantity_sold + $2 <= quantity
        "#,
    )
    .bind(ticket_type_id.as_uuid())
    .bind(i64::from(quantity))
    .execute(&mut *conn)
    .await?;

    if updated.rows_affected() == 1 {
        return Ok(());
    }

    let row = sqlx::query(&format!(
        "SELECT {TICKET_TYPE_COLUMNS} FROM ticket_types WHERE id = $1"
    ))
    .bind(ticket_type_id.as_uuid())
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => {
            let ticket_type = row_to_ticket_type(row)?;
            tracing::debug!(
                ticket_type_id = %ticket_type_id,
                requested = quantity,
                remaining = ticket_type.remaining(),
                "Capacity refused"
            );
            Err(ticket_type.sold_out(quantity).into())
        }
        None => Err(StoreError::not_found("ticket type", ticket_type_id)),
    }
}

async fn insert_reservation(conn: &mut PgConnection, reservation: &Reservation) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO inventory_reservations
            (id, ticket_type_id, order_id, quantity, created_at, committed_at, released_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(reservation.id.as_uuid())
    .bind(reservation.ticket_type_id.as_uuid())
    .bind(reservation.order_id.map(|id| id.as_uuid()))
    .bind(i64::from(reservation.quantity))
    .bind(reservation.created_at)
    .bind(reservation.committed_at)
    .bind(reservation.released_at)
    .execute(conn)
    .await
    .map_err(|e| match unique_violation(&e) {
        Some(_) => StoreError::Duplicate {
            entity: "reservation",
            key: reservation.id.to_string(),
        },
        None => StoreError::Database(e),
    })?;
    Ok(())
}

/// Increments promo usage if under the limit. Returns false when refused.
async fn redeem_promo(conn: &mut PgConnection, promo_code_id: PromoCodeId) -> Result<bool> {
    let updated = sqlx::query(
        r#"
        UPDATE promo_codes
        SET usage_count = usage_count + 1
        WHERE id = $1 AND (usage_limit IS NULL OR usage_count < usage_limit)
        "#,
    )
    .bind(promo_code_id.as_uuid())
    .execute(conn)
    .await?;
    Ok(updated.rows_affected() == 1)
}

async fn insert_order(conn: &mut PgConnection, order: &Order) -> Result<()> {
    let items = serde_json::to_value(&order.items)?;
    sqlx::query(&format!(
        "INSERT INTO orders ({ORDER_COLUMNS}) VALUES \
         ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, \
          $20, $21, $22, $23, $24, $25)"
    ))
    .bind(order.id.as_uuid())
    .bind(&order.order_number)
    .bind(order.event_id.as_uuid())
    .bind(order.buyer.id.as_uuid())
    .bind(&order.buyer.name)
    .bind(&order.buyer.email)
    .bind(&order.attendee.name)
    .bind(&order.attendee.email)
    .bind(items)
    .bind(order.promo_code_id.map(|id| id.as_uuid()))
    .bind(&order.promo_code)
    .bind(order.totals.subtotal.minor())
    .bind(order.totals.discount.minor())
    .bind(order.totals.service_fee.minor())
    .bind(order.totals.total.minor())
    .bind(order.currency.code())
    .bind(order.status.as_str())
    .bind(&order.payment_reference)
    .bind(i64::from(order.payment_attempts))
    .bind(&order.idempotency_key)
    .bind(i64::from(order.version))
    .bind(order.created_at)
    .bind(order.paid_at)
    .bind(order.completed_at)
    .bind(order.closed_at)
    .execute(conn)
    .await
    .map_err(|e| match unique_violation(&e) {
        Some(_) => StoreError::Duplicate {
            entity: "order",
            key: order.order_number.clone(),
        },
        None => StoreError::Database(e),
    })?;
    Ok(())
}

async fn append_events(
    conn: &mut PgConnection,
    order_id: OrderId,
    events: &[OrderEvent],
) -> Result<()> {
    for event in events {
        sqlx::query(
            r#"
            INSERT INTO order_events (order_id, event_type, payload, recorded_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(event.event_type())
        .bind(serde_json::to_value(event)?)
        .bind(event.occurred_at())
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn insert_tickets(conn: &mut PgConnection, tickets: &[Ticket]) -> Result<()> {
    for ticket in tickets {
        sqlx::query(&format!(
            "INSERT INTO tickets ({TICKET_COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)"
        ))
        .bind(ticket.id.as_uuid())
        .bind(&ticket.ticket_number)
        .bind(ticket.order_id.as_uuid())
        .bind(&ticket.order_number)
        .bind(ticket.event_id.as_uuid())
        .bind(ticket.ticket_type_id.as_uuid())
        .bind(&ticket.ticket_type_name)
        .bind(ticket.holder_id.as_uuid())
        .bind(&ticket.attendee_name)
        .bind(&ticket.attendee_email)
        .bind(ticket.status.as_str())
        .bind(&ticket.code)
        .bind(i64::from(ticket.code_revision))
        .bind(ticket.checked_in_at)
        .bind(ticket.issued_at)
        .execute(&mut *conn)
        .await
        .map_err(|e| match unique_violation(&e) {
            Some(_) => StoreError::Duplicate {
                entity: "ticket",
                key: ticket.ticket_number.clone(),
            },
            None => StoreError::Database(e),
        })?;
    }
    Ok(())
}

/// Releases every unreleased reservation of an order and returns the seats.
async fn release_order_reservations(
    conn: &mut PgConnection,
    order_id: OrderId,
    at: DateTime<Utc>,
) -> Result<u32> {
    let released: Vec<i64> = sqlx::query_scalar(
        r#"
        WITH released AS (
            UPDATE inventory_reservations
            SET released_at = $2
            WHERE order_id = $1 AND released_at IS NULL
            RETURNING ticket_type_id, quantity
        ), per_type AS (
            SELECT ticket_type_id, SUM(quantity)::BIGINT AS quantity
            FROM released
            GROUP BY ticket_type_id
        )
        UPDATE ticket_types t
        SET quantity_sold = GREATEST(t.quantity_sold - p.quantity, 0)
        FROM per_type p
        WHERE t.id = p.ticket_type_id
        RETURNING p.quantity
        "#,
    )
    .bind(order_id.as_uuid())
    .bind(at)
    .fetch_all(conn)
    .await?;

    let total: i64 = released.iter().sum();
    u32::try_from(total).map_err(|_| StoreError::Corrupt(format!("released quantity {total}")))
}

#[async_trait]
impl Store for PostgresStore {
    async fn upsert_event(&self, event: EventInfo) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO events (id, organizer_id, name, starts_at, ends_at, cancelled, is_free)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                organizer_id = EXCLUDED.organizer_id,
                name = EXCLUDED.name,
                starts_at = EXCLUDED.starts_at,
                ends_at = EXCLUDED.ends_at,
                cancelled = EXCLUDED.cancelled,
                is_free = EXCLUDED.is_free,
                updated_at = NOW()
            "#,
        )
        .bind(event.id.as_uuid())
        .bind(event.organizer_id.as_uuid())
        .bind(&event.name)
        .bind(event.starts_at)
        .bind(event.ends_at)
        .bind(event.cancelled)
        .bind(event.is_free)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_event(&self, event_id: EventId) -> Result<Option<EventInfo>> {
        sqlx::query(&format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1"))
            .bind(event_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .map(row_to_event)
            .transpose()
    }

    async fn insert_ticket_type(&self, ticket_type: TicketType) -> Result<TicketType> {
        let mut conn = self.pool.acquire().await?;
        if !event_exists(&mut conn, ticket_type.event_id).await? {
            return Err(StoreError::not_found("event", ticket_type.event_id));
        }

        let row = sqlx::query(&format!(
            "INSERT INTO ticket_types ({TICKET_TYPE_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, 0, $7, $8, $9) \
             RETURNING {TICKET_TYPE_COLUMNS}"
        ))
        .bind(ticket_type.id.as_uuid())
        .bind(ticket_type.event_id.as_uuid())
        .bind(&ticket_type.name)
        .bind(ticket_type.unit_price.minor())
        .bind(ticket_type.currency.code())
        .bind(i64::from(ticket_type.quantity))
        .bind(i64::from(ticket_type.max_per_order))
        .bind(ticket_type.sale_starts_at)
        .bind(ticket_type.sale_ends_at)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| match unique_violation(&e) {
            Some(_) => StoreError::Duplicate {
                entity: "ticket type",
                key: ticket_type.id.to_string(),
            },
            None => StoreError::Database(e),
        })?;

        row_to_ticket_type(row)
    }

    async fn get_ticket_type(&self, ticket_type_id: TicketTypeId) -> Result<Option<TicketType>> {
        sqlx::query(&format!(
            "SELECT {TICKET_TYPE_COLUMNS} FROM ticket_types WHERE id = $1"
        ))
        .bind(ticket_type_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .map(row_to_ticket_type)
        .transpose()
    }

    async fn list_ticket_types(&self, event_id: EventId) -> Result<Vec<TicketType>> {
        let rows = sqlx::query(&format!(
            "SELECT {TICKET_TYPE_COLUMNS} FROM ticket_types WHERE event_id = $1 \
             ORDER BY unit_price ASC, name ASC"
        ))
        .bind(event_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_ticket_type).collect()
    }

    async fn insert_promo_code(&self, promo: PromoCode) -> Result<PromoCode> {
        let mut conn = self.pool.acquire().await?;
        if !event_exists(&mut conn, promo.event_id).await? {
            return Err(StoreError::not_found("event", promo.event_id));
        }

        let code = PromoCode::normalize(&promo.code);
        let ticket_type_ids: Vec<Uuid> = promo
            .ticket_type_ids
            .iter()
            .map(|id| id.as_uuid())
            .collect();

        let row = sqlx::query(&format!(
            "INSERT INTO promo_codes ({PROMO_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING {PROMO_COLUMNS}"
        ))
        .bind(promo.id.as_uuid())
        .bind(promo.event_id.as_uuid())
        .bind(&code)
        .bind(serde_json::to_value(&promo.discount)?)
        .bind(promo.usage_limit.map(i64::from))
        .bind(i64::from(promo.usage_count))
        .bind(promo.expires_at)
        .bind(promo.active)
        .bind(ticket_type_ids)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| match unique_violation(&e) {
            Some(_) => StoreError::Duplicate {
                entity: "promo code",
                key: code.clone(),
            },
            None => StoreError::Database(e),
        })?;

        row_to_promo(row)
    }

    async fn find_promo_code(&self, event_id: EventId, code: &str) -> Result<Option<PromoCode>> {
        sqlx::query(&format!(
            "SELECT {PROMO_COLUMNS} FROM promo_codes WHERE event_id = $1 AND code = $2"
        ))
        .bind(event_id.as_uuid())
        .bind(code)
        .fetch_optional(&self.pool)
        .await?
        .map(row_to_promo)
        .transpose()
    }

    async fn get_promo_code(&self, promo_code_id: PromoCodeId) -> Result<Option<PromoCode>> {
        sqlx::query(&format!("SELECT {PROMO_COLUMNS} FROM promo_codes WHERE id = $1"))
            .bind(promo_code_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .map(row_to_promo)
            .transpose()
    }

    async fn reserve(
        &self,
        reservation_id: ReservationId,
        ticket_type_id: TicketTypeId,
        quantity: u32,
        at: DateTime<Utc>,
    ) -> Result<Reservation> {
        let mut tx = self.pool.begin().await?;

        increment_sold(&mut tx, ticket_type_id, quantity).await?;
        let reservation = Reservation {
            id: reservation_id,
            ticket_type_id,
            order_id: None,
            quantity,
            created_at: at,
            committed_at: None,
            released_at: None,
        };
        insert_reservation(&mut tx, &reservation).await?;

        tx.commit().await?;
        Ok(reservation)
    }

    async fn release(&self, reservation_id: ReservationId, at: DateTime<Utc>) -> Result<bool> {
        let released = sqlx::query(
            r#"
            WITH released AS (
                UPDATE inventory_reservations
                SET released_at = $2
                WHERE id = $1 AND released_at IS NULL
                RETURNING ticket_type_id, quantity
            )
            UPDATE ticket_types t
            SET quantity_sold = GREATEST(t.quantity_sold - r.quantity, 0)
            FROM released r
            WHERE t.id = r.ticket_type_id
            "#,
        )
        .bind(reservation_id.as_uuid())
        .bind(at)
        .execute(&self.pool)
        .await?;

        if released.rows_affected() == 1 {
            return Ok(true);
        }
        match self.get_reservation(reservation_id).await? {
            Some(_) => Ok(false),
            None => Err(StoreError::not_found("reservation", reservation_id)),
        }
    }

    async fn commit(&self, reservation_id: ReservationId, at: DateTime<Utc>) -> Result<bool> {
        let committed = sqlx::query(
            r#"
            UPDATE inventory_reservations
            SET committed_at = $2
            WHERE id = $1 AND released_at IS NULL AND committed_at IS NULL
            "#,
        )
        .bind(reservation_id.as_uuid())
        .bind(at)
        .execute(&self.pool)
        .await?;

        if committed.rows_affected() == 1 {
            return Ok(true);
        }
        match self.get_reservation(reservation_id).await? {
            Some(_) => Ok(false),
            None => Err(StoreError::not_found("reservation", reservation_id)),
        }
    }

    async fn get_reservation(&self, reservation_id: ReservationId) -> Result<Option<Reservation>> {
        sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM inventory_reservations WHERE id = $1"
        ))
        .bind(reservation_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .map(row_to_reservation)
        .transpose()
    }

    async fn restock(&self, ticket_type_id: TicketTypeId, quantity: u32) -> Result<TicketType> {
        sqlx::query(&format!(
            "UPDATE ticket_types SET quantity_sold = GREATEST(quantity_sold - $2, 0) \
             WHERE id = $1 RETURNING {TICKET_TYPE_COLUMNS}"
        ))
        .bind(ticket_type_id.as_uuid())
        .bind(i64::from(quantity))
        .fetch_optional(&self.pool)
        .await?
        .map(row_to_ticket_type)
        .transpose()?
        .ok_or_else(|| StoreError::not_found("ticket type", ticket_type_id))
    }

    async fn place_order(&self, record: NewOrderRecord) -> Result<PlaceOutcome> {
        let order = record.order;
        let mut tx = self.pool.begin().await?;

        if let Some(claim) = &record.idempotency {
            // A concurrent claim on the same key blocks here until the other
            // transaction finishes.
            let claimed: Option<Uuid> = sqlx::query_scalar(
                r#"
                INSERT INTO idempotency_keys (buyer_id, key, order_id, created_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (buyer_id, key) DO UPDATE
                    SET order_id = EXCLUDED.order_id, created_at = EXCLUDED.created_at
                    WHERE idempotency_keys.created_at < $5
                RETURNING order_id
                "#,
            )
            .bind(claim.buyer_id.as_uuid())
            .bind(&claim.key)
            .bind(order.id.as_uuid())
            .bind(order.created_at)
            .bind(claim.not_before)
            .fetch_optional(&mut *tx)
            .await?;

            if claimed.is_none() {
                let existing_id: Uuid = sqlx::query_scalar(
                    "SELECT order_id FROM idempotency_keys WHERE buyer_id = $1 AND key = $2",
                )
                .bind(claim.buyer_id.as_uuid())
                .bind(&claim.key)
                .fetch_one(&mut *tx)
                .await?;
                tx.rollback().await?;

                let existing_id = OrderId::from_uuid(existing_id);
                let existing = self
                    .get_order(existing_id)
                    .await?
                    .ok_or_else(|| StoreError::not_found("order", existing_id))?;
                return Ok(PlaceOutcome::Existing(existing));
            }
        }

        if !event_exists(&mut tx, order.event_id).await? {
            return Err(StoreError::not_found("event", order.event_id));
        }
        insert_order(&mut tx, &order).await?;

        let committed_at = (order.status == OrderStatus::Completed).then_some(order.created_at);
        for item in &order.items {
            increment_sold(&mut tx, item.ticket_type_id, item.quantity).await?;
            insert_reservation(
                &mut tx,
                &Reservation {
                    id: item.reservation_id,
                    ticket_type_id: item.ticket_type_id,
                    order_id: Some(order.id),
                    quantity: item.quantity,
                    created_at: order.created_at,
                    committed_at,
                    released_at: None,
                },
            )
            .await?;
        }

        if record.redeem_promo
            && let Some(promo_code_id) = order.promo_code_id
            && !redeem_promo(&mut tx, promo_code_id).await?
        {
            return Err(StoreError::PromoUsageExhausted { promo_code_id });
        }

        append_events(&mut tx, order.id, &record.events).await?;
        insert_tickets(&mut tx, &record.tickets).await?;

        tx.commit().await?;
        Ok(PlaceOutcome::Created(order))
    }

    async fn find_idempotent_order(&self, claim: &IdempotencyClaim) -> Result<Option<Order>> {
        sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = \
             (SELECT order_id FROM idempotency_keys \
              WHERE buyer_id = $1 AND key = $2 AND created_at >= $3)"
        ))
        .bind(claim.buyer_id.as_uuid())
        .bind(&claim.key)
        .bind(claim.not_before)
        .fetch_optional(&self.pool)
        .await?
        .map(row_to_order)
        .transpose()
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .map(row_to_order)
            .transpose()
    }

    async fn find_order_by_payment_reference(&self, reference: &str) -> Result<Option<Order>> {
        sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = \
             (SELECT order_id FROM payment_attempts WHERE reference = $1)"
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?
        .map(row_to_order)
        .transpose()
    }

    async fn transition_order(&self, transition: OrderTransition) -> Result<TransitionOutcome> {
        let order = transition.order;
        let at = transition.at;
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, payment_reference = $3, payment_attempts = $4, version = $5,
                paid_at = $6, completed_at = $7, closed_at = $8
            WHERE id = $1 AND status = $9
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.status.as_str())
        .bind(&order.payment_reference)
        .bind(i64::from(order.payment_attempts))
        .bind(i64::from(order.version))
        .bind(order.paid_at)
        .bind(order.completed_at)
        .bind(order.closed_at)
        .bind(transition.expected_status.as_str())
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            let actual: Option<String> =
                sqlx::query_scalar("SELECT status FROM orders WHERE id = $1")
                    .bind(order.id.as_uuid())
                    .fetch_optional(&mut *tx)
                    .await?;
            return match actual {
                Some(actual) => Err(StoreError::StatusConflict {
                    order_id: order.id,
                    expected: transition.expected_status,
                    actual: actual.parse()?,
                }),
                None => Err(StoreError::not_found("order", order.id)),
            };
        }

        if let Some(attempt) = &transition.payment_attempt {
            sqlx::query("UPDATE payment_attempts SET superseded = TRUE WHERE order_id = $1")
                .bind(order.id.as_uuid())
                .execute(&mut *tx)
                .await?;
            sqlx::query(
                r#"
                INSERT INTO payment_attempts
                    (reference, order_id, attempt, amount, currency, created_at, superseded)
                VALUES ($1, $2, $3, $4, $5, $6, FALSE)
                "#,
            )
            .bind(&attempt.reference)
            .bind(attempt.order_id.as_uuid())
            .bind(i64::from(attempt.attempt))
            .bind(attempt.amount.minor())
            .bind(attempt.currency.code())
            .bind(attempt.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| match unique_violation(&e) {
                Some(_) => StoreError::Duplicate {
                    entity: "payment attempt",
                    key: attempt.reference.clone(),
                },
                None => StoreError::Database(e),
            })?;
        }

        let released_quantity = match transition.inventory {
            InventoryEffect::Keep => 0,
            InventoryEffect::Commit => {
                sqlx::query(
                    r#"
                    UPDATE inventory_reservations
                    SET committed_at = $2
                    WHERE order_id = $1 AND released_at IS NULL AND committed_at IS NULL
                    "#,
                )
                .bind(order.id.as_uuid())
                .bind(at)
                .execute(&mut *tx)
                .await?;
                0
            }
            InventoryEffect::Release => release_order_reservations(&mut tx, order.id, at).await?,
        };

        let mut promo_over_limit = false;
        if transition.redeem_promo
            && let Some(promo_code_id) = order.promo_code_id
        {
            promo_over_limit = !redeem_promo(&mut tx, promo_code_id).await?;
        }

        insert_tickets(&mut tx, &transition.issue_tickets).await?;

        if let Some(status) = transition.invalidate_tickets {
            sqlx::query("UPDATE tickets SET status = $2 WHERE order_id = $1 AND status = 'ACTIVE'")
                .bind(order.id.as_uuid())
                .bind(status.as_str())
                .execute(&mut *tx)
                .await?;
        }

        if transition.cancel_transfers {
            sqlx::query(
                r#"
                UPDATE ticket_transfers
                SET status = 'CANCELLED', closed_at = $2
                WHERE status = 'PENDING'
                  AND ticket_id IN (SELECT id FROM tickets WHERE order_id = $1)
                "#,
            )
            .bind(order.id.as_uuid())
            .bind(at)
            .execute(&mut *tx)
            .await?;
        }

        append_events(&mut tx, order.id, &transition.events).await?;

        tx.commit().await?;
        Ok(TransitionOutcome {
            order,
            promo_over_limit,
            released_quantity,
        })
    }

    async fn order_events(&self, order_id: OrderId) -> Result<Vec<RecordedEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT sequence, order_id, event_type, payload, recorded_at
            FROM order_events
            WHERE order_id = $1
            ORDER BY sequence ASC
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_recorded_event).collect()
    }

    async fn payment_attempts(&self, order_id: OrderId) -> Result<Vec<PaymentAttempt>> {
        let rows = sqlx::query(
            r#"
            SELECT reference, order_id, attempt, amount, currency, created_at, superseded
            FROM payment_attempts
            WHERE order_id = $1
            ORDER BY attempt ASC
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_attempt).collect()
    }

    async fn pending_orders_created_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE status = 'PENDING' AND created_at < $1 \
             ORDER BY created_at ASC LIMIT $2"
        ))
        .bind(cutoff)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_order).collect()
    }

    async fn get_ticket(&self, ticket_id: TicketId) -> Result<Option<Ticket>> {
        sqlx::query(&format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE id = $1"))
            .bind(ticket_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .map(row_to_ticket)
            .transpose()
    }

    async fn find_ticket_by_number(&self, ticket_number: &str) -> Result<Option<Ticket>> {
        sqlx::query(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE ticket_number = $1"
        ))
        .bind(ticket_number)
        .fetch_optional(&self.pool)
        .await?
        .map(row_to_ticket)
        .transpose()
    }

    async fn tickets_for_order(&self, order_id: OrderId) -> Result<Vec<Ticket>> {
        let rows = sqlx::query(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE order_id = $1 \
             ORDER BY issued_at ASC, ticket_number ASC"
        ))
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_ticket).collect()
    }

    async fn check_in_ticket(
        &self,
        ticket_id: TicketId,
        code_revision: u32,
        at: DateTime<Utc>,
    ) -> Result<Option<Ticket>> {
        let row = sqlx::query(&format!(
            "UPDATE tickets SET status = 'USED', checked_in_at = $3 \
             WHERE id = $1 AND status = 'ACTIVE' AND checked_in_at IS NULL \
               AND code_revision = $2 \
             RETURNING {TICKET_COLUMNS}"
        ))
        .bind(ticket_id.as_uuid())
        .bind(i64::from(code_revision))
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row_to_ticket(row).map(Some),
            None => match self.get_ticket(ticket_id).await? {
                Some(_) => Ok(None),
                None => Err(StoreError::not_found("ticket", ticket_id)),
            },
        }
    }

    async fn create_transfer(&self, transfer: TicketTransfer) -> Result<TicketTransfer> {
        let row = sqlx::query(&format!(
            "INSERT INTO ticket_transfers ({TRANSFER_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {TRANSFER_COLUMNS}"
        ))
        .bind(transfer.id.as_uuid())
        .bind(transfer.ticket_id.as_uuid())
        .bind(transfer.sender_id.as_uuid())
        .bind(&transfer.recipient_email)
        .bind(transfer.status.as_str())
        .bind(transfer.expires_at)
        .bind(transfer.created_at)
        .bind(transfer.closed_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if let Some(constraint) = unique_violation(&e) {
                if constraint == "unique_pending_transfer_per_ticket" {
                    return StoreError::TransferAlreadyPending {
                        ticket_id: transfer.ticket_id,
                    };
                }
                return StoreError::Duplicate {
                    entity: "ticket transfer",
                    key: transfer.id.to_string(),
                };
            }
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_foreign_key_violation()
            {
                return StoreError::not_found("ticket", transfer.ticket_id);
            }
            StoreError::Database(e)
        })?;

        row_to_transfer(row)
    }

    async fn get_transfer(&self, transfer_id: TransferId) -> Result<Option<TicketTransfer>> {
        sqlx::query(&format!(
            "SELECT {TRANSFER_COLUMNS} FROM ticket_transfers WHERE id = $1"
        ))
        .bind(transfer_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .map(row_to_transfer)
        .transpose()
    }

    async fn pending_transfer_for_ticket(&self, ticket_id: TicketId) -> Result<Option<TicketTransfer>> {
        sqlx::query(&format!(
            "SELECT {TRANSFER_COLUMNS} FROM ticket_transfers \
             WHERE ticket_id = $1 AND status = 'PENDING'"
        ))
        .bind(ticket_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .map(row_to_transfer)
        .transpose()
    }

    async fn accept_transfer(
        &self,
        transfer_id: TransferId,
        ticket: Ticket,
        previous_revision: u32,
        at: DateTime<Utc>,
    ) -> Result<TicketTransfer> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "UPDATE ticket_transfers SET status = 'ACCEPTED', closed_at = $2 \
             WHERE id = $1 AND status = 'PENDING' AND expires_at > $2 \
             RETURNING {TRANSFER_COLUMNS}"
        ))
        .bind(transfer_id.as_uuid())
        .bind(at)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM ticket_transfers WHERE id = $1)")
                    .bind(transfer_id.as_uuid())
                    .fetch_one(&mut *tx)
                    .await?;
            return Err(if exists {
                StoreError::conflict("ticket transfer", transfer_id)
            } else {
                StoreError::not_found("ticket transfer", transfer_id)
            });
        };
        let transfer = row_to_transfer(row)?;

        let reassigned = sqlx::query(
            r#"
            UPDATE tickets
            SET holder_id = $2, attendee_name = $3, attendee_email = $4, code = $5,
                code_revision = $6
            WHERE id = $1 AND status = 'ACTIVE' AND code_revision = $7
            "#,
        )
        .bind(ticket.id.as_uuid())
        .bind(ticket.holder_id.as_uuid())
        .bind(&ticket.attendee_name)
        .bind(&ticket.attendee_email)
        .bind(&ticket.code)
        .bind(i64::from(ticket.code_revision))
        .bind(i64::from(previous_revision))
        .execute(&mut *tx)
        .await?;

        if reassigned.rows_affected() == 0 {
            return Err(StoreError::conflict("ticket", ticket.id));
        }

        tx.commit().await?;
        Ok(transfer)
    }

    async fn close_transfer(
        &self,
        transfer_id: TransferId,
        status: TransferStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<TicketTransfer>> {
        let row = sqlx::query(&format!(
            "UPDATE ticket_transfers SET status = $2, closed_at = $3 \
             WHERE id = $1 AND status = 'PENDING' \
             RETURNING {TRANSFER_COLUMNS}"
        ))
        .bind(transfer_id.as_uuid())
        .bind(status.as_str())
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row_to_transfer(row).map(Some),
            None => match self.get_transfer(transfer_id).await? {
                Some(_) => Ok(None),
                None => Err(StoreError::not_found("ticket transfer", transfer_id)),
            },
        }
    }

    async fn expire_transfers(&self, now: DateTime<Utc>) -> Result<Vec<TicketTransfer>> {
        let rows = sqlx::query(&format!(
            "UPDATE ticket_transfers SET status = 'EXPIRED', closed_at = $1 \
             WHERE status = 'PENDING' AND expires_at <= $1 \
             RETURNING {TRANSFER_COLUMNS}"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_transfer).collect()
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
