//! Postgres-backed store. Check-then-commit sequences run inside a single
//! transaction with the affected product rows locked, which closes the
//! overbooking races between concurrent requests.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use diesel::dsl::sum;
use diesel::prelude::*;
use diesel_async::{pooled_connection::bb8::Pool, AsyncConnection, AsyncPgConnection, RunQueryDsl};
use shared::{
    Availability, DateWindow, EventRecord, Order, OrderItem, OrderStatus, OutboxEvent, Payment,
    Product,
};
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::*;
use crate::schema::*;
use crate::store::{
    BookingRequest, CapacityGuard, ConfirmOutcome, ItemDetail, MarketplaceStore, OrderDetail,
};

pub type DbPool = Pool<AsyncPgConnection>;

pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

async fn overlapping_booked(
    conn: &mut AsyncPgConnection,
    product_id: Uuid,
    window: &DateWindow,
) -> Result<i64, ApiError> {
    let total = availability::table
        .filter(availability::product_id.eq(product_id))
        .filter(availability::start_date.le(window.end))
        .filter(availability::end_date.ge(window.start))
        .select(sum(availability::quantity))
        .first::<Option<i64>>(conn)
        .await?;
    Ok(total.unwrap_or(0))
}

async fn food_day_total(
    conn: &mut AsyncPgConnection,
    product_id: Uuid,
    day: NaiveDate,
) -> Result<i64, ApiError> {
    let total = order_items::table
        .filter(order_items::product_id.eq(product_id))
        .filter(order_items::delivery_date.eq(day))
        .select(sum(order_items::quantity))
        .first::<Option<i64>>(conn)
        .await?;
    Ok(total.unwrap_or(0))
}

async fn load_detail(
    conn: &mut AsyncPgConnection,
    order_row: OrderRow,
) -> Result<OrderDetail, ApiError> {
    let event_row = events::table
        .find(order_row.event_id)
        .first::<EventRow>(conn)
        .await?;

    let item_rows = order_items::table
        .inner_join(products::table)
        .filter(order_items::order_id.eq(order_row.id))
        .load::<(OrderItemRow, ProductRow)>(conn)
        .await?;

    let payment_row = payments::table
        .filter(payments::order_id.eq(order_row.id))
        .first::<PaymentRow>(conn)
        .await
        .optional()?;

    let mut items = Vec::with_capacity(item_rows.len());
    for (item, product) in item_rows {
        items.push(ItemDetail { item: item.into(), product: product.try_into()? });
    }

    Ok(OrderDetail {
        order: order_row.try_into()?,
        items,
        event: event_row.into(),
        payment: payment_row.map(Payment::try_from).transpose()?,
    })
}

#[async_trait]
impl MarketplaceStore for PgStore {
    async fn event(&self, id: Uuid) -> Result<Option<EventRecord>, ApiError> {
        let mut conn = self.pool.get().await?;
        let row = events::table.find(id).first::<EventRow>(&mut conn).await.optional()?;
        Ok(row.map(Into::into))
    }

    async fn product(&self, id: Uuid) -> Result<Option<Product>, ApiError> {
        let mut conn = self.pool.get().await?;
        let row = products::table.find(id).first::<ProductRow>(&mut conn).await.optional()?;
        row.map(Product::try_from).transpose()
    }

    async fn user_email(&self, id: Uuid) -> Result<Option<String>, ApiError> {
        let mut conn = self.pool.get().await?;
        let email = users::table
            .find(id)
            .select(users::email)
            .first::<String>(&mut conn)
            .await
            .optional()?;
        Ok(email)
    }

    async fn booked_quantity(&self, product_id: Uuid, window: DateWindow) -> Result<i64, ApiError> {
        let mut conn = self.pool.get().await?;
        overlapping_booked(&mut conn, product_id, &window).await
    }

    async fn food_quantity_on_day(&self, product_id: Uuid, day: NaiveDate) -> Result<i64, ApiError> {
        let mut conn = self.pool.get().await?;
        food_day_total(&mut conn, product_id, day).await
    }

    async fn availability_for_product(&self, product_id: Uuid) -> Result<Vec<Availability>, ApiError> {
        let mut conn = self.pool.get().await?;
        let rows = availability::table
            .filter(availability::product_id.eq(product_id))
            .load::<AvailabilityRow>(&mut conn)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn insert_order(
        &self,
        order: Order,
        items: Vec<OrderItem>,
        guards: Vec<CapacityGuard>,
    ) -> Result<(), ApiError> {
        let mut conn = self.pool.get().await?;

        conn.transaction::<_, ApiError, _>(|conn| {
            Box::pin(async move {
                // Lock the guarded product rows first so concurrent food
                // orders for the same product serialize on the capacity check.
                for guard in &guards {
                    products::table
                        .find(guard.product_id)
                        .for_update()
                        .first::<ProductRow>(conn)
                        .await?;
                }

                diesel::insert_into(orders::table)
                    .values(OrderRow::from(order))
                    .execute(conn)
                    .await?;

                let item_rows: Vec<OrderItemRow> = items.into_iter().map(Into::into).collect();
                diesel::insert_into(order_items::table)
                    .values(&item_rows)
                    .execute(conn)
                    .await?;

                // Re-check with the new rows counted; a violation rolls the
                // whole order back.
                for guard in &guards {
                    let total = food_day_total(conn, guard.product_id, guard.day).await?;
                    if total > i64::from(guard.daily_capacity) {
                        return Err(ApiError::BadRequest(format!(
                            "{} exceeds daily capacity of {} on {}",
                            guard.product_name, guard.daily_capacity, guard.day
                        )));
                    }
                }

                Ok(())
            })
        })
        .await
    }

    async fn order(&self, id: Uuid) -> Result<Option<Order>, ApiError> {
        let mut conn = self.pool.get().await?;
        let row = orders::table.find(id).first::<OrderRow>(&mut conn).await.optional()?;
        row.map(Order::try_from).transpose()
    }

    async fn order_detail(&self, id: Uuid) -> Result<Option<OrderDetail>, ApiError> {
        let mut conn = self.pool.get().await?;
        let row = orders::table.find(id).first::<OrderRow>(&mut conn).await.optional()?;
        match row {
            Some(row) => Ok(Some(load_detail(&mut conn, row).await?)),
            None => Ok(None),
        }
    }

    async fn orders_for_user(&self, user_id: Uuid) -> Result<Vec<OrderDetail>, ApiError> {
        let mut conn = self.pool.get().await?;
        let rows = orders::table
            .filter(orders::user_id.eq(user_id))
            .order(orders::created_at.desc())
            .load::<OrderRow>(&mut conn)
            .await?;
        let mut details = Vec::with_capacity(rows.len());
        for row in rows {
            details.push(load_detail(&mut conn, row).await?);
        }
        Ok(details)
    }

    async fn orders_for_vendor(&self, vendor_id: Uuid) -> Result<Vec<OrderDetail>, ApiError> {
        let mut conn = self.pool.get().await?;
        let order_ids = order_items::table
            .inner_join(products::table)
            .filter(products::vendor_id.eq(vendor_id))
            .select(order_items::order_id)
            .distinct()
            .load::<Uuid>(&mut conn)
            .await?;
        let rows = orders::table
            .filter(orders::id.eq_any(order_ids))
            .order(orders::created_at.desc())
            .load::<OrderRow>(&mut conn)
            .await?;
        let mut details = Vec::with_capacity(rows.len());
        for row in rows {
            details.push(load_detail(&mut conn, row).await?);
        }
        Ok(details)
    }

    async fn set_order_status(
        &self,
        id: Uuid,
        status: OrderStatus,
        event: Option<OutboxEvent>,
    ) -> Result<Order, ApiError> {
        let mut conn = self.pool.get().await?;
        conn.transaction::<_, ApiError, _>(|conn| {
            Box::pin(async move {
                let row = diesel::update(orders::table.find(id))
                    .set(orders::status.eq(status.as_str()))
                    .get_result::<OrderRow>(conn)
                    .await
                    .optional()?
                    .ok_or_else(|| ApiError::NotFound("Order not found".to_string()))?;

                if let Some(event) = event {
                    diesel::insert_into(outbox_events::table)
                        .values(OutboxEventRow::from(event))
                        .execute(conn)
                        .await?;
                }

                row.try_into()
            })
        })
        .await
    }

    async fn payment(&self, order_id: Uuid) -> Result<Option<Payment>, ApiError> {
        let mut conn = self.pool.get().await?;
        let row = payments::table
            .filter(payments::order_id.eq(order_id))
            .first::<PaymentRow>(&mut conn)
            .await
            .optional()?;
        row.map(Payment::try_from).transpose()
    }

    async fn upsert_payment(&self, order_id: Uuid, provider: &str) -> Result<Payment, ApiError> {
        let mut conn = self.pool.get().await?;
        let row = PaymentRow {
            id: Uuid::new_v4(),
            order_id,
            provider: provider.to_string(),
            status: "INITIATED".to_string(),
            reference: None,
            created_at: Utc::now(),
        };
        let saved = diesel::insert_into(payments::table)
            .values(&row)
            .on_conflict(payments::order_id)
            .do_update()
            .set((
                payments::provider.eq(provider),
                payments::status.eq("INITIATED"),
            ))
            .get_result::<PaymentRow>(&mut conn)
            .await?;
        saved.try_into()
    }

    async fn set_payment_failed(
        &self,
        order_id: Uuid,
        reference: Option<&str>,
        event: OutboxEvent,
    ) -> Result<Payment, ApiError> {
        let mut conn = self.pool.get().await?;
        let reference = reference.map(str::to_string);
        conn.transaction::<_, ApiError, _>(|conn| {
            Box::pin(async move {
                let row = diesel::update(payments::table.filter(payments::order_id.eq(order_id)))
                    .set((
                        payments::status.eq("FAILED"),
                        payments::reference.eq(reference),
                    ))
                    .get_result::<PaymentRow>(conn)
                    .await
                    .optional()?
                    .ok_or_else(|| ApiError::NotFound("Payment not found".to_string()))?;

                diesel::insert_into(outbox_events::table)
                    .values(OutboxEventRow::from(event))
                    .execute(conn)
                    .await?;

                row.try_into()
            })
        })
        .await
    }

    async fn confirm_paid(
        &self,
        order_id: Uuid,
        reference: &str,
        bookings: Vec<BookingRequest>,
        event: OutboxEvent,
    ) -> Result<ConfirmOutcome, ApiError> {
        let mut conn = self.pool.get().await?;
        let reference = reference.to_string();

        conn.transaction::<_, ApiError, _>(|conn| {
            Box::pin(async move {
                let order_row = orders::table
                    .find(order_id)
                    .for_update()
                    .first::<OrderRow>(conn)
                    .await
                    .optional()?
                    .ok_or_else(|| ApiError::NotFound("Order not found".to_string()))?;
                let current: OrderStatus = order_row.status.parse()?;

                // Duplicate webhook/verify deliveries land here; return the
                // order untouched instead of committing availability twice.
                if current == OrderStatus::Paid {
                    return Ok(ConfirmOutcome::AlreadyPaid(order_row.try_into()?));
                }
                if current != OrderStatus::Pending {
                    return Err(ApiError::BadRequest(format!(
                        "cannot transition from {current} to PAID"
                    )));
                }

                payments::table
                    .filter(payments::order_id.eq(order_id))
                    .for_update()
                    .first::<PaymentRow>(conn)
                    .await
                    .optional()?
                    .ok_or_else(|| ApiError::NotFound("Payment not found".to_string()))?;

                for booking in &bookings {
                    products::table
                        .find(booking.product_id)
                        .for_update()
                        .first::<ProductRow>(conn)
                        .await?;
                    let booked = overlapping_booked(conn, booking.product_id, &booking.window).await?;
                    if booked + i64::from(booking.quantity) > i64::from(booking.total_quantity) {
                        return Err(ApiError::BadRequest(format!(
                            "{} not available for the requested dates",
                            booking.product_name
                        )));
                    }
                    diesel::insert_into(availability::table)
                        .values(AvailabilityRow {
                            id: Uuid::new_v4(),
                            product_id: booking.product_id,
                            start_date: booking.window.start,
                            end_date: booking.window.end,
                            quantity: booking.quantity,
                        })
                        .execute(conn)
                        .await?;
                }

                diesel::update(payments::table.filter(payments::order_id.eq(order_id)))
                    .set((
                        payments::status.eq("SUCCESS"),
                        payments::reference.eq(Some(reference)),
                    ))
                    .execute(conn)
                    .await?;

                let updated = diesel::update(orders::table.find(order_id))
                    .set(orders::status.eq("PAID"))
                    .get_result::<OrderRow>(conn)
                    .await?;

                diesel::insert_into(outbox_events::table)
                    .values(OutboxEventRow::from(event))
                    .execute(conn)
                    .await?;

                Ok(ConfirmOutcome::Confirmed(updated.try_into()?))
            })
        })
        .await
    }

    async fn due_completion_candidates(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, ApiError> {
        let mut conn = self.pool.get().await?;
        let ids = orders::table
            .inner_join(events::table)
            .filter(orders::status.eq("IN_PROGRESS"))
            .filter(events::event_date.le(now))
            .select(orders::id)
            .load::<Uuid>(&mut conn)
            .await?;
        Ok(ids)
    }

    async fn complete_if_in_progress(
        &self,
        order_id: Uuid,
        event: OutboxEvent,
    ) -> Result<bool, ApiError> {
        let mut conn = self.pool.get().await?;
        conn.transaction::<_, ApiError, _>(|conn| {
            Box::pin(async move {
                let updated = diesel::update(
                    orders::table
                        .find(order_id)
                        .filter(orders::status.eq("IN_PROGRESS")),
                )
                .set(orders::status.eq("COMPLETED"))
                .execute(conn)
                .await?;

                if updated == 0 {
                    return Ok(false);
                }

                diesel::insert_into(outbox_events::table)
                    .values(OutboxEventRow::from(event))
                    .execute(conn)
                    .await?;

                Ok(true)
            })
        })
        .await
    }

    async fn unprocessed_events(&self, limit: i64) -> Result<Vec<OutboxEvent>, ApiError> {
        let mut conn = self.pool.get().await?;
        let rows = outbox_events::table
            .filter(outbox_events::processed.eq(false))
            .order(outbox_events::created_at.asc())
            .limit(limit)
            .load::<OutboxEventRow>(&mut conn)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn mark_event_processed(&self, id: Uuid) -> Result<(), ApiError> {
        let mut conn = self.pool.get().await?;
        diesel::update(outbox_events::table.find(id))
            .set(outbox_events::processed.eq(true))
            .execute(&mut conn)
            .await?;
        Ok(())
    }
}
