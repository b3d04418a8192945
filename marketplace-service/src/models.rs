use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use shared::{
    Availability, EventRecord, Order, OrderItem, OutboxEvent, Payment, Product,
};
use uuid::Uuid;

use crate::error::ApiError;

#[derive(Debug, Clone, Queryable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::events)]
pub struct EventRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub event_date: DateTime<Utc>,
    pub location: String,
}

impl From<EventRow> for EventRecord {
    fn from(row: EventRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            event_date: row.event_date,
            location: row.location,
        }
    }
}

#[derive(Debug, Clone, Queryable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::products)]
pub struct ProductRow {
    pub id: Uuid,
    pub vendor_id: Uuid,
    pub name: String,
    pub product_type: String,
    pub price: BigDecimal,
    pub quantity: Option<i32>,
    pub daily_capacity: Option<i32>,
}

impl TryFrom<ProductRow> for Product {
    type Error = ApiError;

    fn try_from(row: ProductRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            vendor_id: row.vendor_id,
            name: row.name,
            product_type: row.product_type.parse()?,
            price: row.price,
            quantity: row.quantity,
            daily_capacity: row.daily_capacity,
        })
    }
}

#[derive(Debug, Clone, Queryable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::orders)]
pub struct OrderRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub event_id: Uuid,
    pub total_amount: BigDecimal,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = ApiError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            event_id: row.event_id,
            total_amount: row.total_amount,
            status: row.status.parse()?,
            created_at: row.created_at,
        })
    }
}

impl From<Order> for OrderRow {
    fn from(order: Order) -> Self {
        Self {
            id: order.id,
            user_id: order.user_id,
            event_id: order.event_id,
            total_amount: order.total_amount,
            status: order.status.as_str().to_string(),
            created_at: order.created_at,
        }
    }
}

#[derive(Debug, Clone, Queryable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::order_items)]
pub struct OrderItemRow {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub price: BigDecimal,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub delivery_date: Option<NaiveDate>,
}

impl From<OrderItemRow> for OrderItem {
    fn from(row: OrderItemRow) -> Self {
        Self {
            id: row.id,
            order_id: row.order_id,
            product_id: row.product_id,
            quantity: row.quantity,
            price: row.price,
            start_date: row.start_date,
            end_date: row.end_date,
            delivery_date: row.delivery_date,
        }
    }
}

impl From<OrderItem> for OrderItemRow {
    fn from(item: OrderItem) -> Self {
        Self {
            id: item.id,
            order_id: item.order_id,
            product_id: item.product_id,
            quantity: item.quantity,
            price: item.price,
            start_date: item.start_date,
            end_date: item.end_date,
            delivery_date: item.delivery_date,
        }
    }
}

#[derive(Debug, Clone, Queryable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::payments)]
pub struct PaymentRow {
    pub id: Uuid,
    pub order_id: Uuid,
    pub provider: String,
    pub status: String,
    pub reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = ApiError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            order_id: row.order_id,
            provider: row.provider,
            status: row.status.parse()?,
            reference: row.reference,
            created_at: row.created_at,
        })
    }
}

impl From<Payment> for PaymentRow {
    fn from(payment: Payment) -> Self {
        Self {
            id: payment.id,
            order_id: payment.order_id,
            provider: payment.provider,
            status: payment.status.as_str().to_string(),
            reference: payment.reference,
            created_at: payment.created_at,
        }
    }
}

#[derive(Debug, Clone, Queryable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::availability)]
pub struct AvailabilityRow {
    pub id: Uuid,
    pub product_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub quantity: i32,
}

impl From<AvailabilityRow> for Availability {
    fn from(row: AvailabilityRow) -> Self {
        Self {
            id: row.id,
            product_id: row.product_id,
            start_date: row.start_date,
            end_date: row.end_date,
            quantity: row.quantity,
        }
    }
}

impl From<Availability> for AvailabilityRow {
    fn from(a: Availability) -> Self {
        Self {
            id: a.id,
            product_id: a.product_id,
            start_date: a.start_date,
            end_date: a.end_date,
            quantity: a.quantity,
        }
    }
}

#[derive(Debug, Clone, Queryable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::outbox_events)]
pub struct OutboxEventRow {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

impl From<OutboxEventRow> for OutboxEvent {
    fn from(row: OutboxEventRow) -> Self {
        Self {
            id: row.id,
            aggregate_id: row.aggregate_id,
            event_type: row.event_type,
            event_data: row.event_data,
            processed: row.processed,
            created_at: row.created_at,
        }
    }
}

impl From<OutboxEvent> for OutboxEventRow {
    fn from(event: OutboxEvent) -> Self {
        Self {
            id: event.id,
            aggregate_id: event.aggregate_id,
            event_type: event.event_type,
            event_data: event.event_data,
            processed: event.processed,
            created_at: event.created_at,
        }
    }
}
