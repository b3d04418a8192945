//! Storage access behind an injected trait so the service logic can run
//! against Postgres in production and an in-memory store in tests.

pub mod memory;
pub mod pg;

pub use memory::MemoryStore;
pub use pg::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use shared::{
    Availability, DateWindow, EventRecord, Order, OrderItem, OrderStatus, OutboxEvent, Payment,
    Product,
};
use uuid::Uuid;

use crate::error::ApiError;

/// Order hydrated with its items, products, event and payment.
#[derive(Debug, Clone, Serialize)]
pub struct OrderDetail {
    pub order: Order,
    pub items: Vec<ItemDetail>,
    pub event: EventRecord,
    pub payment: Option<Payment>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemDetail {
    pub item: OrderItem,
    pub product: Product,
}

impl OrderDetail {
    pub fn vendor_ids(&self) -> Vec<Uuid> {
        self.items.iter().map(|i| i.product.vendor_id).collect()
    }
}

/// Daily-capacity guard re-evaluated inside the order-creation transaction,
/// after the new items are inserted. A violation rolls the whole order back.
#[derive(Debug, Clone)]
pub struct CapacityGuard {
    pub product_id: Uuid,
    pub product_name: String,
    pub day: NaiveDate,
    pub daily_capacity: i32,
}

/// One availability commit requested by the payment reconciler. `total_quantity`
/// is the product's stock ceiling the locked re-check compares against.
#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub product_id: Uuid,
    pub product_name: String,
    pub window: DateWindow,
    pub quantity: i32,
    pub total_quantity: i32,
}

#[derive(Debug, Clone)]
pub enum ConfirmOutcome {
    /// The order was already PAID; nothing was written.
    AlreadyPaid(Order),
    Confirmed(Order),
}

impl ConfirmOutcome {
    pub fn order(&self) -> &Order {
        match self {
            ConfirmOutcome::AlreadyPaid(order) | ConfirmOutcome::Confirmed(order) => order,
        }
    }
}

#[async_trait]
pub trait MarketplaceStore: Send + Sync {
    async fn event(&self, id: Uuid) -> Result<Option<EventRecord>, ApiError>;
    async fn product(&self, id: Uuid) -> Result<Option<Product>, ApiError>;
    async fn user_email(&self, id: Uuid) -> Result<Option<String>, ApiError>;

    /// Sum of committed availability quantities overlapping `window`.
    async fn booked_quantity(&self, product_id: Uuid, window: DateWindow) -> Result<i64, ApiError>;

    /// Sum of order-item quantities for a food product on an exact delivery
    /// day, across all orders regardless of status.
    async fn food_quantity_on_day(&self, product_id: Uuid, day: NaiveDate) -> Result<i64, ApiError>;

    async fn availability_for_product(&self, product_id: Uuid) -> Result<Vec<Availability>, ApiError>;

    /// Atomically persist an order with its items. Capacity guards are
    /// re-checked with product rows locked; any violation aborts the insert.
    async fn insert_order(
        &self,
        order: Order,
        items: Vec<OrderItem>,
        guards: Vec<CapacityGuard>,
    ) -> Result<(), ApiError>;

    async fn order(&self, id: Uuid) -> Result<Option<Order>, ApiError>;
    async fn order_detail(&self, id: Uuid) -> Result<Option<OrderDetail>, ApiError>;
    async fn orders_for_user(&self, user_id: Uuid) -> Result<Vec<OrderDetail>, ApiError>;
    async fn orders_for_vendor(&self, vendor_id: Uuid) -> Result<Vec<OrderDetail>, ApiError>;

    async fn set_order_status(
        &self,
        id: Uuid,
        status: OrderStatus,
        event: Option<OutboxEvent>,
    ) -> Result<Order, ApiError>;

    async fn payment(&self, order_id: Uuid) -> Result<Option<Payment>, ApiError>;

    /// Create the payment record for an order, or reset an existing one back
    /// to INITIATED for a retry.
    async fn upsert_payment(&self, order_id: Uuid, provider: &str) -> Result<Payment, ApiError>;

    async fn set_payment_failed(
        &self,
        order_id: Uuid,
        reference: Option<&str>,
        event: OutboxEvent,
    ) -> Result<Payment, ApiError>;

    /// The reconciliation commit: in one transaction mark the payment SUCCESS,
    /// promote the order to PAID, write the requested availability rows (after
    /// a locked capacity re-check) and enqueue the outbox event. Safe to call
    /// repeatedly; an order already PAID short-circuits without writes.
    async fn confirm_paid(
        &self,
        order_id: Uuid,
        reference: &str,
        bookings: Vec<BookingRequest>,
        event: OutboxEvent,
    ) -> Result<ConfirmOutcome, ApiError>;

    /// IN_PROGRESS orders whose event date has passed.
    async fn due_completion_candidates(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, ApiError>;

    /// Compare-and-set promotion to COMPLETED. Returns false if the order is
    /// no longer IN_PROGRESS, so overlapping sweeps complete it at most once.
    async fn complete_if_in_progress(
        &self,
        order_id: Uuid,
        event: OutboxEvent,
    ) -> Result<bool, ApiError>;

    async fn unprocessed_events(&self, limit: i64) -> Result<Vec<OutboxEvent>, ApiError>;
    async fn mark_event_processed(&self, id: Uuid) -> Result<(), ApiError>;
}
