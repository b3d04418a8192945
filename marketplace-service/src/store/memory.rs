//! In-memory store used by the test suites. A single mutex makes every
//! operation atomic, which is the same isolation the Postgres store gets from
//! its row locks and transactions.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use shared::{
    Availability, DateWindow, EventRecord, Order, OrderItem, OrderStatus, OutboxEvent, Payment,
    PaymentStatus, Product,
};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::ApiError;
use crate::store::{
    BookingRequest, CapacityGuard, ConfirmOutcome, ItemDetail, MarketplaceStore, OrderDetail,
};

#[derive(Debug, Default)]
struct State {
    users: HashMap<Uuid, String>,
    events: HashMap<Uuid, EventRecord>,
    products: HashMap<Uuid, Product>,
    orders: HashMap<Uuid, Order>,
    items: Vec<OrderItem>,
    payments: HashMap<Uuid, Payment>,
    availability: Vec<Availability>,
    outbox: Vec<OutboxEvent>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_user(&self, id: Uuid, email: &str) {
        self.state.lock().await.users.insert(id, email.to_string());
    }

    pub async fn add_event(&self, event: EventRecord) {
        self.state.lock().await.events.insert(event.id, event);
    }

    pub async fn add_product(&self, product: Product) {
        self.state.lock().await.products.insert(product.id, product);
    }

    pub async fn add_availability(&self, availability: Availability) {
        self.state.lock().await.availability.push(availability);
    }
}

impl State {
    fn booked(&self, product_id: Uuid, window: &DateWindow) -> i64 {
        self.availability
            .iter()
            .filter(|a| a.product_id == product_id && a.window().overlaps(window))
            .map(|a| i64::from(a.quantity))
            .sum()
    }

    fn food_on_day(&self, product_id: Uuid, day: NaiveDate) -> i64 {
        self.items
            .iter()
            .filter(|i| i.product_id == product_id && i.delivery_date == Some(day))
            .map(|i| i64::from(i.quantity))
            .sum()
    }

    fn detail(&self, order: &Order) -> Result<OrderDetail, ApiError> {
        let event = self
            .events
            .get(&order.event_id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound("Event not found".to_string()))?;
        let mut items = Vec::new();
        for item in self.items.iter().filter(|i| i.order_id == order.id) {
            let product = self
                .products
                .get(&item.product_id)
                .cloned()
                .ok_or_else(|| ApiError::NotFound(format!("Product {} not found", item.product_id)))?;
            items.push(ItemDetail { item: item.clone(), product });
        }
        Ok(OrderDetail {
            order: order.clone(),
            items,
            event,
            payment: self.payments.get(&order.id).cloned(),
        })
    }

    fn details_sorted(&self, mut orders: Vec<Order>) -> Result<Vec<OrderDetail>, ApiError> {
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        orders.iter().map(|o| self.detail(o)).collect()
    }
}

#[async_trait]
impl MarketplaceStore for MemoryStore {
    async fn event(&self, id: Uuid) -> Result<Option<EventRecord>, ApiError> {
        Ok(self.state.lock().await.events.get(&id).cloned())
    }

    async fn product(&self, id: Uuid) -> Result<Option<Product>, ApiError> {
        Ok(self.state.lock().await.products.get(&id).cloned())
    }

    async fn user_email(&self, id: Uuid) -> Result<Option<String>, ApiError> {
        Ok(self.state.lock().await.users.get(&id).cloned())
    }

    async fn booked_quantity(&self, product_id: Uuid, window: DateWindow) -> Result<i64, ApiError> {
        Ok(self.state.lock().await.booked(product_id, &window))
    }

    async fn food_quantity_on_day(&self, product_id: Uuid, day: NaiveDate) -> Result<i64, ApiError> {
        Ok(self.state.lock().await.food_on_day(product_id, day))
    }

    async fn availability_for_product(&self, product_id: Uuid) -> Result<Vec<Availability>, ApiError> {
        Ok(self
            .state
            .lock()
            .await
            .availability
            .iter()
            .filter(|a| a.product_id == product_id)
            .cloned()
            .collect())
    }

    async fn insert_order(
        &self,
        order: Order,
        items: Vec<OrderItem>,
        guards: Vec<CapacityGuard>,
    ) -> Result<(), ApiError> {
        let mut state = self.state.lock().await;

        // Tentatively count the new items, then verify every guard before
        // making the write visible.
        for guard in &guards {
            let existing = state.food_on_day(guard.product_id, guard.day);
            let added: i64 = items
                .iter()
                .filter(|i| i.product_id == guard.product_id && i.delivery_date == Some(guard.day))
                .map(|i| i64::from(i.quantity))
                .sum();
            if existing + added > i64::from(guard.daily_capacity) {
                return Err(ApiError::BadRequest(format!(
                    "{} exceeds daily capacity of {} on {}",
                    guard.product_name, guard.daily_capacity, guard.day
                )));
            }
        }

        state.orders.insert(order.id, order);
        state.items.extend(items);
        Ok(())
    }

    async fn order(&self, id: Uuid) -> Result<Option<Order>, ApiError> {
        Ok(self.state.lock().await.orders.get(&id).cloned())
    }

    async fn order_detail(&self, id: Uuid) -> Result<Option<OrderDetail>, ApiError> {
        let state = self.state.lock().await;
        match state.orders.get(&id) {
            Some(order) => Ok(Some(state.detail(order)?)),
            None => Ok(None),
        }
    }

    async fn orders_for_user(&self, user_id: Uuid) -> Result<Vec<OrderDetail>, ApiError> {
        let state = self.state.lock().await;
        let orders = state.orders.values().filter(|o| o.user_id == user_id).cloned().collect();
        state.details_sorted(orders)
    }

    async fn orders_for_vendor(&self, vendor_id: Uuid) -> Result<Vec<OrderDetail>, ApiError> {
        let state = self.state.lock().await;
        let orders = state
            .orders
            .values()
            .filter(|o| {
                state.items.iter().any(|i| {
                    i.order_id == o.id
                        && state
                            .products
                            .get(&i.product_id)
                            .is_some_and(|p| p.vendor_id == vendor_id)
                })
            })
            .cloned()
            .collect();
        state.details_sorted(orders)
    }

    async fn set_order_status(
        &self,
        id: Uuid,
        status: OrderStatus,
        event: Option<OutboxEvent>,
    ) -> Result<Order, ApiError> {
        let mut state = self.state.lock().await;
        let order = state
            .orders
            .get_mut(&id)
            .ok_or_else(|| ApiError::NotFound("Order not found".to_string()))?;
        order.status = status;
        let order = order.clone();
        if let Some(event) = event {
            state.outbox.push(event);
        }
        Ok(order)
    }

    async fn payment(&self, order_id: Uuid) -> Result<Option<Payment>, ApiError> {
        Ok(self.state.lock().await.payments.get(&order_id).cloned())
    }

    async fn upsert_payment(&self, order_id: Uuid, provider: &str) -> Result<Payment, ApiError> {
        let mut state = self.state.lock().await;
        let payment = state
            .payments
            .entry(order_id)
            .and_modify(|p| {
                p.provider = provider.to_string();
                p.status = PaymentStatus::Initiated;
            })
            .or_insert_with(|| Payment {
                id: Uuid::new_v4(),
                order_id,
                provider: provider.to_string(),
                status: PaymentStatus::Initiated,
                reference: None,
                created_at: Utc::now(),
            });
        Ok(payment.clone())
    }

    async fn set_payment_failed(
        &self,
        order_id: Uuid,
        reference: Option<&str>,
        event: OutboxEvent,
    ) -> Result<Payment, ApiError> {
        let mut state = self.state.lock().await;
        let payment = state
            .payments
            .get_mut(&order_id)
            .ok_or_else(|| ApiError::NotFound("Payment not found".to_string()))?;
        payment.status = PaymentStatus::Failed;
        payment.reference = reference.map(str::to_string);
        let payment = payment.clone();
        state.outbox.push(event);
        Ok(payment)
    }

    async fn confirm_paid(
        &self,
        order_id: Uuid,
        reference: &str,
        bookings: Vec<BookingRequest>,
        event: OutboxEvent,
    ) -> Result<ConfirmOutcome, ApiError> {
        let mut state = self.state.lock().await;

        let current = state
            .orders
            .get(&order_id)
            .ok_or_else(|| ApiError::NotFound("Order not found".to_string()))?
            .clone();
        if current.status == OrderStatus::Paid {
            return Ok(ConfirmOutcome::AlreadyPaid(current));
        }
        if current.status != OrderStatus::Pending {
            return Err(ApiError::BadRequest(format!(
                "cannot transition from {} to PAID",
                current.status
            )));
        }
        if !state.payments.contains_key(&order_id) {
            return Err(ApiError::NotFound("Payment not found".to_string()));
        }

        for booking in &bookings {
            let booked = state.booked(booking.product_id, &booking.window);
            if booked + i64::from(booking.quantity) > i64::from(booking.total_quantity) {
                return Err(ApiError::BadRequest(format!(
                    "{} not available for the requested dates",
                    booking.product_name
                )));
            }
        }

        for booking in bookings {
            state.availability.push(Availability {
                id: Uuid::new_v4(),
                product_id: booking.product_id,
                start_date: booking.window.start,
                end_date: booking.window.end,
                quantity: booking.quantity,
            });
        }

        if let Some(payment) = state.payments.get_mut(&order_id) {
            payment.status = PaymentStatus::Success;
            payment.reference = Some(reference.to_string());
        }
        let order = state.orders.get_mut(&order_id).ok_or_else(|| {
            ApiError::NotFound("Order not found".to_string())
        })?;
        order.status = OrderStatus::Paid;
        let order = order.clone();
        state.outbox.push(event);

        Ok(ConfirmOutcome::Confirmed(order))
    }

    async fn due_completion_candidates(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, ApiError> {
        let state = self.state.lock().await;
        Ok(state
            .orders
            .values()
            .filter(|o| {
                o.status == OrderStatus::InProgress
                    && state
                        .events
                        .get(&o.event_id)
                        .is_some_and(|e| e.event_date <= now)
            })
            .map(|o| o.id)
            .collect())
    }

    async fn complete_if_in_progress(
        &self,
        order_id: Uuid,
        event: OutboxEvent,
    ) -> Result<bool, ApiError> {
        let mut state = self.state.lock().await;
        let Some(order) = state.orders.get_mut(&order_id) else {
            return Ok(false);
        };
        if order.status != OrderStatus::InProgress {
            return Ok(false);
        }
        order.status = OrderStatus::Completed;
        state.outbox.push(event);
        Ok(true)
    }

    async fn unprocessed_events(&self, limit: i64) -> Result<Vec<OutboxEvent>, ApiError> {
        let state = self.state.lock().await;
        let mut events: Vec<_> = state.outbox.iter().filter(|e| !e.processed).cloned().collect();
        events.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        events.truncate(limit.max(0) as usize);
        Ok(events)
    }

    async fn mark_event_processed(&self, id: Uuid) -> Result<(), ApiError> {
        let mut state = self.state.lock().await;
        if let Some(event) = state.outbox.iter_mut().find(|e| e.id == id) {
            event.processed = true;
        }
        Ok(())
    }
}
