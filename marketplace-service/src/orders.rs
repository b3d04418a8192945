//! Order builder and status machine.

use bigdecimal::BigDecimal;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use shared::{
    DateWindow, Order, OrderItem, OrderStatus, OutboxEvent, ProductType, Role,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ApiError;
use crate::store::{CapacityGuard, MarketplaceStore, OrderDetail};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub event_id: Uuid,
    pub items: Vec<OrderItemDraft>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemDraft {
    pub product_id: Uuid,
    pub quantity: i32,
    /// Client-sent unit price. Stored on the item for display but never
    /// trusted: the order total always uses the product's current price.
    pub price: BigDecimal,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub delivery_date: Option<NaiveDate>,
}

#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn MarketplaceStore>,
}

impl OrderService {
    pub fn new(store: Arc<dyn MarketplaceStore>) -> Self {
        Self { store }
    }

    /// Validate a multi-item cart and persist a provisional PENDING order.
    /// The first failing item aborts the whole order; nothing is written.
    pub async fn create_order(
        &self,
        user_id: Uuid,
        request: CreateOrderRequest,
    ) -> Result<OrderDetail, ApiError> {
        self.store
            .event(request.event_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Event not found".to_string()))?;

        let order_id = Uuid::new_v4();
        let mut total = BigDecimal::from(0);
        let mut items = Vec::with_capacity(request.items.len());
        let mut guards: Vec<CapacityGuard> = Vec::new();

        for draft in &request.items {
            let product = self
                .store
                .product(draft.product_id)
                .await?
                .ok_or_else(|| {
                    ApiError::NotFound(format!("Product {} not found", draft.product_id))
                })?;

            match product.product_type {
                ProductType::Food => {
                    let day = draft.delivery_date.ok_or_else(|| {
                        ApiError::BadRequest(format!("{} requires deliveryDate", product.name))
                    })?;

                    if let Some(daily_capacity) = product.daily_capacity {
                        let existing = self.store.food_quantity_on_day(product.id, day).await?;
                        if existing + i64::from(draft.quantity) > i64::from(daily_capacity) {
                            return Err(ApiError::BadRequest(format!(
                                "{} exceeds daily capacity of {} on {}",
                                product.name, daily_capacity, day
                            )));
                        }
                        // Re-checked inside the insert transaction with the
                        // product row locked.
                        guards.push(CapacityGuard {
                            product_id: product.id,
                            product_name: product.name.clone(),
                            day,
                            daily_capacity,
                        });
                    }
                }
                ProductType::Rental | ProductType::Service => {
                    let (start, end) = match (draft.start_date, draft.end_date) {
                        (Some(start), Some(end)) => (start, end),
                        _ => {
                            return Err(ApiError::BadRequest(format!(
                                "{} requires startDate and endDate",
                                product.name
                            )));
                        }
                    };
                    let window = DateWindow::new(start, end);
                    let booked = self.store.booked_quantity(product.id, window).await?;
                    let ceiling = i64::from(product.quantity.unwrap_or(0));
                    if booked + i64::from(draft.quantity) > ceiling {
                        return Err(ApiError::BadRequest(format!(
                            "{} not available for the requested dates",
                            product.name
                        )));
                    }
                }
            }

            total += &product.price * BigDecimal::from(draft.quantity);

            items.push(OrderItem {
                id: Uuid::new_v4(),
                order_id,
                product_id: product.id,
                quantity: draft.quantity,
                price: draft.price.clone(),
                start_date: draft.start_date,
                end_date: draft.end_date,
                delivery_date: draft.delivery_date,
            });
        }

        let order = Order {
            id: order_id,
            user_id,
            event_id: request.event_id,
            total_amount: total,
            status: OrderStatus::Pending,
            created_at: Utc::now(),
        };

        guards.sort_by_key(|g| g.product_id);
        self.store.insert_order(order, items, guards).await?;

        self.store
            .order_detail(order_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Order not found".to_string()))
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderDetail, ApiError> {
        self.store
            .order_detail(order_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Order not found".to_string()))
    }

    pub async fn orders_for_user(&self, user_id: Uuid) -> Result<Vec<OrderDetail>, ApiError> {
        self.store.orders_for_user(user_id).await
    }

    pub async fn orders_for_vendor(&self, vendor_id: Uuid) -> Result<Vec<OrderDetail>, ApiError> {
        self.store.orders_for_vendor(vendor_id).await
    }

    /// Apply a status transition on behalf of a user. Legality is checked
    /// first, then role-based authorization for the transitions that need it.
    pub async fn update_status(
        &self,
        order_id: Uuid,
        target: OrderStatus,
        user_id: Uuid,
        role: Role,
    ) -> Result<OrderDetail, ApiError> {
        let detail = self
            .store
            .order_detail(order_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Order not found".to_string()))?;
        let current = detail.order.status;

        if !current.can_transition_to(target) {
            return Err(ApiError::BadRequest(format!(
                "cannot transition from {current} to {target}"
            )));
        }

        match target {
            OrderStatus::Cancelled => {
                if current != OrderStatus::Pending && role != Role::Admin {
                    return Err(ApiError::Forbidden(
                        "Only admins can cancel paid orders".to_string(),
                    ));
                }
                if role != Role::Admin {
                    return Err(ApiError::Forbidden("Only admins can cancel orders".to_string()));
                }
            }
            OrderStatus::InProgress => {
                let is_vendor = role == Role::Vendor && detail.vendor_ids().contains(&user_id);
                if !is_vendor && role != Role::Admin {
                    return Err(ApiError::Forbidden(
                        "Only vendors for this order can mark it as IN_PROGRESS".to_string(),
                    ));
                }
            }
            _ => {}
        }

        let event = match target {
            OrderStatus::InProgress => Some(OutboxEvent::order_ready(order_id)),
            OrderStatus::Completed => Some(OutboxEvent::order_completed(order_id)),
            _ => None,
        };

        self.store.set_order_status(order_id, target, event).await?;
        self.get_order(order_id).await
    }
}
