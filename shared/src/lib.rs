use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Paid,
    InProgress,
    Completed,
    Cancelled,
}

impl OrderStatus {
    /// The full transition table. Everything not listed here is illegal.
    pub fn can_transition_to(self, target: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, target),
            (Pending, Paid) | (Pending, Cancelled) | (Paid, InProgress) | (Paid, Cancelled) | (InProgress, Completed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Paid => "PAID",
            OrderStatus::InProgress => "IN_PROGRESS",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OrderStatus::Pending),
            "PAID" => Ok(OrderStatus::Paid),
            "IN_PROGRESS" => Ok(OrderStatus::InProgress),
            "COMPLETED" => Ok(OrderStatus::Completed),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            other => Err(ParseEnumError { kind: "order status", value: other.to_string() }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Initiated,
    Success,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Initiated => "INITIATED",
            PaymentStatus::Success => "SUCCESS",
            PaymentStatus::Failed => "FAILED",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INITIATED" => Ok(PaymentStatus::Initiated),
            "SUCCESS" => Ok(PaymentStatus::Success),
            "FAILED" => Ok(PaymentStatus::Failed),
            other => Err(ParseEnumError { kind: "payment status", value: other.to_string() }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProductType {
    Food,
    Rental,
    Service,
}

impl ProductType {
    pub fn as_str(self) -> &'static str {
        match self {
            ProductType::Food => "FOOD",
            ProductType::Rental => "RENTAL",
            ProductType::Service => "SERVICE",
        }
    }

    /// Rentals and services book a date window; food books a delivery day.
    pub fn uses_date_window(self) -> bool {
        matches!(self, ProductType::Rental | ProductType::Service)
    }
}

impl FromStr for ProductType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FOOD" => Ok(ProductType::Food),
            "RENTAL" => Ok(ProductType::Rental),
            "SERVICE" => Ok(ProductType::Service),
            other => Err(ParseEnumError { kind: "product type", value: other.to_string() }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Customer,
    Vendor,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Customer => "CUSTOMER",
            Role::Vendor => "VENDOR",
            Role::Admin => "ADMIN",
        }
    }
}

impl FromStr for Role {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CUSTOMER" => Ok(Role::Customer),
            "VENDOR" => Ok(Role::Vendor),
            "ADMIN" => Ok(Role::Admin),
            other => Err(ParseEnumError { kind: "role", value: other.to_string() }),
        }
    }
}

/// Inclusive booking window. Food items collapse to a single day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn single_day(day: NaiveDate) -> Self {
        Self { start: day, end: day }
    }

    pub fn overlaps(&self, other: &DateWindow) -> bool {
        self.start <= other.end && self.end >= other.start
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: Uuid,
    pub vendor_id: Uuid,
    pub name: String,
    pub product_type: ProductType,
    pub price: BigDecimal,
    pub quantity: Option<i32>,
    pub daily_capacity: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub event_date: DateTime<Utc>,
    pub location: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub event_id: Uuid,
    pub total_amount: BigDecimal,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub price: BigDecimal,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub delivery_date: Option<NaiveDate>,
}

impl OrderItem {
    pub fn window(&self) -> Option<DateWindow> {
        match (self.start_date, self.end_date) {
            (Some(start), Some(end)) => Some(DateWindow::new(start, end)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub provider: String,
    pub status: PaymentStatus,
    pub reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A committed reservation. Rows never merge and are kept for capacity
/// accounting even if the owning order is later cancelled.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Availability {
    pub id: Uuid,
    pub product_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub quantity: i32,
}

impl Availability {
    pub fn window(&self) -> DateWindow {
        DateWindow::new(self.start_date, self.end_date)
    }
}

pub const EVENT_ORDER_CONFIRMED: &str = "order.confirmed";
pub const EVENT_PAYMENT_FAILED: &str = "payment.failed";
pub const EVENT_ORDER_READY: &str = "order.ready";
pub const EVENT_ORDER_COMPLETED: &str = "order.completed";

/// Notification hook record, written transactionally alongside the state
/// change that caused it and drained by the outbox processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

impl OutboxEvent {
    pub fn new(aggregate_id: Uuid, event_type: &str, event_data: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            aggregate_id,
            event_type: event_type.to_string(),
            event_data,
            processed: false,
            created_at: Utc::now(),
        }
    }

    pub fn order_confirmed(order_id: Uuid, reference: &str) -> Self {
        Self::new(
            order_id,
            EVENT_ORDER_CONFIRMED,
            serde_json::json!({ "orderId": order_id, "reference": reference }),
        )
    }

    pub fn payment_failed(order_id: Uuid, reference: Option<&str>) -> Self {
        Self::new(
            order_id,
            EVENT_PAYMENT_FAILED,
            serde_json::json!({ "orderId": order_id, "reference": reference }),
        )
    }

    pub fn order_ready(order_id: Uuid) -> Self {
        Self::new(order_id, EVENT_ORDER_READY, serde_json::json!({ "orderId": order_id }))
    }

    pub fn order_completed(order_id: Uuid) -> Self {
        Self::new(order_id, EVENT_ORDER_COMPLETED, serde_json::json!({ "orderId": order_id }))
    }
}

/// Paystack webhook envelope: `{event, data: {reference, status, metadata}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEnvelope {
    pub event: String,
    pub data: WebhookCharge,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookCharge {
    pub reference: String,
    #[serde(default)]
    pub status: Option<String>,
    pub metadata: PaymentMetadata,
}

/// Metadata we attach when initializing a checkout session, echoed back by
/// the gateway on webhooks and verify calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentMetadata {
    #[serde(rename = "orderId")]
    pub order_id: Uuid,
    #[serde(rename = "userId")]
    pub user_id: Option<Uuid>,
}

pub const WEBHOOK_CHARGE_SUCCESS: &str = "charge.success";

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATUSES: [OrderStatus; 5] = [
        OrderStatus::Pending,
        OrderStatus::Paid,
        OrderStatus::InProgress,
        OrderStatus::Completed,
        OrderStatus::Cancelled,
    ];

    #[test]
    fn transition_table_is_exact() {
        use OrderStatus::*;
        let legal = [
            (Pending, Paid),
            (Pending, Cancelled),
            (Paid, InProgress),
            (Paid, Cancelled),
            (InProgress, Completed),
        ];
        for from in ALL_STATUSES {
            for to in ALL_STATUSES {
                let expected = legal.contains(&(from, to));
                assert_eq!(from.can_transition_to(to), expected, "{from} -> {to}");
            }
        }
    }

    #[test]
    fn terminal_statuses() {
        assert!(OrderStatus::Completed.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(!OrderStatus::Paid.is_terminal());
        assert!(!OrderStatus::InProgress.is_terminal());
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in ALL_STATUSES {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
        assert!("paid".parse::<OrderStatus>().is_err());
        assert!("".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn window_overlap_is_inclusive() {
        let d = |day: u32| NaiveDate::from_ymd_opt(2025, 1, day).unwrap();
        let booked = DateWindow::new(d(1), d(5));
        assert!(booked.overlaps(&DateWindow::new(d(3), d(4))));
        assert!(booked.overlaps(&DateWindow::new(d(5), d(9))));
        assert!(booked.overlaps(&DateWindow::new(d(1), d(1))));
        assert!(!booked.overlaps(&DateWindow::new(d(6), d(9))));
        assert!(!booked.overlaps(&DateWindow::single_day(d(6))));
    }

    #[test]
    fn webhook_envelope_parses_paystack_payload() {
        let order_id = Uuid::new_v4();
        let body = serde_json::json!({
            "event": "charge.success",
            "data": {
                "reference": "ref_123",
                "status": "success",
                "metadata": { "orderId": order_id, "userId": Uuid::new_v4() }
            }
        });
        let envelope: WebhookEnvelope = serde_json::from_value(body).unwrap();
        assert_eq!(envelope.event, WEBHOOK_CHARGE_SUCCESS);
        assert_eq!(envelope.data.metadata.order_id, order_id);
        assert_eq!(envelope.data.reference, "ref_123");
    }
}
