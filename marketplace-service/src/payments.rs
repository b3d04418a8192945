//! Payment reconciler: drives gateway confirmation and, on success,
//! atomically promotes the order to PAID and commits availability bookings.

use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha512;
use shared::{
    OutboxEvent, Payment, PaymentMetadata, WebhookEnvelope, WEBHOOK_CHARGE_SUCCESS,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ApiError;
use crate::gateway::{InitializeData, InitializeRequest, PaymentGateway, VerifyData};
use crate::store::{BookingRequest, MarketplaceStore, OrderDetail};

use bigdecimal::BigDecimal;
use num_traits::ToPrimitive;

pub const PROVIDER: &str = "paystack";

type HmacSha512 = Hmac<Sha512>;

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<VerifyData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Clone)]
pub struct PaymentService {
    store: Arc<dyn MarketplaceStore>,
    gateway: Arc<dyn PaymentGateway>,
    secret_key: String,
    callback_url: String,
}

impl PaymentService {
    pub fn new(
        store: Arc<dyn MarketplaceStore>,
        gateway: Arc<dyn PaymentGateway>,
        secret_key: String,
        callback_url: String,
    ) -> Self {
        Self { store, gateway, secret_key, callback_url }
    }

    pub async fn get_payment(&self, order_id: Uuid) -> Result<Payment, ApiError> {
        self.store
            .payment(order_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Payment not found".to_string()))
    }

    /// Create (or reset) the payment record and request a hosted-checkout
    /// session. A gateway failure leaves the payment at INITIATED so the
    /// caller can retry.
    pub async fn initiate(&self, order_id: Uuid) -> Result<InitializeData, ApiError> {
        let order = self
            .store
            .order(order_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Order not found".to_string()))?;
        let email = self
            .store
            .user_email(order.user_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

        self.store.upsert_payment(order_id, PROVIDER).await?;

        let request = InitializeRequest {
            email,
            amount: to_minor_units(&order.total_amount)?,
            callback_url: self.callback_url.clone(),
            metadata: PaymentMetadata { order_id, user_id: Some(order.user_id) },
        };
        self.gateway.initialize(request).await
    }

    /// Mark the payment SUCCESS and promote the order to PAID, committing
    /// availability for every date-ranged item in the same transaction.
    /// Calling it again for an already-PAID order is a no-op that returns the
    /// current order.
    pub async fn confirm(&self, order_id: Uuid, reference: &str) -> Result<OrderDetail, ApiError> {
        let detail = self
            .store
            .order_detail(order_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Order not found".to_string()))?;

        // Food items are not separately locked; their daily-capacity
        // accounting happened at order creation.
        let mut bookings: Vec<BookingRequest> = detail
            .items
            .iter()
            .filter_map(|entry| {
                entry.item.window().map(|window| BookingRequest {
                    product_id: entry.product.id,
                    product_name: entry.product.name.clone(),
                    window,
                    quantity: entry.item.quantity,
                    total_quantity: entry.product.quantity.unwrap_or(0),
                })
            })
            .collect();
        // Deterministic lock order across concurrent confirmations.
        bookings.sort_by_key(|b| b.product_id);

        let event = OutboxEvent::order_confirmed(order_id, reference);
        self.store.confirm_paid(order_id, reference, bookings, event).await?;

        self.store
            .order_detail(order_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Order not found".to_string()))
    }

    /// Mark the payment FAILED. The order stays PENDING and can be retried
    /// or cancelled later.
    pub async fn fail(&self, order_id: Uuid, reference: Option<&str>) -> Result<Payment, ApiError> {
        let event = OutboxEvent::payment_failed(order_id, reference);
        self.store.set_payment_failed(order_id, reference, event).await
    }

    /// Webhook ingestion. The HMAC-SHA512 signature over the raw body must
    /// match before anything else happens; unrecognized events are accepted
    /// but ignored.
    pub async fn handle_webhook(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookAck, ApiError> {
        self.verify_signature(body, signature)?;

        let envelope: WebhookEnvelope = serde_json::from_slice(body)
            .map_err(|e| ApiError::BadRequest(format!("invalid webhook payload: {e}")))?;

        if envelope.event != WEBHOOK_CHARGE_SUCCESS {
            return Ok(WebhookAck { success: false, message: "Event not handled".to_string() });
        }

        let order_id = envelope.data.metadata.order_id;
        self.confirm(order_id, &envelope.data.reference).await?;
        Ok(WebhookAck {
            success: true,
            message: "Payment confirmed and order locked".to_string(),
        })
    }

    /// Client-driven verification: ask the gateway about a reference and
    /// confirm the order it points at if the charge succeeded. Reports
    /// failure without mutating anything otherwise.
    pub async fn verify(&self, reference: &str) -> Result<VerifyOutcome, ApiError> {
        let data = self.gateway.verify(reference).await?;

        if !data.is_success() {
            return Ok(VerifyOutcome {
                success: false,
                data: None,
                message: Some("Payment verification failed".to_string()),
            });
        }

        let order_id = data
            .metadata
            .as_ref()
            .map(|m| m.order_id)
            .ok_or_else(|| ApiError::BadRequest("gateway metadata missing orderId".to_string()))?;
        self.confirm(order_id, reference).await?;

        Ok(VerifyOutcome { success: true, data: Some(data), message: None })
    }

    pub fn verify_signature(&self, body: &[u8], signature: Option<&str>) -> Result<(), ApiError> {
        let signature =
            signature.ok_or_else(|| ApiError::BadRequest("Invalid webhook signature".to_string()))?;
        let mut mac = HmacSha512::new_from_slice(self.secret_key.as_bytes())
            .map_err(|_| ApiError::BadRequest("Invalid webhook signature".to_string()))?;
        mac.update(body);
        let expected = hex::encode(mac.finalize().into_bytes());
        if expected != signature {
            return Err(ApiError::BadRequest("Invalid webhook signature".to_string()));
        }
        Ok(())
    }
}

/// Convert a major-unit total to the gateway's integer minor units (kobo).
fn to_minor_units(amount: &BigDecimal) -> Result<i64, ApiError> {
    (amount * BigDecimal::from(100))
        .round(0)
        .to_i64()
        .ok_or_else(|| ApiError::BadRequest("order total out of range".to_string()))
}
