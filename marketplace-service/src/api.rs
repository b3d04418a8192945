//! HTTP surface. Authentication happens upstream; an auth middleware injects
//! `x-user-id` and `x-user-role` headers which the `AuthUser` extractor
//! parses once into typed values.

use axum::async_trait;
use axum::body::Bytes;
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum::response::Json;
use axum::routing::{get, patch, post};
use axum::Router;
use serde::Deserialize;
use shared::{OrderStatus, Payment, Role};
use uuid::Uuid;

use crate::error::ApiError;
use crate::gateway::InitializeData;
use crate::orders::{CreateOrderRequest, OrderService};
use crate::payments::{PaymentService, VerifyOutcome, WebhookAck};
use crate::store::OrderDetail;

#[derive(Clone)]
pub struct AppState {
    pub orders: OrderService,
    pub payments: PaymentService,
}

/// `(userId, role)` as supplied by the upstream auth middleware.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role: Role,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| ApiError::Unauthorized("missing authentication context".to_string()))
        };
        let user_id = header("x-user-id")?
            .parse::<Uuid>()
            .map_err(|_| ApiError::Unauthorized("invalid authentication context".to_string()))?;
        let role = header("x-user-role")?
            .parse::<Role>()
            .map_err(|_| ApiError::Unauthorized("invalid authentication context".to_string()))?;
        Ok(AuthUser { user_id, role })
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/orders", post(create_order).get(get_user_orders))
        .route("/orders/vendor", get(get_vendor_orders))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/status", patch(update_order_status))
        .route("/orders/:id/in-progress", patch(mark_in_progress))
        .route("/payments/initiate", post(initiate_payment))
        .route("/payments/verify", post(verify_payment))
        .route("/payments/webhook/paystack", post(paystack_webhook))
        .route("/payments/:order_id/confirm", post(confirm_payment))
        .route("/payments/:order_id/fail", post(fail_payment))
        .route("/payments/:order_id", get(get_payment))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

async fn create_order(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(request): Json<CreateOrderRequest>,
) -> Result<Json<OrderDetail>, ApiError> {
    let detail = state.orders.create_order(auth.user_id, request).await?;
    tracing::info!("Created order {} for user {}", detail.order.id, auth.user_id);
    Ok(Json(detail))
}

async fn get_order(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(order_id): Path<Uuid>,
) -> Result<Json<OrderDetail>, ApiError> {
    Ok(Json(state.orders.get_order(order_id).await?))
}

async fn get_user_orders(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<OrderDetail>>, ApiError> {
    Ok(Json(state.orders.orders_for_user(auth.user_id).await?))
}

async fn get_vendor_orders(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<OrderDetail>>, ApiError> {
    if auth.role != Role::Vendor {
        return Err(ApiError::Forbidden("VENDOR role required".to_string()));
    }
    Ok(Json(state.orders.orders_for_vendor(auth.user_id).await?))
}

#[derive(Debug, Deserialize)]
struct StatusParams {
    status: String,
}

async fn update_order_status(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(order_id): Path<Uuid>,
    Query(params): Query<StatusParams>,
) -> Result<Json<OrderDetail>, ApiError> {
    let target: OrderStatus = params
        .status
        .parse()
        .map_err(|e: shared::ParseEnumError| ApiError::BadRequest(e.to_string()))?;
    let detail = state.orders.update_status(order_id, target, auth.user_id, auth.role).await?;
    Ok(Json(detail))
}

async fn mark_in_progress(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(order_id): Path<Uuid>,
) -> Result<Json<OrderDetail>, ApiError> {
    let detail = state
        .orders
        .update_status(order_id, OrderStatus::InProgress, auth.user_id, auth.role)
        .await?;
    Ok(Json(detail))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitiateRequest {
    order_id: Uuid,
}

async fn initiate_payment(
    State(state): State<AppState>,
    _auth: AuthUser,
    Json(request): Json<InitiateRequest>,
) -> Result<Json<InitializeData>, ApiError> {
    Ok(Json(state.payments.initiate(request.order_id).await?))
}

#[derive(Debug, Deserialize)]
struct VerifyRequest {
    reference: String,
}

async fn verify_payment(
    State(state): State<AppState>,
    Json(request): Json<VerifyRequest>,
) -> Result<Json<VerifyOutcome>, ApiError> {
    Ok(Json(state.payments.verify(&request.reference).await?))
}

async fn paystack_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError> {
    let signature = headers.get("x-paystack-signature").and_then(|v| v.to_str().ok());
    Ok(Json(state.payments.handle_webhook(&body, signature).await?))
}

#[derive(Debug, Deserialize)]
struct ConfirmRequest {
    reference: String,
}

async fn confirm_payment(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(request): Json<ConfirmRequest>,
) -> Result<Json<OrderDetail>, ApiError> {
    Ok(Json(state.payments.confirm(order_id, &request.reference).await?))
}

#[derive(Debug, Deserialize, Default)]
struct FailRequest {
    reference: Option<String>,
}

async fn fail_payment(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    body: Option<Json<FailRequest>>,
) -> Result<Json<Payment>, ApiError> {
    let reference = body.as_ref().and_then(|b| b.reference.as_deref());
    Ok(Json(state.payments.fail(order_id, reference).await?))
}

async fn get_payment(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Payment>, ApiError> {
    Ok(Json(state.payments.get_payment(order_id).await?))
}

async fn health_check() -> &'static str {
    "OK"
}
