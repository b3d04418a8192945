//! Router-level checks: auth header extraction, webhook signature rejection
//! and the health probe, exercised with `tower::ServiceExt::oneshot`.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use std::sync::Arc;
use tower::util::ServiceExt;
use uuid::Uuid;

use marketplace_service::api::{create_router, AppState};
use marketplace_service::error::ApiError;
use marketplace_service::gateway::{InitializeData, InitializeRequest, PaymentGateway, VerifyData};
use marketplace_service::orders::OrderService;
use marketplace_service::payments::PaymentService;
use marketplace_service::store::MemoryStore;

struct UnreachableGateway;

#[async_trait]
impl PaymentGateway for UnreachableGateway {
    async fn initialize(&self, _request: InitializeRequest) -> Result<InitializeData, ApiError> {
        Err(ApiError::BadRequest("gateway should not be called".to_string()))
    }

    async fn verify(&self, _reference: &str) -> Result<VerifyData, ApiError> {
        Err(ApiError::BadRequest("gateway should not be called".to_string()))
    }
}

fn router() -> axum::Router {
    let store = Arc::new(MemoryStore::new());
    let orders = OrderService::new(store.clone());
    let payments = PaymentService::new(
        store,
        Arc::new(UnreachableGateway),
        "sk_test_secret".to_string(),
        "http://localhost:3000/checkout/success".to_string(),
    );
    create_router(AppState { orders, payments })
}

#[tokio::test]
async fn health_is_open() {
    let response = router()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn orders_require_auth_headers() {
    let response = router()
        .oneshot(Request::builder().uri("/orders").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_role_header_is_rejected() {
    let response = router()
        .oneshot(
            Request::builder()
                .uri("/orders")
                .header("x-user-id", Uuid::new_v4().to_string())
                .header("x-user-role", "SUPERUSER")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn webhook_with_bad_signature_is_a_400() {
    let body = serde_json::json!({
        "event": "charge.success",
        "data": {
            "reference": "ref_x",
            "metadata": { "orderId": Uuid::new_v4() }
        }
    });

    let response = router()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/payments/webhook/paystack")
                .header("content-type", "application/json")
                .header("x-paystack-signature", "not-a-real-signature")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(parsed["error"], "Invalid webhook signature");
}

#[tokio::test]
async fn unknown_order_is_a_404() {
    let response = router()
        .oneshot(
            Request::builder()
                .uri(format!("/orders/{}", Uuid::new_v4()))
                .header("x-user-id", Uuid::new_v4().to_string())
                .header("x-user-role", "CUSTOMER")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
