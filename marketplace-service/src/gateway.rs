//! Paystack client. Hosted-checkout initialization and verify-by-reference,
//! bearer-token authenticated, with a bounded request timeout so a hung
//! gateway surfaces as a retryable failure instead of blocking the caller.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::PaymentMetadata;
use std::time::Duration;

use crate::error::ApiError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize)]
pub struct InitializeRequest {
    pub email: String,
    /// Integer minor currency units (kobo).
    pub amount: i64,
    pub callback_url: String,
    pub metadata: PaymentMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeData {
    pub authorization_url: String,
    pub access_code: String,
    pub reference: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyData {
    pub status: String,
    pub reference: String,
    pub metadata: Option<PaymentMetadata>,
}

impl VerifyData {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

/// `{status, message, data}` envelope wrapping every Paystack response.
#[derive(Debug, Deserialize)]
struct GatewayEnvelope<T> {
    status: bool,
    message: String,
    data: Option<T>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initialize(&self, request: InitializeRequest) -> Result<InitializeData, ApiError>;
    async fn verify(&self, reference: &str) -> Result<VerifyData, ApiError>;
}

pub struct PaystackClient {
    client: reqwest::Client,
    secret_key: String,
    base_url: String,
}

impl PaystackClient {
    pub fn new(secret_key: String, base_url: String) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { client, secret_key, base_url })
    }

    async fn parse<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let status = response.status();
        let envelope = response
            .json::<GatewayEnvelope<T>>()
            .await
            .map_err(|e| ApiError::BadRequest(format!("unreadable gateway response: {e}")))?;
        if !status.is_success() || !envelope.status {
            return Err(ApiError::BadRequest(envelope.message));
        }
        envelope
            .data
            .ok_or_else(|| ApiError::BadRequest("gateway response carried no data".to_string()))
    }
}

#[async_trait]
impl PaymentGateway for PaystackClient {
    async fn initialize(&self, request: InitializeRequest) -> Result<InitializeData, ApiError> {
        let response = self
            .client
            .post(format!("{}/transaction/initialize", self.base_url))
            .bearer_auth(&self.secret_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Failed to initialize payment: {e}")))?;
        Self::parse(response).await
    }

    async fn verify(&self, reference: &str) -> Result<VerifyData, ApiError> {
        let response = self
            .client
            .get(format!("{}/transaction/verify/{reference}", self.base_url))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Failed to verify payment: {e}")))?;
        Self::parse(response).await
    }
}
