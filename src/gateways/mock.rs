//! Mock payment gateway.
//!
//! Lets the whole settlement flow run without a real provider. The redirect
//! points at the mock provider's pay endpoint; the provider "charges" the
//! payer, appends a fixed token to the callback URL and calls it back.
//! Verification asks the provider whether that token is a completed payment.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::errors::GatewayError;
use crate::money::Money;
use crate::payments::{callback_data_from_url, CallbackData, HttpMethod, RedirectGateway, Transaction};

use super::Gateway;

pub const MOCK_GATEWAY: &str = "mock-gateway";
pub const MOCK_TOKEN: &str = "mock-token";

const PAY_PATH: &str = "/api/v1/payment/mock-gateway/pay";
const VERIFY_PATH: &str = "/api/v1/payment/mock-gateway/verify";
const TOKEN_KEY: &str = "token";

/// body posted by the payer's client to the pay endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayRequest {
    pub amount: Money,
    pub callback_url: Url,
}

/// answer of the verify endpoint; `code == 0` means paid
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub code: i32,
    pub message: String,
}

/// provider side of the mock gateway
#[async_trait]
pub trait MockProvider: Send + Sync {
    async fn verify(&self, token: &str) -> Result<VerifyResponse, GatewayError>;
}

/// talks to a mock provider over http
#[derive(Debug, Clone)]
pub struct HttpMockProvider {
    client: reqwest::Client,
    verify_url: Url,
    timeout: Duration,
}

impl HttpMockProvider {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            verify_url: base_url.join(VERIFY_PATH)?,
            timeout,
        })
    }
}

#[async_trait]
impl MockProvider for HttpMockProvider {
    async fn verify(&self, token: &str) -> Result<VerifyResponse, GatewayError> {
        let mut url = self.verify_url.clone();
        url.query_pairs_mut().append_pair(TOKEN_KEY, token);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| self.classify(e))?;

        response.json::<VerifyResponse>().await.map_err(|e| self.classify(e))
    }
}

impl HttpMockProvider {
    fn classify(&self, err: reqwest::Error) -> GatewayError {
        if err.is_timeout() {
            GatewayError::Timeout { after: self.timeout }
        } else {
            GatewayError::Transport(err)
        }
    }
}

/// in-process stand-in for the mock provider
///
/// `complete` plays the pay endpoint: it returns the data the provider
/// would deliver to the callback URL. Verification is idempotent and
/// counted so tests can observe retries.
#[derive(Debug, Default)]
pub struct SimulatedProvider {
    verifications: AtomicUsize,
}

impl SimulatedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// callback data for a successfully charged redirect
    pub fn complete(&self, redirect: &RedirectGateway) -> Result<CallbackData, GatewayError> {
        let request: PayRequest = serde_json::from_value(Value::Object(redirect.body.clone()))?;
        let mut callback = request.callback_url;
        callback.query_pairs_mut().append_pair(TOKEN_KEY, MOCK_TOKEN);
        debug!(callback = %callback, amount = %request.amount, "mock provider calling back");
        Ok(callback_data_from_url(&callback))
    }

    pub fn verifications(&self) -> usize {
        self.verifications.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MockProvider for SimulatedProvider {
    async fn verify(&self, token: &str) -> Result<VerifyResponse, GatewayError> {
        self.verifications.fetch_add(1, Ordering::SeqCst);
        let response = if token == MOCK_TOKEN {
            VerifyResponse {
                code: 0,
                message: "payment completed".to_string(),
            }
        } else {
            VerifyResponse {
                code: 1,
                message: "payment not complete".to_string(),
            }
        };
        Ok(response)
    }
}

pub struct MockGateway {
    base_url: Url,
    provider: Arc<dyn MockProvider>,
}

impl MockGateway {
    pub fn new<P: MockProvider + 'static>(base_url: Url, provider: P) -> Self {
        Self::with_provider(base_url, Arc::new(provider))
    }

    pub fn with_provider(base_url: Url, provider: Arc<dyn MockProvider>) -> Self {
        Self { base_url, provider }
    }

    /// gateway backed by a fresh `SimulatedProvider`
    pub fn simulated(base_url: Url) -> Self {
        Self::new(base_url, SimulatedProvider::new())
    }
}

#[async_trait]
impl Gateway for MockGateway {
    async fn create_transaction(&self, tx: &Transaction) -> Result<RedirectGateway, GatewayError> {
        let url = self.base_url.join(PAY_PATH)?;

        let mut body = Map::new();
        body.insert("amount".to_string(), json!(tx.amount));
        body.insert("callbackUrl".to_string(), json!(tx.callback_url.as_str()));

        Ok(RedirectGateway {
            method: HttpMethod::Post,
            url,
            body,
            reference: Some(Uuid::new_v4().to_string()),
        })
    }

    async fn verify_transaction(&self, data: &CallbackData) -> Result<(), GatewayError> {
        let token = data
            .get(TOKEN_KEY)
            .and_then(|values| values.first())
            .ok_or(GatewayError::MissingToken)?;

        let response = self.provider.verify(token).await?;
        if response.code != 0 {
            return Err(GatewayError::PaymentNotComplete {
                message: response.message,
            });
        }
        Ok(())
    }
}
