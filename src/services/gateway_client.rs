use async_trait::async_trait;
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use std::{fmt, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::errors::ServiceError;
use crate::models::payment::{format_amount, ChargeRequest, ChargeResponse};

/// Merchant credential pair issued by the processor
#[derive(Clone)]
pub struct GatewayCredentials {
    pub merchant_code: String,
    pub hash_key: String,
}

impl GatewayCredentials {
    pub fn new(merchant_code: impl Into<String>, hash_key: impl Into<String>) -> Self {
        Self {
            merchant_code: merchant_code.into(),
            hash_key: hash_key.into(),
        }
    }
}

impl fmt::Debug for GatewayCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayCredentials")
            .field("merchant_code", &self.merchant_code)
            .field("hash_key", &"[redacted]")
            .finish()
    }
}

/// Signature binding a charge (or a notification about it) to the merchant.
///
/// Lowercase hex SHA-256 over
/// `merchant_code || merchant_reference_id || customer_profile_id || amount || hash_key`,
/// with the amount rendered to two decimals.
pub fn compute_signature(
    amount: Decimal,
    merchant_reference_id: &str,
    customer_profile_id: &str,
    credentials: &GatewayCredentials,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(credentials.merchant_code.as_bytes());
    hasher.update(merchant_reference_id.as_bytes());
    hasher.update(customer_profile_id.as_bytes());
    hasher.update(format_amount(amount).as_bytes());
    hasher.update(credentials.hash_key.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn verify_signature(
    provided: &str,
    amount: Decimal,
    merchant_reference_id: &str,
    customer_profile_id: &str,
    credentials: &GatewayCredentials,
) -> bool {
    let expected = compute_signature(
        amount,
        merchant_reference_id,
        customer_profile_id,
        credentials,
    );
    constant_time_eq(&expected, &provided.trim().to_ascii_lowercase())
}

pub(crate) fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("gateway did not answer within {0:?}")]
    Timeout(Duration),

    #[error("gateway connection failed: {0}")]
    Connect(String),

    #[error("gateway returned an unreadable response (HTTP {status}): {detail}")]
    InvalidResponse { status: u16, detail: String },

    #[error("gateway client misconfigured: {0}")]
    Configuration(String),
}

impl From<TransportError> for ServiceError {
    fn from(err: TransportError) -> Self {
        ServiceError::GatewayUnreachable(err.to_string())
    }
}

/// Single request/response exchange with the processor.
#[async_trait]
pub trait GatewayTransport: Send + Sync {
    async fn send(&self, request: &ChargeRequest) -> Result<ChargeResponse, TransportError>;
}

/// `reqwest` transport posting JSON with a bearer token.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: Url,
    api_token: String,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(
        endpoint: Url,
        api_token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            endpoint,
            api_token: api_token.into(),
            timeout,
        })
    }

    fn classify(&self, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else {
            TransportError::Connect(err.to_string())
        }
    }
}

#[async_trait]
impl GatewayTransport for HttpTransport {
    async fn send(&self, request: &ChargeRequest) -> Result<ChargeResponse, TransportError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_token)
            .json(request)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| self.classify(e))?;

        // Validation failures come back as 4xx with a JSON body, so the status alone decides nothing.
        serde_json::from_slice::<ChargeResponse>(&body).map_err(|e| {
            warn!(http_status = status.as_u16(), "gateway body is not a charge response");
            TransportError::InvalidResponse {
                status: status.as_u16(),
                detail: e.to_string(),
            }
        })
    }
}

/// Signs and sends charge requests. Never retries: a repeated charge could bill twice.
#[derive(Clone)]
pub struct GatewayClient {
    transport: Arc<dyn GatewayTransport>,
    credentials: GatewayCredentials,
    return_url: String,
}

impl GatewayClient {
    pub fn new(
        transport: Arc<dyn GatewayTransport>,
        credentials: GatewayCredentials,
        return_url: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            credentials,
            return_url: return_url.into(),
        }
    }

    /// Where the processor sends the buyer after the step-up page
    pub fn return_url(&self) -> &str {
        &self.return_url
    }

    pub fn sign(
        &self,
        amount: Decimal,
        merchant_reference_id: &str,
        customer_profile_id: &str,
    ) -> String {
        compute_signature(
            amount,
            merchant_reference_id,
            customer_profile_id,
            &self.credentials,
        )
    }

    #[instrument(skip_all, fields(merchant_reference_id = %request.merchant_reference_id))]
    pub async fn charge(&self, request: &ChargeRequest) -> Result<ChargeResponse, TransportError> {
        debug!(request = ?request, "sending charge request");
        match self.transport.send(request).await {
            Ok(response) => {
                info!(
                    success = response.success,
                    three_d_secured = response.three_d_secured,
                    cowpay_reference_id = response.cowpay_reference_id.as_deref().unwrap_or(""),
                    "charge response received"
                );
                Ok(response)
            }
            Err(err) => {
                warn!(error = %err, "charge request failed in transport");
                Err(err)
            }
        }
    }
}
