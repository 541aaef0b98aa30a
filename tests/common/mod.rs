#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use cowpay_checkout::{
    app_router,
    config::{AppConfig, GatewayConfig, StorefrontConfig, WebhookConfig},
    models::order::{BillingContact, Order, PaymentStatus},
    models::payment::{format_amount, ChargeRequest, ChargeResponse},
    repositories::{InMemoryOrderStore, OrderStore},
    services::gateway_client::{compute_signature, GatewayCredentials, GatewayTransport, TransportError},
    services::storefront::{InMemoryStorefront, Storefront},
    AppState,
};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

pub const MERCHANT_CODE: &str = "MERCH01";
pub const HASH_KEY: &str = "s3cr3t-hash-key";
pub const THANK_YOU_URL: &str = "https://shop.example.com/checkout/thank-you";
pub const CHECKOUT_URL: &str = "https://shop.example.com/checkout";
pub const LANDING_URL: &str = "https://shop.example.com/";
pub const WEBHOOK_SECRET: &str = "whsec_test_0123456789";

/// Gateway stand-in answering from a queue of scripted responses and recording every request.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<ChargeResponse, TransportError>>>,
    requests: Mutex<Vec<ChargeRequest>>,
}

impl ScriptedTransport {
    pub fn push(&self, response: Result<ChargeResponse, TransportError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn requests(&self) -> Vec<ChargeRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl GatewayTransport for ScriptedTransport {
    async fn send(&self, request: &ChargeRequest) -> Result<ChargeResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Connect("no scripted response".into())))
    }
}

pub fn accepted(reference: &str, return_url: Option<&str>) -> ChargeResponse {
    ChargeResponse {
        success: true,
        status_code: Some(200),
        status_description: "Operation done successfully".into(),
        cowpay_reference_id: Some(reference.to_string()),
        three_d_secured: return_url.is_some(),
        return_url: return_url.map(str::to_string),
        ..Default::default()
    }
}

pub fn test_config(hmac_secret: Option<&str>) -> AppConfig {
    AppConfig {
        host: "127.0.0.1".into(),
        port: 18_080,
        environment: "test".into(),
        log_level: "debug".into(),
        log_json: false,
        gateway: GatewayConfig {
            base_url: "https://staging.cowpay.me".into(),
            charge_path: "/api/v2/charge/card/init".into(),
            api_token: "test-token".into(),
            merchant_code: MERCHANT_CODE.into(),
            hash_key: HASH_KEY.into(),
            timeout_secs: 5,
            return_url: "https://shop.example.com/cowpay/otp-callback".into(),
            sandbox: true,
        },
        storefront: StorefrontConfig {
            thank_you_url: THANK_YOU_URL.into(),
            checkout_url: CHECKOUT_URL.into(),
            landing_url: LANDING_URL.into(),
        },
        webhook: WebhookConfig {
            hmac_secret: hmac_secret.map(str::to_string),
            tolerance_secs: 300,
        },
    }
}

/// Router wired to in-memory store, storefront and a scripted gateway.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub orders: Arc<InMemoryOrderStore>,
    pub storefront: Arc<InMemoryStorefront>,
    pub gateway: Arc<ScriptedTransport>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(test_config(None))
    }

    pub async fn with_webhook_secret() -> Self {
        Self::with_config(test_config(Some(WEBHOOK_SECRET)))
    }

    fn with_config(cfg: AppConfig) -> Self {
        let orders = Arc::new(InMemoryOrderStore::new());
        let storefront = Arc::new(InMemoryStorefront::new());
        let gateway = Arc::new(ScriptedTransport::default());

        let state = AppState::new(&cfg, orders.clone(), storefront.clone(), gateway.clone());
        let router = app_router(state.clone());

        Self {
            router,
            state,
            orders,
            storefront,
            gateway,
        }
    }

    pub async fn seed_order(&self, total: Decimal) -> Order {
        let order = Order::new(
            "1042",
            total,
            "EGP",
            BillingContact {
                name: "Mona Adel".into(),
                email: "mona@example.com".into(),
                phone: "01000000000".into(),
            },
        );
        self.orders
            .insert(order.clone())
            .await
            .expect("failed to seed order");
        order
    }

    pub async fn order(&self, id: Uuid) -> Order {
        self.orders
            .find_by_id(id)
            .await
            .expect("store error")
            .expect("order missing")
    }

    pub async fn status(&self, id: Uuid) -> PaymentStatus {
        self.order(id).await.status
    }

    pub async fn notices(&self, id: Uuid) -> Vec<String> {
        self.storefront.take_notices(id).await
    }

    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn post_raw(&self, uri: &str, payload: Vec<u8>, headers: &[(&str, String)]) -> Response {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, value.as_str());
        }

        let request = builder
            .body(Body::from(payload))
            .expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn pay(&self, order_id: Uuid, card_number: &str) -> Response {
        self.request(
            Method::POST,
            &format!("/api/v1/checkout/{}/pay", order_id),
            Some(json!({
                "card_number": card_number,
                "cvv": "123",
                "expiry_month": "12",
                "expiry_year": "30"
            })),
        )
        .await
    }
}

/// Signed server notification for `order`, which must already carry its gateway references.
pub fn notification_body(order: &Order, status: &str) -> Vec<u8> {
    let merchant_reference_id = order
        .payment
        .merchant_reference_id
        .clone()
        .expect("order has no merchant reference");
    let cowpay_reference_id = order
        .payment
        .cowpay_reference_id
        .clone()
        .unwrap_or_default();
    signed_notification(
        order.total,
        &merchant_reference_id,
        &order.customer_profile_id(),
        &cowpay_reference_id,
        status,
    )
}

/// Notification correctly signed over arbitrary charge fields.
pub fn signed_notification(
    amount: Decimal,
    merchant_reference_id: &str,
    profile: &str,
    cowpay_reference_id: &str,
    status: &str,
) -> Vec<u8> {
    let signature = compute_signature(
        amount,
        merchant_reference_id,
        profile,
        &GatewayCredentials::new(MERCHANT_CODE, HASH_KEY),
    );
    serde_json::to_vec(&json!({
        "amount": format_amount(amount),
        "merchant_reference_id": merchant_reference_id,
        "customer_merchant_profile_id": profile,
        "cowpay_reference_id": cowpay_reference_id,
        "payment_status": status,
        "signature": signature
    }))
    .expect("failed to serialize notification")
}

pub async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read body");
    serde_json::from_slice(&bytes).expect("body is not json")
}

pub async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read body");
    String::from_utf8(bytes.to_vec()).expect("body is not utf-8")
}

pub fn location(response: &Response) -> String {
    response
        .headers()
        .get("location")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}
