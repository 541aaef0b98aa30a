//! Cowpay checkout integration
//!
//! Request signing, charge orchestration and the payment confirmation state
//! machine for a shop taking card payments through the Cowpay gateway.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware_helpers;
pub mod models;
pub mod repositories;
pub mod services;
pub mod tracing;

use axum::{
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};
use tower_http::timeout::TimeoutLayer;

use crate::config::AppConfig;
use crate::handlers::{NotificationWebhookHandler, OtpCallbackHandler};
use crate::repositories::OrderStore;
use crate::services::gateway_client::{GatewayClient, GatewayCredentials, GatewayTransport};
use crate::services::storefront::{Storefront, StorefrontUrls};
use crate::services::{ChargeOrchestrator, ConfirmationReconciler};

/// Slack on top of the gateway timeout before the whole request is abandoned
const REQUEST_TIMEOUT_MARGIN: Duration = Duration::from_secs(5);

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub storefront: Arc<dyn Storefront>,
    pub orchestrator: ChargeOrchestrator,
    pub otp_callbacks: OtpCallbackHandler,
    pub notifications: NotificationWebhookHandler,
    pub urls: StorefrontUrls,
    pub request_timeout: Duration,
}

impl AppState {
    /// Wires the services around the given store, storefront and gateway transport.
    pub fn new(
        config: &AppConfig,
        orders: Arc<dyn OrderStore>,
        storefront: Arc<dyn Storefront>,
        transport: Arc<dyn GatewayTransport>,
    ) -> Self {
        let credentials = GatewayCredentials::new(
            config.gateway.merchant_code.clone(),
            config.gateway.hash_key.clone(),
        );
        let gateway = GatewayClient::new(
            transport,
            credentials.clone(),
            config.gateway.return_url.clone(),
        );
        let reconciler = ConfirmationReconciler::new(orders.clone());

        let mut notifications = NotificationWebhookHandler::new(reconciler.clone(), credentials);
        if let Some(secret) = &config.webhook.hmac_secret {
            notifications =
                notifications.with_hmac_secret(secret.clone(), config.webhook.tolerance_secs);
        }

        Self {
            orchestrator: ChargeOrchestrator::new(orders, gateway),
            otp_callbacks: OtpCallbackHandler::new(reconciler),
            notifications,
            urls: StorefrontUrls {
                thank_you_url: config.storefront.thank_you_url.clone(),
                checkout_url: config.storefront.checkout_url.clone(),
                landing_url: config.storefront.landing_url.clone(),
            },
            request_timeout: config.gateway.timeout() + REQUEST_TIMEOUT_MARGIN,
            storefront,
        }
    }
}

pub fn api_v1_routes() -> Router<AppState> {
    Router::new().route(
        "/checkout/:order_id/pay",
        post(handlers::checkout::submit_payment),
    )
}

/// Browser and processor facing gateway endpoints
pub fn cowpay_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/otp-callback",
            get(handlers::otp_callback::otp_callback),
        )
        .route("/otp-relay", post(handlers::otp_callback::otp_relay))
        .route(
            "/notifications",
            post(handlers::payment_webhooks::cowpay_notification),
        )
}

/// Full application router with tracing, timeout and request-id layers applied
pub fn app_router(state: AppState) -> Router {
    let request_timeout = state.request_timeout;
    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api_v1_routes())
        .nest("/cowpay", cowpay_routes())
        // HTTP tracing layer for consistent request/response telemetry
        .layer(crate::tracing::configure_http_tracing())
        .layer(TimeoutLayer::new(request_timeout))
        // Ensure every request carries a request id for traceability
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id::request_id_middleware,
        ))
        .with_state(state)
}

async fn health_check() -> Json<Value> {
    ::tracing::debug!("health check");
    Json(json!({
        "status": "healthy",
        "service": "cowpay-checkout",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
