use axum::{extract::State, http::HeaderMap, http::StatusCode, response::IntoResponse};
use bytes::Bytes;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{info, instrument, warn};

use crate::errors::ServiceError;
use crate::models::payment::{
    string_or_number, ConfirmationEvent, EventSource, ReportedPaymentStatus, SignedCharge,
};
use crate::services::gateway_client::{constant_time_eq, verify_signature, GatewayCredentials};
use crate::services::reconciler::{ConfirmationReconciler, Reconciliation};
use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Server-to-server payment notification body
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerNotification {
    pub amount: Decimal,
    pub merchant_reference_id: String,
    pub customer_merchant_profile_id: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub cowpay_reference_id: Option<String>,
    pub payment_status: String,
    pub signature: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NotificationAck {
    Processed(Reconciliation),
    /// Conflicting report; the order was frozen for manual review
    Flagged,
}

/// Authoritative channel: the only path allowed to mark an order paid.
#[derive(Clone)]
pub struct NotificationWebhookHandler {
    reconciler: ConfirmationReconciler,
    credentials: GatewayCredentials,
    hmac_secret: Option<String>,
    tolerance_secs: u64,
}

impl NotificationWebhookHandler {
    pub fn new(reconciler: ConfirmationReconciler, credentials: GatewayCredentials) -> Self {
        Self {
            reconciler,
            credentials,
            hmac_secret: None,
            tolerance_secs: 300,
        }
    }

    /// Additionally require an `x-timestamp`/`x-signature` HMAC pair on every notification.
    pub fn with_hmac_secret(mut self, secret: impl Into<String>, tolerance_secs: u64) -> Self {
        self.hmac_secret = Some(secret.into());
        self.tolerance_secs = tolerance_secs;
        self
    }

    /// Verifies transport headers and the payload signature, then parses the notification.
    pub fn authenticate(
        &self,
        headers: &HeaderMap,
        payload: &[u8],
    ) -> Result<ServerNotification, ServiceError> {
        if let Some(secret) = &self.hmac_secret {
            if !verify_hmac_headers(headers, payload, secret, self.tolerance_secs) {
                warn!("notification HMAC verification failed");
                return Err(ServiceError::Unauthorized(
                    "invalid webhook signature".to_string(),
                ));
            }
        }

        let notification: ServerNotification = serde_json::from_slice(payload)
            .map_err(|e| ServiceError::BadRequest(format!("invalid notification: {}", e)))?;

        if !verify_signature(
            &notification.signature,
            notification.amount,
            &notification.merchant_reference_id,
            &notification.customer_merchant_profile_id,
            &self.credentials,
        ) {
            warn!(
                merchant_reference_id = %notification.merchant_reference_id,
                "notification signature mismatch"
            );
            return Err(ServiceError::Unauthorized(
                "invalid notification signature".to_string(),
            ));
        }

        Ok(notification)
    }

    #[instrument(skip_all)]
    pub async fn handle(
        &self,
        headers: &HeaderMap,
        payload: &[u8],
    ) -> Result<NotificationAck, ServiceError> {
        let notification = self.authenticate(headers, payload)?;

        let reference = notification
            .cowpay_reference_id
            .clone()
            .ok_or_else(|| ServiceError::BadRequest("missing cowpay_reference_id".to_string()))?;

        let event = ConfirmationEvent::new(
            EventSource::ServerWebhook,
            reference,
            ReportedPaymentStatus::parse(&notification.payment_status),
            serde_json::to_value(&notification)?,
        )
        .with_signed_charge(SignedCharge {
            merchant_reference_id: notification.merchant_reference_id.clone(),
            customer_profile_id: notification.customer_merchant_profile_id.clone(),
            amount: notification.amount,
        });

        match self.reconciler.apply(&event).await {
            Ok(reconciliation) => {
                info!(
                    order_id = %reconciliation.order_id,
                    status = %reconciliation.status,
                    changed = reconciliation.changed,
                    "notification processed"
                );
                Ok(NotificationAck::Processed(reconciliation))
            }
            Err(ServiceError::ConflictingStatus { order_id, .. }) => {
                warn!(%order_id, "notification acknowledged but order flagged");
                Ok(NotificationAck::Flagged)
            }
            Err(err) => Err(err),
        }
    }
}

// POST /cowpay/notifications
pub async fn cowpay_notification(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    let body = match state.notifications.handle(&headers, &body).await? {
        NotificationAck::Processed(_) => "ok",
        NotificationAck::Flagged => "flagged",
    };
    Ok((StatusCode::OK, body))
}

fn verify_hmac_headers(headers: &HeaderMap, payload: &[u8], secret: &str, tolerance_secs: u64) -> bool {
    let (Some(ts), Some(sig)) = (headers.get("x-timestamp"), headers.get("x-signature")) else {
        return false;
    };
    let (Ok(ts), Ok(sig)) = (ts.to_str(), sig.to_str()) else {
        return false;
    };
    let Ok(ts_i) = ts.parse::<i64>() else {
        return false;
    };
    let now = chrono::Utc::now().timestamp();
    if (now - ts_i).unsigned_abs() > tolerance_secs {
        return false;
    }

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(ts.as_bytes());
    mac.update(b".");
    mac.update(payload);
    let expected = hex::encode(mac.finalize().into_bytes());
    constant_time_eq(&expected, &sig.trim().to_ascii_lowercase())
}
