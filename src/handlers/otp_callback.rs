use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::errors::ServiceError;
use crate::models::payment::{string_or_number, ConfirmationEvent, EventSource, ReportedPaymentStatus};
use crate::services::reconciler::ConfirmationReconciler;
use crate::services::storefront::{apply_effects, Effect, Outcome, RedirectTarget};
use crate::AppState;

const STATUS_UPDATE_CALLBACK: &str = "order_status_update";
const MESSAGE_SOURCE: &str = "cowpay";
pub const OTP_FAILED_NOTICE: &str = "Your OTP has failed";

/// Parameters the processor appends to the browser redirect after the OTP page.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    pub callback_type: Option<String>,
    #[serde(default)]
    pub cowpay_reference_id: Option<String>,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub payment_gateway_reference_id: Option<String>,
}

/// Cross-window message posted by the processor's OTP frame and relayed by the checkout page.
#[derive(Clone, Debug, Deserialize)]
pub struct RelayMessage {
    #[serde(default)]
    pub message_source: Option<String>,
    #[serde(default)]
    pub message_type: Option<String>,
    #[serde(default)]
    pub callback_type: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub cowpay_reference_id: Option<String>,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub payment_gateway_reference_id: Option<String>,
}

impl From<RelayMessage> for CallbackParams {
    fn from(message: RelayMessage) -> Self {
        Self {
            callback_type: message.callback_type,
            cowpay_reference_id: message.cowpay_reference_id,
            payment_status: message.payment_status,
            payment_gateway_reference_id: message.payment_gateway_reference_id,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RelayResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Advisory browser channel.
///
/// Nothing arriving here is signed: a buyer can forge any of it. It is used
/// to route the buyer and to annotate the order, never to complete payment.
#[derive(Clone)]
pub struct OtpCallbackHandler {
    reconciler: ConfirmationReconciler,
}

impl OtpCallbackHandler {
    pub fn new(reconciler: ConfirmationReconciler) -> Self {
        Self { reconciler }
    }

    #[instrument(skip_all, fields(cowpay_reference_id = params.cowpay_reference_id.as_deref().unwrap_or("")))]
    pub async fn handle(&self, params: &CallbackParams) -> Result<Outcome, ServiceError> {
        if params.callback_type.as_deref() != Some(STATUS_UPDATE_CALLBACK) {
            return Err(ServiceError::InvalidCallback(
                "unsupported callback_type".to_string(),
            ));
        }
        let reference = params
            .cowpay_reference_id
            .as_deref()
            .map(str::trim)
            .filter(|reference| !reference.is_empty())
            .ok_or_else(|| {
                ServiceError::InvalidCallback("missing cowpay_reference_id".to_string())
            })?;

        let status = ReportedPaymentStatus::parse(params.payment_status.as_deref().unwrap_or(""));
        warn!(%status, "untrusted browser callback; treated as advisory");

        let event = ConfirmationEvent::new(
            EventSource::Browser,
            reference,
            status.clone(),
            serde_json::to_value(params)?,
        );

        let reconciliation = match self.reconciler.apply(&event).await {
            Ok(reconciliation) => reconciliation,
            Err(ServiceError::OrderNotFound(_)) => {
                info!("callback for unknown reference; sending buyer to landing page");
                return Ok(Outcome::redirect(RedirectTarget::Landing));
            }
            Err(err) => return Err(err),
        };

        let outcome = match status {
            ReportedPaymentStatus::Paid => {
                Outcome::redirect(RedirectTarget::ThankYou).with_effect(Effect::ClearCart)
            }
            ReportedPaymentStatus::Failed | ReportedPaymentStatus::Unpaid => {
                Outcome::redirect(RedirectTarget::Checkout)
                    .with_effect(Effect::Notice(OTP_FAILED_NOTICE.to_string()))
            }
            ReportedPaymentStatus::Other(_) => Outcome::redirect(RedirectTarget::Landing),
        };
        Ok(outcome.for_order(reconciliation.order_id, reconciliation.order_number))
    }
}

async fn resolve(state: &AppState, outcome: &Outcome) -> String {
    if let Some(order_id) = outcome.order_id {
        apply_effects(state.storefront.as_ref(), order_id, &outcome.effects).await;
    }
    let target = outcome.redirect.as_ref().unwrap_or(&RedirectTarget::Landing);
    state
        .urls
        .resolve(target, outcome.order_number.as_deref())
}

// GET /cowpay/otp-callback
pub async fn otp_callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Result<Redirect, ServiceError> {
    let outcome = state.otp_callbacks.handle(&params).await?;
    Ok(Redirect::to(&resolve(&state, &outcome).await))
}

// POST /cowpay/otp-relay
pub async fn otp_relay(
    State(state): State<AppState>,
    Json(message): Json<RelayMessage>,
) -> Response {
    if message.message_source.as_deref() != Some(MESSAGE_SOURCE) {
        info!(
            message_type = message.message_type.as_deref().unwrap_or(""),
            "ignoring relayed message from another source"
        );
        let body = RelayResponse {
            redirect: None,
            message: Some("Message ignored".to_string()),
        };
        return (StatusCode::ACCEPTED, Json(body)).into_response();
    }

    match state.otp_callbacks.handle(&message.into()).await {
        Ok(outcome) => {
            let redirect = resolve(&state, &outcome).await;
            Json(RelayResponse {
                redirect: Some(redirect),
                message: None,
            })
            .into_response()
        }
        Err(err) => {
            let body = RelayResponse {
                redirect: None,
                message: Some(err.response_message()),
            };
            (err.status_code(), Json(body)).into_response()
        }
    }
}
