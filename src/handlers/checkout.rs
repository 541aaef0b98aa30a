use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::payment::CardSubmission;
use crate::services::storefront::{apply_effects, Effect, Outcome};
use crate::AppState;

/// Body returned to the checkout page script
#[derive(Debug, Serialize, Deserialize)]
pub struct CheckoutResponse {
    /// `success` or `failure`
    pub result: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
    #[serde(default)]
    pub messages: Vec<String>,
}

/// Outcome for a checkout attempt that ended in `err`: the form is re-presented
/// with one notice per buyer-facing message.
pub fn failure_outcome(order_id: Uuid, err: &ServiceError) -> Outcome {
    let outcome = Outcome {
        order_id: Some(order_id),
        ..Default::default()
    };
    err.buyer_notices()
        .into_iter()
        .fold(outcome, |outcome, notice| {
            outcome.with_effect(Effect::Notice(notice))
        })
}

// POST /api/v1/checkout/:order_id/pay
pub async fn submit_payment(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(card): Json<CardSubmission>,
) -> Result<Response, ServiceError> {
    match state.orchestrator.process_payment(order_id, &card).await {
        Ok(outcome) => {
            apply_effects(state.storefront.as_ref(), order_id, &outcome.effects).await;
            let redirect = outcome
                .redirect
                .as_ref()
                .map(|target| state.urls.resolve(target, outcome.order_number.as_deref()));
            Ok(Json(CheckoutResponse {
                result: "success".to_string(),
                redirect,
                messages: outcome.notices(),
            })
            .into_response())
        }
        Err(
            err @ (ServiceError::ValidationError(_)
            | ServiceError::GatewayRejected(_)
            | ServiceError::GatewayUnreachable(_)),
        ) => {
            warn!(%order_id, error = %err, "checkout attempt failed");
            let outcome = failure_outcome(order_id, &err);
            apply_effects(state.storefront.as_ref(), order_id, &outcome.effects).await;
            let body = CheckoutResponse {
                result: "failure".to_string(),
                redirect: None,
                messages: outcome.notices(),
            };
            Ok((failure_status(&err), Json(body)).into_response())
        }
        Err(err) => Err(err),
    }
}

fn failure_status(err: &ServiceError) -> StatusCode {
    match err {
        ServiceError::ValidationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
        other => other.status_code(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::RETRY_SAFE_NOTICE;

    #[test]
    fn rejection_becomes_one_notice_per_message() {
        let order_id = Uuid::new_v4();
        let outcome = failure_outcome(
            order_id,
            &ServiceError::GatewayRejected(vec!["a".into(), "b".into()]),
        );

        assert_eq!(outcome.redirect, None);
        assert_eq!(outcome.notices(), vec!["a".to_string(), "b".to_string()]);
        assert!(!outcome.clears_cart());
    }

    #[test]
    fn unreachable_gateway_shows_retry_safe_notice() {
        let outcome = failure_outcome(
            Uuid::new_v4(),
            &ServiceError::GatewayUnreachable("timed out".into()),
        );
        assert_eq!(outcome.notices(), vec![RETRY_SAFE_NOTICE.to_string()]);
    }
}
