use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::order::PaymentStatus;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// JSON body returned for every failed request
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    pub error: String,
    /// Human-readable error description, safe to show to a buyer
    pub message: String,
    /// Individual messages when the failure carries several (gateway rejections)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// RFC 3339 timestamp when the error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Gateway rejected the charge: {}", .0.join(", "))]
    GatewayRejected(Vec<String>),

    #[error("Gateway unreachable: {0}")]
    GatewayUnreachable(String),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Invalid callback: {0}")]
    InvalidCallback(String),

    #[error("Conflicting status for order {order_id}: {current} cannot become {requested}")]
    ConflictingStatus {
        order_id: Uuid,
        current: PaymentStatus,
        requested: PaymentStatus,
    },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Notice shown to the buyer whenever the gateway could not be reached.
pub const RETRY_SAFE_NOTICE: &str =
    "We could not reach the payment processor. Your card was not charged; please try again.";

impl ServiceError {
    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ValidationError(_) | Self::InvalidCallback(_) | Self::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::GatewayRejected(_) => StatusCode::PAYMENT_REQUIRED,
            Self::GatewayUnreachable(_) => StatusCode::BAD_GATEWAY,
            Self::OrderNotFound(_) => StatusCode::NOT_FOUND,
            Self::ConflictingStatus { .. } | Self::InvalidOperation(_) => StatusCode::CONFLICT,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::SerializationError(_) | Self::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::SerializationError(_) | Self::InternalError(_) => {
                "Internal server error".to_string()
            }
            Self::GatewayUnreachable(_) => RETRY_SAFE_NOTICE.to_string(),
            Self::ConflictingStatus { .. } => "Order is under review".to_string(),
            _ => self.to_string(),
        }
    }

    /// Messages the buyer should see when this error ends a checkout attempt.
    pub fn buyer_notices(&self) -> Vec<String> {
        match self {
            Self::GatewayRejected(messages) => messages.clone(),
            Self::ValidationError(msg) => vec![msg.clone()],
            Self::GatewayUnreachable(_) | Self::SerializationError(_) | Self::InternalError(_) => {
                vec![RETRY_SAFE_NOTICE.to_string()]
            }
            other => vec![other.response_message()],
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let details = match &self {
            Self::GatewayRejected(messages) => messages.clone(),
            _ => Vec::new(),
        };

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            details,
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn service_error_response_includes_request_id() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("req-123"), async {
                ServiceError::OrderNotFound("missing".into()).into_response()
            })
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.request_id.as_deref(), Some("req-123"));
    }

    #[tokio::test]
    async fn gateway_rejection_lists_every_message() {
        let response = ServiceError::GatewayRejected(vec![
            "The card number is invalid".into(),
            "The cvv is invalid".into(),
        ])
        .into_response();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.details.len(), 2);
    }

    #[test]
    fn service_error_status_code_mapping() {
        assert_eq!(
            ServiceError::ValidationError("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::InvalidCallback("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::GatewayUnreachable("x".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ServiceError::Unauthorized("x".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ServiceError::ConflictingStatus {
                order_id: Uuid::nil(),
                current: PaymentStatus::Cancelled,
                requested: PaymentStatus::Paid,
            }
            .status_code(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn unreachable_and_internal_errors_share_the_retry_safe_notice() {
        assert_eq!(
            ServiceError::GatewayUnreachable("connect timeout".into()).buyer_notices(),
            vec![RETRY_SAFE_NOTICE.to_string()]
        );
        assert_eq!(
            ServiceError::InternalError("lock poisoned".into()).buyer_notices(),
            vec![RETRY_SAFE_NOTICE.to_string()]
        );
        assert_eq!(
            ServiceError::InternalError("lock poisoned".into()).response_message(),
            "Internal server error"
        );
    }
}
