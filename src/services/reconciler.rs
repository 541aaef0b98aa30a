use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::order::{Order, PaymentStatus};
use crate::models::payment::{ConfirmationEvent, EventSource, ReportedPaymentStatus};
use crate::repositories::order_repository::{OrderStore, StatusTransition};

/// What a confirmation event did to its order
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reconciliation {
    pub order_id: Uuid,
    pub order_number: String,
    /// Status after the event was applied
    pub status: PaymentStatus,
    pub changed: bool,
}

/// Owns the payment-status state machine.
///
/// Browser events can at most move an order to `AwaitingServerConfirmation`;
/// only a verified server notification can mark it `Paid`. Callers are
/// responsible for verifying server notifications before handing them over.
#[derive(Clone)]
pub struct ConfirmationReconciler {
    orders: Arc<dyn OrderStore>,
}

impl ConfirmationReconciler {
    pub fn new(orders: Arc<dyn OrderStore>) -> Self {
        Self { orders }
    }

    #[instrument(
        skip(self, event),
        fields(
            source = ?event.source,
            cowpay_reference_id = %event.cowpay_reference_id,
            payment_status = %event.payment_status,
        )
    )]
    pub async fn apply(&self, event: &ConfirmationEvent) -> Result<Reconciliation, ServiceError> {
        debug!(raw = %event.raw, "confirmation event received");
        let order = self
            .orders
            .find_by_cowpay_reference(&event.cowpay_reference_id)
            .await?
            .ok_or_else(|| ServiceError::OrderNotFound(event.cowpay_reference_id.clone()))?;

        if event.source == EventSource::ServerWebhook {
            self.check_binding(event, &order).await?;
        }

        self.orders.append_note(order.id, note_for(event)).await?;

        let transition = match (event.source, &event.payment_status) {
            (EventSource::Browser, ReportedPaymentStatus::Paid) => {
                warn!(
                    order_id = %order.id,
                    "browser reported payment; advisory only, waiting for server notification"
                );
                Some(
                    self.orders
                        .compare_and_set_status(
                            order.id,
                            &[PaymentStatus::Pending, PaymentStatus::AwaitingOtp],
                            PaymentStatus::AwaitingServerConfirmation,
                        )
                        .await?,
                )
            }
            (EventSource::ServerWebhook, ReportedPaymentStatus::Paid) => {
                let transition = self
                    .orders
                    .compare_and_set_status(order.id, &PaymentStatus::OPEN, PaymentStatus::Paid)
                    .await?;
                match transition {
                    StatusTransition::Rejected {
                        current: PaymentStatus::Paid,
                    } => {
                        info!(order_id = %order.id, "duplicate payment notification ignored");
                    }
                    StatusTransition::Rejected { current } => {
                        return Err(self.freeze(order.id, current).await?);
                    }
                    StatusTransition::Applied { .. } => {}
                }
                Some(transition)
            }
            // Only open orders fail; a Cancelled order keeps its status.
            (EventSource::ServerWebhook, ReportedPaymentStatus::Failed) => Some(
                self.orders
                    .compare_and_set_status(order.id, &PaymentStatus::OPEN, PaymentStatus::Failed)
                    .await?,
            ),
            // Browser Failed/Unpaid only changes what the buyer sees; server Unpaid is recorded, not acted on.
            _ => None,
        };

        let reconciliation = match transition {
            Some(StatusTransition::Applied { from, to }) => {
                info!(order_id = %order.id, %from, %to, "payment status updated");
                Reconciliation {
                    order_id: order.id,
                    order_number: order.order_number,
                    status: to,
                    changed: true,
                }
            }
            Some(StatusTransition::Rejected { current }) => Reconciliation {
                order_id: order.id,
                order_number: order.order_number,
                status: current,
                changed: false,
            },
            None => Reconciliation {
                order_id: order.id,
                order_number: order.order_number,
                status: order.status,
                changed: false,
            },
        };
        Ok(reconciliation)
    }

    /// A server notification must describe the charge recorded on the order its reference points at.
    async fn check_binding(&self, event: &ConfirmationEvent, order: &Order) -> Result<(), ServiceError> {
        let mismatch = match &event.signed {
            Some(signed) => signed.mismatch_with(order),
            None => Some("signature"),
        };
        let Some(field) = mismatch else {
            return Ok(());
        };

        warn!(
            order_id = %order.id,
            cowpay_reference_id = %event.cowpay_reference_id,
            field,
            "payment notification does not match the order's charge"
        );
        self.orders
            .append_note(
                order.id,
                format!(
                    "Payment notification {} rejected: {field} does not match this order",
                    event.payment_status
                ),
            )
            .await?;
        Err(ServiceError::Unauthorized(
            "notification does not match the order's charge".to_string(),
        ))
    }

    async fn freeze(
        &self,
        order_id: Uuid,
        current: PaymentStatus,
    ) -> Result<ServiceError, ServiceError> {
        error!(
            %order_id,
            %current,
            "processor reports payment for an order that cannot be paid; flagged for review"
        );
        self.orders.flag_for_review(order_id).await?;
        self.orders
            .append_note(
                order_id,
                format!("Payment reported while order is {current}; flagged for manual review"),
            )
            .await?;
        Ok(ServiceError::ConflictingStatus {
            order_id,
            current,
            requested: PaymentStatus::Paid,
        })
    }
}

fn note_for(event: &ConfirmationEvent) -> String {
    match event.source {
        EventSource::Browser => format!("OTP Status: {}", event.payment_status),
        EventSource::ServerWebhook => format!(
            "Payment notification: {} (Cowpay reference {})",
            event.payment_status, event.cowpay_reference_id
        ),
    }
}
