use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use crate::errors::ServiceError;
use crate::models::order::{Order, PaymentMeta, PaymentStatus};
use crate::models::payment::{CardSubmission, ChargeRequest, ChargeResponse};
use crate::repositories::order_repository::OrderStore;
use crate::services::gateway_client::GatewayClient;
use crate::services::storefront::{Effect, Outcome, RedirectTarget};

/// Statuses from which a buyer may (re)submit card details
const CHARGEABLE: [PaymentStatus; 2] = [PaymentStatus::Pending, PaymentStatus::AwaitingOtp];

const MISSING_STEP_UP_URL: &str =
    "The card issuer requires verification but no verification page was provided";

/// Drives the synchronous checkout path: sign, charge, interpret, persist.
///
/// A successful charge never marks the order paid; that is left to the
/// server notification.
#[derive(Clone)]
pub struct ChargeOrchestrator {
    orders: Arc<dyn OrderStore>,
    gateway: GatewayClient,
}

impl ChargeOrchestrator {
    pub fn new(orders: Arc<dyn OrderStore>, gateway: GatewayClient) -> Self {
        Self { orders, gateway }
    }

    #[instrument(skip(self, card), fields(%order_id))]
    pub async fn process_payment(
        &self,
        order_id: Uuid,
        card: &CardSubmission,
    ) -> Result<Outcome, ServiceError> {
        let order = self
            .orders
            .find_by_id(order_id)
            .await?
            .ok_or_else(|| ServiceError::OrderNotFound(order_id.to_string()))?;

        if order.review_required || !CHARGEABLE.contains(&order.status) {
            return Err(ServiceError::InvalidOperation(format!(
                "order {} cannot be charged while {}",
                order.order_number,
                if order.review_required {
                    "under review"
                } else {
                    order.status.as_str()
                }
            )));
        }

        let merchant_reference_id = self
            .orders
            .assign_merchant_reference(order_id, Uuid::new_v4().simple().to_string())
            .await?;

        let request = self.build_request(&order, &merchant_reference_id, card);
        if let Err(errors) = request.validate() {
            let message = describe_invalid_fields(&errors);
            self.orders
                .append_note(order_id, format!("Error: {message}"))
                .await?;
            return Err(ServiceError::ValidationError(message));
        }

        let attempt = PaymentMeta {
            merchant_reference_id: Some(merchant_reference_id),
            customer_profile_id: Some(request.customer_profile_id.clone()),
            signature: Some(request.signature.clone()),
            raw_request: Some(request.redacted()),
            ..Default::default()
        };

        let response = match self.gateway.charge(&request).await {
            Ok(response) => response,
            Err(err) => {
                self.orders.save_payment_meta(order_id, attempt).await?;
                self.orders
                    .append_note(order_id, format!("Error: {err}"))
                    .await?;
                return Err(err.into());
            }
        };

        let messages = response.user_error_messages();
        if !messages.is_empty() {
            return Err(self.reject(order_id, attempt, messages).await?);
        }

        let step_up_url = response.step_up_url().map(str::to_string);
        if response.three_d_secured && step_up_url.is_none() {
            warn!("3DS response without a verification page");
            return Err(self
                .reject(order_id, attempt, vec![MISSING_STEP_UP_URL.to_string()])
                .await?);
        }

        self.record_success(order_id, attempt, &response).await?;

        let outcome = Outcome::default().for_order(order.id, order.order_number.clone());
        match step_up_url {
            Some(url) => {
                self.orders
                    .compare_and_set_status(
                        order_id,
                        &[PaymentStatus::Pending],
                        PaymentStatus::AwaitingOtp,
                    )
                    .await?;
                info!("charge requires 3DS step-up");
                Ok(Outcome {
                    redirect: Some(RedirectTarget::StepUp(url)),
                    ..outcome
                })
            }
            None => {
                info!("charge accepted; awaiting server notification");
                Ok(Outcome {
                    redirect: Some(RedirectTarget::ThankYou),
                    ..outcome
                }
                .with_effect(Effect::ClearCart))
            }
        }
    }

    fn build_request(
        &self,
        order: &Order,
        merchant_reference_id: &str,
        card: &CardSubmission,
    ) -> ChargeRequest {
        let card = card.normalized();
        let customer_profile_id = order.customer_profile_id();
        let signature = self
            .gateway
            .sign(order.total, merchant_reference_id, &customer_profile_id);

        ChargeRequest {
            amount: order.total,
            card_number: card.card_number,
            cvv: card.cvv,
            expiry_month: card.expiry_month,
            expiry_year: card.expiry_year,
            merchant_reference_id: merchant_reference_id.to_string(),
            customer_profile_id,
            signature,
            return_url: self.gateway.return_url().to_string(),
            description: order.charge_description(),
            customer_name: order.billing.name.trim().to_string(),
            customer_email: order.billing.email.trim().to_string(),
            customer_mobile: order.billing.phone.trim().to_string(),
        }
    }

    async fn reject(
        &self,
        order_id: Uuid,
        attempt: PaymentMeta,
        messages: Vec<String>,
    ) -> Result<ServiceError, ServiceError> {
        warn!(count = messages.len(), "charge rejected by gateway");
        self.orders.save_payment_meta(order_id, attempt).await?;
        self.orders
            .append_note(order_id, format!("Error: {}", messages.join(", ")))
            .await?;
        Ok(ServiceError::GatewayRejected(messages))
    }

    async fn record_success(
        &self,
        order_id: Uuid,
        attempt: PaymentMeta,
        response: &ChargeResponse,
    ) -> Result<(), ServiceError> {
        let meta = PaymentMeta {
            cowpay_reference_id: response.cowpay_reference_id.clone(),
            raw_response: Some(serde_json::to_value(response).unwrap_or(Value::Null)),
            ..attempt
        };
        self.orders.save_payment_meta(order_id, meta).await?;

        let description = response.status_description.trim();
        if !description.is_empty() {
            self.orders
                .append_note(order_id, description.to_string())
                .await?;
        }
        Ok(())
    }
}

fn describe_invalid_fields(errors: &ValidationErrors) -> String {
    let mut fields: Vec<&str> = errors
        .field_errors()
        .keys()
        .map(|field| match *field {
            "card_number" => "card number",
            "cvv" => "security code",
            "expiry_month" => "expiry month",
            "expiry_year" => "expiry year",
            "customer_email" => "billing email",
            "customer_name" => "billing name",
            "amount" => "order total",
            other => other,
        })
        .collect();
    fields.sort_unstable();
    fields.dedup();
    format!("Please check your payment details: {}", fields.join(", "))
}
