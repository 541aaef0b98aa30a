use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Payment status of an order as seen by the checkout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Created, no charge attempt has been confirmed yet
    Pending,
    /// Charge accepted by the gateway, buyer sent to the step-up (3DS) page
    AwaitingOtp,
    /// Browser reported success; waiting for the server notification
    AwaitingServerConfirmation,
    /// Confirmed by the server notification
    Paid,
    Failed,
    Cancelled,
}

impl PaymentStatus {
    /// Statuses from which an authoritative Paid notification may complete the order.
    pub const OPEN: [PaymentStatus; 3] = [
        PaymentStatus::Pending,
        PaymentStatus::AwaitingOtp,
        PaymentStatus::AwaitingServerConfirmation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::AwaitingOtp => "awaiting_otp",
            PaymentStatus::AwaitingServerConfirmation => "awaiting_server_confirmation",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BillingContact {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: String,
}

/// Gateway metadata persisted on the order.
///
/// `raw_request` is always stored redacted; card numbers and CVVs never reach the store.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PaymentMeta {
    pub merchant_reference_id: Option<String>,
    pub cowpay_reference_id: Option<String>,
    pub customer_profile_id: Option<String>,
    pub signature: Option<String>,
    pub raw_request: Option<serde_json::Value>,
    pub raw_response: Option<serde_json::Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderNote {
    pub created_at: DateTime<Utc>,
    pub message: String,
}

impl OrderNote {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            created_at: Utc::now(),
            message: message.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub status: PaymentStatus,
    pub total: Decimal,
    pub currency: String,
    pub customer_id: Option<Uuid>,
    pub billing: BillingContact,
    pub payment: PaymentMeta,
    /// Append-only audit trail
    pub notes: Vec<OrderNote>,
    /// Set when conflicting notifications froze the order; cleared only by an operator
    pub review_required: bool,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn new(
        order_number: impl Into<String>,
        total: Decimal,
        currency: impl Into<String>,
        billing: BillingContact,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_number: order_number.into(),
            status: PaymentStatus::Pending,
            total,
            currency: currency.into(),
            customer_id: None,
            billing,
            payment: PaymentMeta::default(),
            notes: Vec::new(),
            review_required: false,
            version: 1,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    pub fn with_customer(mut self, customer_id: Uuid) -> Self {
        self.customer_id = Some(customer_id);
        self
    }

    /// Processor-side identifier of the billing customer.
    ///
    /// Registered customers are keyed by their account id, guests by billing email.
    pub fn customer_profile_id(&self) -> String {
        match self.customer_id {
            Some(id) => id.to_string(),
            None => self.billing.email.trim().to_ascii_lowercase(),
        }
    }

    pub fn charge_description(&self) -> String {
        format!("Order #{}", self.order_number)
    }

    pub fn has_note_containing(&self, needle: &str) -> bool {
        self.notes.iter().any(|note| note.message.contains(needle))
    }
}
