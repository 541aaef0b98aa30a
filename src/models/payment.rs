use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};
use std::fmt;
use validator::{Validate, ValidationError};

use crate::models::order::Order;

/// Card fields posted by the checkout form.
#[derive(Clone, Deserialize)]
pub struct CardSubmission {
    pub card_number: String,
    pub cvv: String,
    pub expiry_month: String,
    pub expiry_year: String,
}

impl CardSubmission {
    /// Strips the grouping spaces and surrounding whitespace browsers leave in card inputs.
    pub fn normalized(&self) -> Self {
        Self {
            card_number: self.card_number.chars().filter(|c| !c.is_whitespace()).collect(),
            cvv: self.cvv.trim().to_string(),
            expiry_month: self.expiry_month.trim().to_string(),
            expiry_year: self.expiry_year.trim().to_string(),
        }
    }
}

impl fmt::Debug for CardSubmission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CardSubmission")
            .field("card_number", &mask_card_number(&self.card_number))
            .field("cvv", &"***")
            .field("expiry_month", &self.expiry_month)
            .field("expiry_year", &self.expiry_year)
            .finish()
    }
}

/// Outbound charge request, in the processor's wire format.
#[derive(Clone, Serialize, Validate)]
pub struct ChargeRequest {
    #[serde(serialize_with = "serialize_amount")]
    #[validate(custom = "validate_amount")]
    pub amount: Decimal,

    #[validate(custom = "validate_card_number")]
    pub card_number: String,
    #[validate(custom = "validate_cvv")]
    pub cvv: String,
    #[validate(custom = "validate_expiry_month")]
    pub expiry_month: String,
    #[validate(custom = "validate_expiry_year")]
    pub expiry_year: String,

    #[validate(length(min = 1, max = 64))]
    pub merchant_reference_id: String,
    #[serde(rename = "customer_merchant_profile_id")]
    #[validate(length(min = 1))]
    pub customer_profile_id: String,
    #[validate(length(equal = 64))]
    pub signature: String,
    #[validate(url)]
    pub return_url: String,
    pub description: String,

    #[validate(length(min = 1))]
    pub customer_name: String,
    #[validate(email)]
    pub customer_email: String,
    pub customer_mobile: String,
}

impl ChargeRequest {
    /// Form that may be persisted or logged: masked card number, no CVV.
    pub fn redacted(&self) -> Value {
        json!({
            "amount": format_amount(self.amount),
            "card_number": mask_card_number(&self.card_number),
            "expiry_month": self.expiry_month,
            "expiry_year": self.expiry_year,
            "merchant_reference_id": self.merchant_reference_id,
            "customer_merchant_profile_id": self.customer_profile_id,
            "signature": self.signature,
            "return_url": self.return_url,
            "description": self.description,
            "customer_name": self.customer_name,
            "customer_email": self.customer_email,
            "customer_mobile": self.customer_mobile,
        })
    }
}

impl fmt::Debug for ChargeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChargeRequest({})", self.redacted())
    }
}

/// Synchronous charge response.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChargeResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub status_description: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub cowpay_reference_id: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub merchant_reference_id: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub return_url: Option<String>,
    #[serde(default)]
    pub three_d_secured: bool,
    #[serde(default)]
    pub errors: Option<Value>,
}

impl ChargeResponse {
    /// Messages that should be shown to the buyer; empty means the charge was accepted.
    pub fn user_error_messages(&self) -> Vec<String> {
        let mut messages = Vec::new();
        if let Some(errors) = &self.errors {
            collect_messages(errors, &mut messages);
        }
        if messages.is_empty() && !self.success {
            let description = self.status_description.trim();
            messages.push(if description.is_empty() {
                "The payment was declined".to_string()
            } else {
                description.to_string()
            });
        }
        messages
    }

    /// Step-up page the buyer must visit, when the issuer requires 3DS.
    pub fn step_up_url(&self) -> Option<&str> {
        if !self.three_d_secured {
            return None;
        }
        self.return_url.as_deref().filter(|url| !url.trim().is_empty())
    }
}

fn collect_messages(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) if !s.trim().is_empty() => out.push(s.trim().to_string()),
        Value::Array(items) => items.iter().for_each(|item| collect_messages(item, out)),
        Value::Object(map) => map.values().for_each(|item| collect_messages(item, out)),
        _ => {}
    }
}

/// Which channel an event arrived on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    /// Redirect or cross-window message relayed by the buyer's browser; forgeable
    Browser,
    /// Signed server-to-server notification
    ServerWebhook,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReportedPaymentStatus {
    Paid,
    Failed,
    /// Reported by the processor as its own status; not collapsed into `Failed`
    Unpaid,
    Other(String),
}

impl ReportedPaymentStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PAID" => Self::Paid,
            "FAILED" => Self::Failed,
            "UNPAID" => Self::Unpaid,
            _ => Self::Other(raw.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Paid => "PAID",
            Self::Failed => "FAILED",
            Self::Unpaid => "UNPAID",
            Self::Other(raw) => raw,
        }
    }
}

impl fmt::Display for ReportedPaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Charge fields covered by a verified notification signature.
#[derive(Clone, Debug, PartialEq)]
pub struct SignedCharge {
    pub merchant_reference_id: String,
    pub customer_profile_id: String,
    pub amount: Decimal,
}

impl SignedCharge {
    /// Names the first signed field that disagrees with `order`.
    pub fn mismatch_with(&self, order: &Order) -> Option<&'static str> {
        if order.payment.merchant_reference_id.as_deref() != Some(self.merchant_reference_id.as_str()) {
            Some("merchant reference")
        } else if format_amount(self.amount) != format_amount(order.total) {
            Some("amount")
        } else if self.customer_profile_id != charged_profile_id(order) {
            Some("customer profile")
        } else {
            None
        }
    }
}

// Profile id the charge was signed with, falling back to the one it would be signed with now
fn charged_profile_id(order: &Order) -> String {
    order
        .payment
        .customer_profile_id
        .clone()
        .unwrap_or_else(|| order.customer_profile_id())
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConfirmationEvent {
    pub source: EventSource,
    pub cowpay_reference_id: String,
    pub payment_status: ReportedPaymentStatus,
    pub raw: Value,
    /// Present only for server notifications whose signature has been checked
    pub signed: Option<SignedCharge>,
}

impl ConfirmationEvent {
    pub fn new(
        source: EventSource,
        cowpay_reference_id: impl Into<String>,
        payment_status: ReportedPaymentStatus,
        raw: Value,
    ) -> Self {
        Self {
            source,
            cowpay_reference_id: cowpay_reference_id.into(),
            payment_status,
            raw,
            signed: None,
        }
    }

    pub fn with_signed_charge(mut self, signed: SignedCharge) -> Self {
        self.signed = Some(signed);
        self
    }
}

/// Two-decimal rendering used both on the wire and inside signatures.
pub fn format_amount(amount: Decimal) -> String {
    let mut rounded = amount.round_dp(2);
    rounded.rescale(2);
    rounded.to_string()
}

fn serialize_amount<S: Serializer>(amount: &Decimal, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_amount(*amount))
}

pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

pub fn mask_card_number(number: &str) -> String {
    let digits: Vec<char> = number.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() <= 4 {
        return "*".repeat(digits.len());
    }
    let last4: String = digits[digits.len() - 4..].iter().collect();
    format!("{}{}", "*".repeat(digits.len() - 4), last4)
}

fn luhn_valid(digits: &str) -> bool {
    let mut sum = 0u32;
    for (i, c) in digits.chars().rev().enumerate() {
        let Some(mut d) = c.to_digit(10) else {
            return false;
        };
        if i % 2 == 1 {
            d *= 2;
            if d > 9 {
                d -= 9;
            }
        }
        sum += d;
    }
    sum % 10 == 0
}

fn invalid(code: &'static str, message: &'static str) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(message.into());
    err
}

fn validate_amount(amount: &Decimal) -> Result<(), ValidationError> {
    if amount.is_sign_negative() || amount.is_zero() {
        return Err(invalid("amount", "Order total must be greater than zero"));
    }
    Ok(())
}

fn validate_card_number(number: &str) -> Result<(), ValidationError> {
    if !(12..=19).contains(&number.len()) || !number.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid("card_number", "Card number must be 12 to 19 digits"));
    }
    if !luhn_valid(number) {
        return Err(invalid("card_number", "Card number is not valid"));
    }
    Ok(())
}

fn validate_cvv(cvv: &str) -> Result<(), ValidationError> {
    if !(3..=4).contains(&cvv.len()) || !cvv.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid("cvv", "Card code must be 3 or 4 digits"));
    }
    Ok(())
}

fn validate_expiry_month(month: &str) -> Result<(), ValidationError> {
    match month.parse::<u8>() {
        Ok(1..=12) if month.len() == 2 => Ok(()),
        _ => Err(invalid("expiry_month", "Expiry month must be 01 to 12")),
    }
}

fn validate_expiry_year(year: &str) -> Result<(), ValidationError> {
    if year.len() != 2 || !year.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid("expiry_year", "Expiry year must be two digits"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request() -> ChargeRequest {
        ChargeRequest {
            amount: dec!(150),
            card_number: "4111111111111111".into(),
            cvv: "123".into(),
            expiry_month: "05".into(),
            expiry_year: "29".into(),
            merchant_reference_id: "cp-1042-abc".into(),
            customer_profile_id: "mona@example.com".into(),
            signature: "a".repeat(64),
            return_url: "https://shop.example/cowpay/otp-callback".into(),
            description: "Order #1042".into(),
            customer_name: "Mona Adel".into(),
            customer_email: "mona@example.com".into(),
            customer_mobile: "01000000000".into(),
        }
    }

    #[test]
    fn amount_is_serialized_with_two_decimals() {
        let body = serde_json::to_value(request()).unwrap();
        assert_eq!(body["amount"], "150.00");
        assert_eq!(body["customer_merchant_profile_id"], "mona@example.com");
    }

    #[test]
    fn redacted_request_never_contains_pan_or_cvv() {
        let redacted = request().redacted();
        let text = redacted.to_string();
        assert!(!text.contains("4111111111111111"));
        assert!(redacted.get("cvv").is_none());
        assert_eq!(redacted["card_number"], "************1111");
        assert!(!format!("{:?}", request()).contains("4111111111111111"));
    }

    #[test]
    fn valid_request_passes_validation() {
        assert!(request().validate().is_ok());
    }

    #[test]
    fn luhn_failure_is_rejected() {
        let mut req = request();
        req.card_number = "4111111111111112".into();
        let errors = req.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("card_number"));
    }

    #[test]
    fn malformed_expiry_and_cvv_are_rejected() {
        let mut req = request();
        req.expiry_month = "13".into();
        req.expiry_year = "2029".into();
        req.cvv = "12".into();
        let errors = req.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("expiry_month"));
        assert!(fields.contains_key("expiry_year"));
        assert!(fields.contains_key("cvv"));
    }

    #[test]
    fn card_submission_strips_spaces() {
        let card = CardSubmission {
            card_number: "4111 1111 1111 1111".into(),
            cvv: " 123 ".into(),
            expiry_month: "05".into(),
            expiry_year: "29".into(),
        }
        .normalized();
        assert_eq!(card.card_number, "4111111111111111");
        assert_eq!(card.cvv, "123");
    }

    #[test]
    fn response_accepts_numeric_reference_ids() {
        let response: ChargeResponse = serde_json::from_value(json!({
            "success": true,
            "status_code": 200,
            "status_description": "Operation done successfully",
            "cowpay_reference_id": 1000242,
            "merchant_reference_id": "cp-1042-abc",
            "three_d_secured": false
        }))
        .unwrap();
        assert_eq!(response.cowpay_reference_id.as_deref(), Some("1000242"));
        assert!(response.user_error_messages().is_empty());
    }

    #[test]
    fn field_errors_are_flattened_into_user_messages() {
        let response: ChargeResponse = serde_json::from_value(json!({
            "success": false,
            "status_code": 422,
            "status_description": "validation error",
            "errors": {
                "card_number": ["The card number is invalid"],
                "cvv": ["The cvv must be 3 digits", "The cvv is required"]
            }
        }))
        .unwrap();
        assert_eq!(response.user_error_messages().len(), 3);
    }

    #[test]
    fn unsuccessful_response_without_errors_uses_description() {
        let response = ChargeResponse {
            success: false,
            status_description: "Card declined".into(),
            ..Default::default()
        };
        assert_eq!(response.user_error_messages(), vec!["Card declined"]);
    }

    #[test]
    fn reported_status_parsing_keeps_unpaid_distinct() {
        assert_eq!(ReportedPaymentStatus::parse("paid"), ReportedPaymentStatus::Paid);
        assert_eq!(ReportedPaymentStatus::parse("FAILED"), ReportedPaymentStatus::Failed);
        assert_eq!(ReportedPaymentStatus::parse("UNPAID"), ReportedPaymentStatus::Unpaid);
        assert_eq!(
            ReportedPaymentStatus::parse("EXPIRED"),
            ReportedPaymentStatus::Other("EXPIRED".into())
        );
    }
}
