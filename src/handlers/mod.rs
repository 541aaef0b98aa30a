// Checkout submission
pub mod checkout;

// Advisory browser channel
pub mod otp_callback;

// Authoritative server channel
pub mod payment_webhooks;

pub use otp_callback::OtpCallbackHandler;
pub use payment_webhooks::NotificationWebhookHandler;
