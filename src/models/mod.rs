// Core models
pub mod order;
pub mod payment;

pub use order::{BillingContact, Order, OrderNote, PaymentMeta, PaymentStatus};
pub use payment::{
    CardSubmission, ChargeRequest, ChargeResponse, ConfirmationEvent, EventSource,
    ReportedPaymentStatus, SignedCharge,
};
