// Processor integration
pub mod gateway_client;

// Checkout and confirmation flow
pub mod charge_orchestrator;
pub mod reconciler;

// Hosting shop seam
pub mod storefront;

pub use charge_orchestrator::ChargeOrchestrator;
pub use gateway_client::{GatewayClient, GatewayCredentials, GatewayTransport, HttpTransport};
pub use reconciler::ConfirmationReconciler;
pub use storefront::{InMemoryStorefront, Storefront};
