//! Payment gateway access for recurring charges.

pub mod eway;
pub mod registry;

use async_trait::async_trait;
use std::sync::Arc;

use rebill_shared::ProcessorConfig;

pub use eway::{EwayClientFactory, EwayTokenClient};
pub use registry::GatewayRegistry;

/// Gateway errors
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Request failed: {0}")]
    Transport(String),
    #[error("Gateway did not answer within {0} seconds")]
    Timeout(u64),
    #[error("Invalid gateway response: {0}")]
    InvalidResponse(String),
    #[error("Client configuration error: {0}")]
    Configuration(String),
}

/// One token charge as sent to the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeRequest {
    /// Gateway-side managed customer id
    pub customer_token: String,
    pub amount_minor_units: i64,
    pub invoice_reference: String,
    pub invoice_description: String,
}

/// Raw fields read back from the gateway. Interpretation is left to the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewayResponse {
    pub transaction_status: Option<String>,
    pub transaction_number: Option<String>,
    pub transaction_error: Option<String>,
    pub fault: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GatewayClient: Send + Sync {
    async fn process_payment(&self, request: &ChargeRequest) -> Result<GatewayResponse, GatewayError>;
}

/// Builds a ready-to-call client for one processor. Must not touch the network.
pub trait GatewayClientFactory: Send + Sync {
    fn build(&self, config: &ProcessorConfig) -> Result<Arc<dyn GatewayClient>, GatewayError>;
}
