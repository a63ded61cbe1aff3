use std::time::Duration;
use tracing::{info, warn};

use super::amount::to_minor_units;
use super::{Attempt, Outcome};
use crate::gateway::{ChargeRequest, GatewayClient, GatewayRegistry, GatewayResponse};

/// Literal the gateway sends in `ewayTrxnStatus` for an approved charge.
pub const APPROVED_STATUS: &str = "True";

/// Charges one attempt against its processor's gateway client. Never writes records.
pub struct PaymentProcessor {
    timeout: Duration,
}

impl PaymentProcessor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub async fn process(&self, registry: &GatewayRegistry, attempt: &Attempt) -> Outcome {
        let processor_id = attempt.subscription.processor_id;
        let Some(client) = registry.get(processor_id) else {
            warn!("No gateway client for processor {}", processor_id);
            return Outcome::failure(format!("No gateway client for processor {}", processor_id));
        };

        let amount_minor_units = match to_minor_units(attempt.transaction.total_amount) {
            Ok(amount) => amount,
            Err(e) => {
                warn!("Not charging transaction {}: {}", attempt.transaction.id, e);
                return Outcome::failure(e.to_string());
            }
        };

        let request = ChargeRequest {
            customer_token: attempt.subscription.processor_token.clone(),
            amount_minor_units,
            invoice_reference: attempt.transaction.invoice_id.clone(),
            invoice_description: attempt.transaction.source.clone().unwrap_or_default(),
        };

        self.charge(client.as_ref(), &request).await
    }

    /// Single gateway round trip under the configured timeout.
    pub async fn charge(&self, client: &dyn GatewayClient, request: &ChargeRequest) -> Outcome {
        match tokio::time::timeout(self.timeout, client.process_payment(request)).await {
            Err(_) => Outcome::failure(format!(
                "Gateway did not answer within {} seconds",
                self.timeout.as_secs()
            )),
            Ok(Err(e)) => Outcome::failure(e.to_string()),
            Ok(Ok(response)) => {
                let outcome = interpret(response);
                info!(
                    "Charge for invoice {} {}",
                    request.invoice_reference,
                    if outcome.success { "approved" } else { "declined" }
                );
                outcome
            }
        }
    }
}

pub fn interpret(response: GatewayResponse) -> Outcome {
    let approved = response
        .transaction_status
        .as_deref()
        .map(str::trim)
        == Some(APPROVED_STATUS);

    if approved {
        return Outcome::success(response.transaction_number);
    }

    let detail = response
        .fault
        .or(response.transaction_error)
        .unwrap_or_else(|| match response.transaction_status {
            Some(status) => format!("Transaction status {}", status),
            None => "No transaction status returned".to_string(),
        });
    Outcome::failure(detail)
}
