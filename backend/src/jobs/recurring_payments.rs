// Recurring Payments Job - charges new and due subscriptions through their eWAY processor

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::billing::{
    Attempt, DueItemSelector, Lease, Outcome, PaymentProcessor, ScheduleAdvancer,
};
use crate::config::BillingConfig;
use crate::gateway::registry::RegistryError;
use crate::gateway::{GatewayClientFactory, GatewayError, GatewayRegistry};
use crate::services::{Clock, ReceiptNotifier};
use crate::stores::{ProcessorConfigStore, StoreError, SubscriptionStore, TransactionStore};

/// Failures that stop a run before or during selection. Per-attempt problems never do.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Failed to load payment processors: {0}")]
    ProcessorLookup(#[source] StoreError),
    #[error("Failed to build gateway client: {0}")]
    ClientConstruction(#[source] GatewayError),
    #[error("Failed to select due subscriptions: {0}")]
    Selection(#[source] StoreError),
}

impl From<RegistryError> for RunError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Lookup(e) => Self::ProcessorLookup(e),
            RegistryError::Client { processor_id, source } => {
                error!("Gateway client for processor {} could not be built", processor_id);
                Self::ClientConstruction(source)
            }
        }
    }
}

pub struct RecurringPaymentJob {
    processors: Arc<dyn ProcessorConfigStore>,
    subscriptions: Arc<dyn SubscriptionStore>,
    transactions: Arc<dyn TransactionStore>,
    gateways: Arc<dyn GatewayClientFactory>,
    notifier: Arc<dyn ReceiptNotifier>,
    clock: Arc<dyn Clock>,
    config: BillingConfig,
}

/// Per-run collaborators, built once and shared by both batches.
struct RunContext {
    registry: GatewayRegistry,
    selector: DueItemSelector,
    processor: PaymentProcessor,
    advancer: ScheduleAdvancer,
}

impl RecurringPaymentJob {
    pub fn new(
        processors: Arc<dyn ProcessorConfigStore>,
        subscriptions: Arc<dyn SubscriptionStore>,
        transactions: Arc<dyn TransactionStore>,
        gateways: Arc<dyn GatewayClientFactory>,
        notifier: Arc<dyn ReceiptNotifier>,
        clock: Arc<dyn Clock>,
        config: BillingConfig,
    ) -> Self {
        Self {
            processors,
            subscriptions,
            transactions,
            gateways,
            notifier,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &BillingConfig {
        &self.config
    }

    /// Runs one full cycle and returns its progress log.
    ///
    /// `domain_id` falls back to the configured default scope.
    pub async fn run(&self, domain_id: Option<i64>) -> Result<Vec<String>, RunError> {
        let scope = domain_id.or(self.config.domain_id);
        let run_id = Uuid::new_v4();
        info!("Starting recurring payment run {} for domain {:?}", run_id, scope);

        let registry =
            GatewayRegistry::build(self.processors.as_ref(), self.gateways.as_ref(), scope).await?;

        let ctx = RunContext {
            registry,
            selector: DueItemSelector::new(
                self.subscriptions.clone(),
                self.transactions.clone(),
                self.clock.clone(),
                Lease {
                    owner: run_id,
                    ttl: self.config.lease_ttl(),
                },
            ),
            processor: PaymentProcessor::new(self.config.gateway_timeout()),
            advancer: ScheduleAdvancer::new(
                self.subscriptions.clone(),
                self.transactions.clone(),
                self.notifier.clone(),
                self.clock.clone(),
            ),
        };

        let mut log = Vec::new();

        let pending = ctx
            .selector
            .select_pending(&ctx.registry)
            .await
            .map_err(RunError::Selection)?;
        log.push(format!("Processing {} pending contributions", pending.len()));
        self.process_batch(&ctx, pending, &mut log).await;

        let scheduled = ctx
            .selector
            .select_scheduled(&ctx.registry)
            .await
            .map_err(RunError::Selection)?;
        log.push(format!("Processing {} scheduled contributions", scheduled.len()));
        self.process_batch(&ctx, scheduled, &mut log).await;

        info!("Recurring payment run {} finished", run_id);
        Ok(log)
    }

    // Gateway calls overlap up to `charge_concurrency`; results are applied one
    // at a time in selection order. Each lease is renewed right before its
    // charge and again before its records are written, so it only has to
    // outlast one charge plus the wait for earlier results.
    async fn process_batch(&self, ctx: &RunContext, attempts: Vec<Attempt>, log: &mut Vec<String>) {
        let concurrency = self.config.charge_concurrency.max(1);

        let mut charged = stream::iter(attempts)
            .map(|attempt| async move {
                if !ctx.selector.renew(&attempt).await {
                    return (attempt, None);
                }
                let outcome = ctx.processor.process(&ctx.registry, &attempt).await;
                (attempt, Some(outcome))
            })
            .buffered(concurrency);

        while let Some((attempt, outcome)) = charged.next().await {
            let subscription_id = attempt.subscription.id;
            let Some(outcome) = outcome else {
                warn!(
                    "Lease on subscription {} lost before charging transaction {}",
                    subscription_id, attempt.transaction.id
                );
                log.push(format!(
                    "Skipping {} contribution ID: {}: recurring contribution taken over by another run",
                    attempt.kind, attempt.transaction.id
                ));
                continue;
            };

            if !ctx.selector.renew(&attempt).await {
                // already charged, so the result is recorded regardless
                warn!(
                    "Lease on subscription {} lost after charging transaction {}",
                    subscription_id, attempt.transaction.id
                );
            }
            self.record_attempt(ctx, attempt, outcome, log).await;
            ctx.selector.release(subscription_id).await;
        }
    }

    async fn record_attempt(
        &self,
        ctx: &RunContext,
        attempt: Attempt,
        outcome: Outcome,
        log: &mut Vec<String>,
    ) {
        let kind = attempt.kind;
        let transaction_id = attempt.transaction.id;

        log.push(format!("Processing payment for {} contribution ID: {}", kind, transaction_id));

        if outcome.success {
            log.push(format!(
                "Successfully processed payment for {} contribution ID: {}",
                kind, transaction_id
            ));
            log.push("Marking contribution as complete".to_string());
        } else {
            let detail = outcome.error_detail.clone().unwrap_or_default();
            warn!(
                "Payment failed for {} transaction {}: {}",
                kind, transaction_id, detail
            );
            log.push(format!(
                "ERROR: failed to process payment for {} contribution ID: {}",
                kind, transaction_id
            ));
            log.push(format!("eWAY managed customer: {}", attempt.subscription.processor_token));
            log.push(format!("eWAY response: {}", detail));
            log.push("Marking contribution as failed".to_string());
        }

        log.push("Updating recurring contribution".to_string());
        match ctx.advancer.apply(attempt, &outcome).await {
            Ok(advancement) => {
                if advancement.completed {
                    log.push(format!(
                        "Recurring contribution ID: {} has completed all installments",
                        advancement.subscription.id
                    ));
                }
            }
            Err(e) => {
                error!("Failed to update records for transaction {}: {}", transaction_id, e);
                log.push(format!(
                    "ERROR: failed to update records for contribution ID: {}: {}",
                    transaction_id, e
                ));
            }
        }

        log.push(format!("Finished processing contribution ID: {}", transaction_id));
    }
}
