use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use rebill_shared::{NewTransactionRecord, Subscription, TransactionRecord, TransactionStatus};

use crate::services::Clock;
use crate::stores::{StoreError, StoreResult, TransactionStore};

const MAX_INVOICE_ATTEMPTS: usize = 3;

/// Creates the transaction record for a scheduled renewal.
pub struct TransactionMaterializer {
    transactions: Arc<dyn TransactionStore>,
    clock: Arc<dyn Clock>,
}

impl TransactionMaterializer {
    pub fn new(transactions: Arc<dyn TransactionStore>, clock: Arc<dyn Clock>) -> Self {
        Self { transactions, clock }
    }

    /// Persists a new pending transaction for `subscription`.
    ///
    /// Channel fields (page, payment instrument, source, address) come from the
    /// subscription's earliest transaction, so they reflect the original signup.
    pub async fn materialize(&self, subscription: &Subscription) -> StoreResult<TransactionRecord> {
        let history = self.transactions.find_by_subscription(subscription.id).await?;
        let first = history.first();

        let mut last_conflict = None;
        for _ in 0..MAX_INVOICE_ATTEMPTS {
            let record = NewTransactionRecord {
                subscription_id: subscription.id,
                contact_id: subscription.contact_id,
                total_amount: subscription.amount,
                net_amount: subscription.amount,
                currency: subscription.currency.clone(),
                invoice_id: new_invoice_reference(),
                status: TransactionStatus::Pending,
                receive_date: self.clock.now(),
                financial_type_id: subscription.financial_type_id,
                contribution_page_id: first.and_then(|t| t.contribution_page_id),
                payment_instrument_id: first.and_then(|t| t.payment_instrument_id),
                source: first.and_then(|t| t.source.clone()),
                address_id: first.and_then(|t| t.address_id),
            };

            match self.transactions.insert(record).await {
                Ok(created) => {
                    info!(
                        "Created transaction {} (invoice {}) for subscription {}",
                        created.id, created.invoice_id, subscription.id
                    );
                    return Ok(created);
                }
                Err(StoreError::Conflict(msg)) => {
                    warn!("Invoice reference collision for subscription {}: {}", subscription.id, msg);
                    last_conflict = Some(msg);
                }
                Err(e) => return Err(e),
            }
        }

        Err(StoreError::Conflict(last_conflict.unwrap_or_default()))
    }
}

/// 32 hex characters, unique per attempt.
pub fn new_invoice_reference() -> String {
    Uuid::new_v4().simple().to_string()
}
