//! Writes the result of a charge back to the transaction and its subscription.

use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use rebill_shared::{Subscription, SubscriptionStatus, TransactionRecord, TransactionStatus};

use super::frequency::next_due_date;
use super::{Attempt, Outcome};
use crate::services::{Clock, ReceiptNotifier};
use crate::stores::{StoreResult, SubscriptionStore, TransactionStore};

/// Records as saved by [`ScheduleAdvancer::apply`].
#[derive(Debug, Clone)]
pub struct Advancement {
    pub transaction: TransactionRecord,
    pub subscription: Subscription,
    /// All installments are done and the schedule was closed
    pub completed: bool,
}

pub struct ScheduleAdvancer {
    subscriptions: Arc<dyn SubscriptionStore>,
    transactions: Arc<dyn TransactionStore>,
    notifier: Arc<dyn ReceiptNotifier>,
    clock: Arc<dyn Clock>,
}

impl ScheduleAdvancer {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionStore>,
        transactions: Arc<dyn TransactionStore>,
        notifier: Arc<dyn ReceiptNotifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            subscriptions,
            transactions,
            notifier,
            clock,
        }
    }

    pub async fn apply(&self, attempt: Attempt, outcome: &Outcome) -> StoreResult<Advancement> {
        let Attempt {
            mut transaction,
            mut subscription,
            ..
        } = attempt;
        let now = self.clock.now();

        settle_transaction(&mut transaction, outcome, now);
        self.transactions.save(&transaction).await?;

        if outcome.success {
            if let Err(e) = self.notifier.send_receipt(transaction.id).await {
                warn!("Failed to send receipt for transaction {}: {}", transaction.id, e);
            }
        }

        let transaction_count = self.transactions.count_by_subscription(subscription.id).await?;
        let completed = advance_subscription(
            &mut subscription,
            outcome.success,
            self.clock.today(),
            now,
            transaction_count,
        );
        self.subscriptions.save(&subscription).await?;

        if completed {
            info!("Subscription {} completed all installments", subscription.id);
        }

        Ok(Advancement {
            transaction,
            subscription,
            completed,
        })
    }
}

pub fn settle_transaction(transaction: &mut TransactionRecord, outcome: &Outcome, now: DateTime<Utc>) {
    if outcome.success {
        transaction.status = TransactionStatus::Completed;
        transaction.trxn_id = outcome.gateway_transaction_id.clone();
    } else {
        transaction.status = TransactionStatus::Failed;
        transaction.receive_date = now;
    }
}

/// Moves the schedule on by one cycle from `today`; returns true when it is
/// closed because `transaction_count` reached the installment total.
pub fn advance_subscription(
    subscription: &mut Subscription,
    success: bool,
    today: NaiveDate,
    now: DateTime<Utc>,
    transaction_count: i64,
) -> bool {
    if !success {
        subscription.failure_count += 1;
    }

    subscription.status = SubscriptionStatus::InProgress;
    subscription.modified_date = Some(now);
    subscription.next_sched_date = Some(next_due_date(
        today,
        subscription.frequency_interval,
        subscription.frequency_unit,
    ));

    let all_installments_done = matches!(
        subscription.installments,
        Some(total) if total > 0 && transaction_count >= i64::from(total)
    );

    if all_installments_done {
        subscription.status = SubscriptionStatus::Completed;
        subscription.next_sched_date = None;
        subscription.end_date = Some(today);
    }

    all_installments_done
}
