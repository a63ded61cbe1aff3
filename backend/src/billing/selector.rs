//! Finds the attempts a run will charge.
//!
//! Pending subscriptions reuse the transaction created at signup; due
//! renewals get a fresh one from the materializer. Every attempt is covered
//! by a lease on its subscription, taken before anything is written. The
//! lease is only granted while the row is still pending or due, and the row
//! it returns replaces the one read by the candidate query, so a subscription
//! another run has already advanced is never charged twice.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use rebill_shared::{Subscription, SubscriptionStatus};

use super::{Attempt, AttemptKind, TransactionMaterializer};
use crate::gateway::GatewayRegistry;
use crate::services::Clock;
use crate::stores::{LeaseCondition, StoreResult, SubscriptionStore, TransactionStore};

/// Ownership of subscriptions while a run works on them, renewed per attempt.
#[derive(Debug, Clone, Copy)]
pub struct Lease {
    pub owner: Uuid,
    pub ttl: chrono::Duration,
}

pub struct DueItemSelector {
    subscriptions: Arc<dyn SubscriptionStore>,
    transactions: Arc<dyn TransactionStore>,
    materializer: TransactionMaterializer,
    clock: Arc<dyn Clock>,
    lease: Lease,
}

impl DueItemSelector {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionStore>,
        transactions: Arc<dyn TransactionStore>,
        clock: Arc<dyn Clock>,
        lease: Lease,
    ) -> Self {
        let materializer = TransactionMaterializer::new(transactions.clone(), clock.clone());
        Self {
            subscriptions,
            transactions,
            materializer,
            clock,
            lease,
        }
    }

    /// Pending subscriptions with their existing open transaction, ascending by id.
    pub async fn select_pending(&self, registry: &GatewayRegistry) -> StoreResult<Vec<Attempt>> {
        if registry.is_empty() {
            return Ok(Vec::new());
        }

        let mut candidates = self
            .subscriptions
            .find_by_status_and_processors(SubscriptionStatus::Pending, &registry.processor_ids())
            .await?;
        candidates.sort_by_key(|s| s.id);

        let mut attempts = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let Some(subscription) = self.acquire(candidate.id, LeaseCondition::Pending).await else {
                continue;
            };

            match self.transactions.find_open_by_subscription(subscription.id).await {
                Ok(Some(transaction)) => attempts.push(Attempt {
                    transaction,
                    subscription,
                    kind: AttemptKind::Pending,
                }),
                Ok(None) => {
                    warn!(
                        "Skipping pending subscription {}: no open transaction found",
                        subscription.id
                    );
                    self.release(subscription.id).await;
                }
                Err(e) => {
                    self.release(subscription.id).await;
                    self.release_all(&attempts).await;
                    return Err(e);
                }
            }
        }

        info!("Selected {} pending attempt(s)", attempts.len());
        Ok(attempts)
    }

    /// In-progress subscriptions due today or earlier, each with a newly created transaction.
    pub async fn select_scheduled(&self, registry: &GatewayRegistry) -> StoreResult<Vec<Attempt>> {
        if registry.is_empty() {
            return Ok(Vec::new());
        }

        let today = self.clock.today();
        let mut due = self
            .subscriptions
            .find_due(today, &registry.processor_ids())
            .await?;
        due.sort_by_key(|s| s.id);

        let mut attempts = Vec::with_capacity(due.len());
        for candidate in due {
            let Some(subscription) = self.acquire(candidate.id, LeaseCondition::DueBy(today)).await
            else {
                continue;
            };

            match self.materializer.materialize(&subscription).await {
                Ok(transaction) => attempts.push(Attempt {
                    transaction,
                    subscription,
                    kind: AttemptKind::Scheduled,
                }),
                Err(e) => {
                    error!(
                        "Failed to create transaction for subscription {}: {}",
                        subscription.id, e
                    );
                    self.release(subscription.id).await;
                }
            }
        }

        info!("Selected {} scheduled attempt(s)", attempts.len());
        Ok(attempts)
    }

    async fn acquire(&self, subscription_id: i64, condition: LeaseCondition) -> Option<Subscription> {
        let now = self.clock.now();
        match self
            .subscriptions
            .try_acquire_lease(subscription_id, self.lease.owner, self.expiry(now), now, condition)
            .await
        {
            Ok(Some(subscription)) => Some(subscription),
            Ok(None) => {
                warn!(
                    "Skipping subscription {}: held by another run or no longer due",
                    subscription_id
                );
                None
            }
            Err(e) => {
                warn!("Skipping subscription {}: could not take lease: {}", subscription_id, e);
                None
            }
        }
    }

    /// Extends the lease behind `attempt` for another full TTL.
    ///
    /// False when the lease was lost, i.e. it expired and another run took the
    /// subscription over or moved it on.
    pub async fn renew(&self, attempt: &Attempt) -> bool {
        let condition = match attempt.kind {
            AttemptKind::Pending => LeaseCondition::Pending,
            AttemptKind::Scheduled => LeaseCondition::DueBy(self.clock.today()),
        };
        let subscription_id = attempt.subscription.id;
        let now = self.clock.now();
        match self
            .subscriptions
            .try_acquire_lease(subscription_id, self.lease.owner, self.expiry(now), now, condition)
            .await
        {
            Ok(leased) => leased.is_some(),
            Err(e) => {
                warn!("Could not renew lease on subscription {}: {}", subscription_id, e);
                false
            }
        }
    }

    fn expiry(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.lease.ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub async fn release(&self, subscription_id: i64) {
        if let Err(e) = self.subscriptions.release_lease(subscription_id, self.lease.owner).await {
            warn!("Failed to release lease on subscription {}: {}", subscription_id, e);
        }
    }

    async fn release_all(&self, attempts: &[Attempt]) {
        for attempt in attempts {
            self.release(attempt.subscription.id).await;
        }
    }
}
