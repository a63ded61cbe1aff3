//! Repository interfaces for the records the billing job reads and updates.
//!
//! Each query the job needs is a typed method; nothing here builds filters
//! from strings.

pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use rebill_shared::{
    NewTransactionRecord, ProcessorConfig, Subscription, SubscriptionStatus, TransactionRecord,
};

pub use postgres::{PgProcessorConfigStore, PgSubscriptionStore, PgTransactionStore};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// State a subscription must still be in for a lease on it to be granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseCondition {
    /// Waiting for its first charge
    Pending,
    /// In progress with `next_sched_date` on or before the given day
    DueBy(NaiveDate),
}

impl LeaseCondition {
    pub fn status(self) -> SubscriptionStatus {
        match self {
            Self::Pending => SubscriptionStatus::Pending,
            Self::DueBy(_) => SubscriptionStatus::InProgress,
        }
    }

    pub fn due_by(self) -> Option<NaiveDate> {
        match self {
            Self::Pending => None,
            Self::DueBy(day) => Some(day),
        }
    }
}

#[async_trait]
pub trait ProcessorConfigStore: Send + Sync {
    /// Active eWAY recurring processors, optionally restricted to one domain.
    async fn find_recurring_processors(&self, domain_id: Option<i64>) -> StoreResult<Vec<ProcessorConfig>>;
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Subscriptions in `status` whose processor is one of `processor_ids`, ascending by id.
    async fn find_by_status_and_processors(
        &self,
        status: SubscriptionStatus,
        processor_ids: &[i64],
    ) -> StoreResult<Vec<Subscription>>;

    /// In-progress subscriptions with `next_sched_date <= today`, ascending by id.
    async fn find_due(&self, today: NaiveDate, processor_ids: &[i64]) -> StoreResult<Vec<Subscription>>;

    /// Persists status, failure_count, next_sched_date, end_date and modified_date.
    async fn save(&self, subscription: &Subscription) -> StoreResult<()>;

    /// Takes or extends the processing lease for `owner`.
    ///
    /// Granted only when no other owner holds an unexpired lease and the row
    /// still matches `condition`, in a single conditional write. Returns the
    /// row as stored at that moment, or `None` when the lease was refused.
    async fn try_acquire_lease(
        &self,
        subscription_id: i64,
        owner: Uuid,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
        condition: LeaseCondition,
    ) -> StoreResult<Option<Subscription>>;

    async fn release_lease(&self, subscription_id: i64, owner: Uuid) -> StoreResult<()>;
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// All transactions of a subscription, oldest first.
    async fn find_by_subscription(&self, subscription_id: i64) -> StoreResult<Vec<TransactionRecord>>;

    /// The oldest still-pending transaction of a subscription.
    async fn find_open_by_subscription(&self, subscription_id: i64) -> StoreResult<Option<TransactionRecord>>;

    async fn count_by_subscription(&self, subscription_id: i64) -> StoreResult<i64>;

    /// Fails with `StoreError::Conflict` when the invoice id is already taken.
    async fn insert(&self, record: NewTransactionRecord) -> StoreResult<TransactionRecord>;

    /// Persists status, trxn_id and receive_date.
    async fn save(&self, record: &TransactionRecord) -> StoreResult<()>;
}
