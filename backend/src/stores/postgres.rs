use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use rebill_shared::{
    NewTransactionRecord, ProcessorConfig, Subscription, SubscriptionStatus, TransactionRecord,
    TransactionStatus, EWAY_RECURRING_CLASS,
};

use super::{
    LeaseCondition, ProcessorConfigStore, StoreError, StoreResult, SubscriptionStore,
    TransactionStore,
};

const SUBSCRIPTION_COLUMNS: &str = r#"
    id, contact_id, amount, currency, frequency_interval, frequency_unit, status,
    failure_count, next_sched_date, installments, processor_id, processor_token,
    financial_type_id, start_date, end_date, modified_date
"#;

const TRANSACTION_COLUMNS: &str = r#"
    id, subscription_id, contact_id, total_amount, net_amount, currency, invoice_id,
    status, trxn_id, receive_date, financial_type_id, contribution_page_id,
    payment_instrument_id, source, address_id
"#;

pub struct PgProcessorConfigStore {
    pool: PgPool,
}

impl PgProcessorConfigStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProcessorConfigStore for PgProcessorConfigStore {
    async fn find_recurring_processors(&self, domain_id: Option<i64>) -> StoreResult<Vec<ProcessorConfig>> {
        let processors = sqlx::query_as::<_, ProcessorConfig>(
            r#"
            SELECT id, domain_id, name, class_name, url_recur, customer_id, user_name, password, is_active
            FROM payment_processors
            WHERE class_name = $1
                AND is_active = true
                AND ($2::BIGINT IS NULL OR domain_id = $2)
            ORDER BY id ASC
            "#,
        )
        .bind(EWAY_RECURRING_CLASS)
        .bind(domain_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(processors)
    }
}

pub struct PgSubscriptionStore {
    pool: PgPool,
}

impl PgSubscriptionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionStore for PgSubscriptionStore {
    async fn find_by_status_and_processors(
        &self,
        status: SubscriptionStatus,
        processor_ids: &[i64],
    ) -> StoreResult<Vec<Subscription>> {
        let sql = format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
             WHERE status = $1 AND processor_id = ANY($2)
             ORDER BY id ASC"
        );

        let subscriptions = sqlx::query_as::<_, Subscription>(&sql)
            .bind(status)
            .bind(processor_ids)
            .fetch_all(&self.pool)
            .await?;

        Ok(subscriptions)
    }

    async fn find_due(&self, today: NaiveDate, processor_ids: &[i64]) -> StoreResult<Vec<Subscription>> {
        let sql = format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
             WHERE status = $1 AND next_sched_date <= $2 AND processor_id = ANY($3)
             ORDER BY id ASC"
        );

        let subscriptions = sqlx::query_as::<_, Subscription>(&sql)
            .bind(SubscriptionStatus::InProgress)
            .bind(today)
            .bind(processor_ids)
            .fetch_all(&self.pool)
            .await?;

        Ok(subscriptions)
    }

    async fn save(&self, subscription: &Subscription) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = $2, failure_count = $3, next_sched_date = $4, end_date = $5, modified_date = $6
            WHERE id = $1
            "#,
        )
        .bind(subscription.id)
        .bind(subscription.status)
        .bind(subscription.failure_count)
        .bind(subscription.next_sched_date)
        .bind(subscription.end_date)
        .bind(subscription.modified_date)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { entity: "Subscription", id: subscription.id });
        }
        Ok(())
    }

    async fn try_acquire_lease(
        &self,
        subscription_id: i64,
        owner: Uuid,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
        condition: LeaseCondition,
    ) -> StoreResult<Option<Subscription>> {
        let sql = format!(
            "UPDATE subscriptions
             SET lease_owner = $2, lease_expires_at = $3
             WHERE id = $1
                 AND (lease_owner IS NULL OR lease_owner = $2 OR lease_expires_at < $4)
                 AND status = $5
                 AND ($6::DATE IS NULL OR next_sched_date <= $6)
             RETURNING {SUBSCRIPTION_COLUMNS}"
        );
        let leased = sqlx::query_as::<_, Subscription>(&sql)
            .bind(subscription_id)
            .bind(owner)
            .bind(expires_at)
            .bind(now)
            .bind(condition.status())
            .bind(condition.due_by())
            .fetch_optional(&self.pool)
            .await?;

        Ok(leased)
    }

    async fn release_lease(&self, subscription_id: i64, owner: Uuid) -> StoreResult<()> {
        sqlx::query(
            "UPDATE subscriptions SET lease_owner = NULL, lease_expires_at = NULL
             WHERE id = $1 AND lease_owner = $2",
        )
        .bind(subscription_id)
        .bind(owner)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

pub struct PgTransactionStore {
    pool: PgPool,
}

impl PgTransactionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionStore for PgTransactionStore {
    async fn find_by_subscription(&self, subscription_id: i64) -> StoreResult<Vec<TransactionRecord>> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE subscription_id = $1 ORDER BY id ASC"
        );

        let records = sqlx::query_as::<_, TransactionRecord>(&sql)
            .bind(subscription_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(records)
    }

    async fn find_open_by_subscription(&self, subscription_id: i64) -> StoreResult<Option<TransactionRecord>> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions
             WHERE subscription_id = $1 AND status = $2
             ORDER BY id ASC
             LIMIT 1"
        );

        let record = sqlx::query_as::<_, TransactionRecord>(&sql)
            .bind(subscription_id)
            .bind(TransactionStatus::Pending)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    async fn count_by_subscription(&self, subscription_id: i64) -> StoreResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM transactions WHERE subscription_id = $1",
        )
        .bind(subscription_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn insert(&self, record: NewTransactionRecord) -> StoreResult<TransactionRecord> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO transactions
            (subscription_id, contact_id, total_amount, net_amount, currency, invoice_id, status,
             receive_date, financial_type_id, contribution_page_id, payment_instrument_id, source, address_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING id
            "#,
        )
        .bind(record.subscription_id)
        .bind(record.contact_id)
        .bind(record.total_amount)
        .bind(record.net_amount)
        .bind(&record.currency)
        .bind(&record.invoice_id)
        .bind(record.status)
        .bind(record.receive_date)
        .bind(record.financial_type_id)
        .bind(record.contribution_page_id)
        .bind(record.payment_instrument_id)
        .bind(&record.source)
        .bind(record.address_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(format!("invoice id {} already exists", record.invoice_id))
            }
            _ => StoreError::Database(e),
        })?;

        Ok(record.into_record(id))
    }

    async fn save(&self, record: &TransactionRecord) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE transactions SET status = $2, trxn_id = $3, receive_date = $4 WHERE id = $1",
        )
        .bind(record.id)
        .bind(record.status)
        .bind(&record.trxn_id)
        .bind(record.receive_date)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { entity: "Transaction", id: record.id });
        }
        Ok(())
    }
}
