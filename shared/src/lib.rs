use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Processor class handled by the recurring payment job.
pub const EWAY_RECURRING_CLASS: &str = "Payment_Ewayrecurring";

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "subscription_status", rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::InProgress => write!(f, "In Progress"),
            Self::Completed => write!(f, "Completed"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "transaction_status", rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Completed => write!(f, "Completed"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "frequency_unit", rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrequencyUnit {
    Day,
    Week,
    Month,
    Year,
}

impl fmt::Display for FrequencyUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Day => write!(f, "day"),
            Self::Week => write!(f, "week"),
            Self::Month => write!(f, "month"),
            Self::Year => write!(f, "year"),
        }
    }
}

/// A configured payment gateway instance.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    pub id: i64,
    pub domain_id: i64,
    pub name: String,
    pub class_name: String,
    pub url_recur: String,
    pub customer_id: String, // eWAY customer id
    pub user_name: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub is_active: bool,
}

/// A recurring billing schedule for one contact and payment token.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: i64,
    pub contact_id: i64,
    pub amount: Decimal,
    pub currency: String,
    pub frequency_interval: i32,
    pub frequency_unit: FrequencyUnit,
    pub status: SubscriptionStatus,
    pub failure_count: i32,
    pub next_sched_date: Option<NaiveDate>,
    pub installments: Option<i32>, // None = unlimited
    pub processor_id: i64,
    pub processor_token: String,
    pub financial_type_id: Option<i64>,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub modified_date: Option<DateTime<Utc>>,
}

/// One billing attempt belonging to a subscription.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: i64,
    pub subscription_id: i64,
    pub contact_id: i64,
    pub total_amount: Decimal,
    pub net_amount: Decimal,
    pub currency: String,
    pub invoice_id: String,
    pub status: TransactionStatus,
    pub trxn_id: Option<String>,
    pub receive_date: DateTime<Utc>,
    pub financial_type_id: Option<i64>,
    pub contribution_page_id: Option<i64>,
    pub payment_instrument_id: Option<i64>,
    pub source: Option<String>,
    pub address_id: Option<i64>,
}

/// Insert payload for a transaction; the store assigns the id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTransactionRecord {
    pub subscription_id: i64,
    pub contact_id: i64,
    pub total_amount: Decimal,
    pub net_amount: Decimal,
    pub currency: String,
    pub invoice_id: String,
    pub status: TransactionStatus,
    pub receive_date: DateTime<Utc>,
    pub financial_type_id: Option<i64>,
    pub contribution_page_id: Option<i64>,
    pub payment_instrument_id: Option<i64>,
    pub source: Option<String>,
    pub address_id: Option<i64>,
}

impl NewTransactionRecord {
    pub fn into_record(self, id: i64) -> TransactionRecord {
        TransactionRecord {
            id,
            subscription_id: self.subscription_id,
            contact_id: self.contact_id,
            total_amount: self.total_amount,
            net_amount: self.net_amount,
            currency: self.currency,
            invoice_id: self.invoice_id,
            status: self.status,
            trxn_id: None,
            receive_date: self.receive_date,
            financial_type_id: self.financial_type_id,
            contribution_page_id: self.contribution_page_id,
            payment_instrument_id: self.payment_instrument_id,
            source: self.source,
            address_id: self.address_id,
        }
    }
}
