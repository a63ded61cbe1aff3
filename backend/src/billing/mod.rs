//! Recurring billing cycle: pick what is due, charge it, move the schedule on.

pub mod advancer;
pub mod amount;
pub mod frequency;
pub mod materializer;
pub mod processor;
pub mod selector;

use std::fmt;

use rebill_shared::{Subscription, TransactionRecord};

pub use advancer::ScheduleAdvancer;
pub use materializer::TransactionMaterializer;
pub use processor::PaymentProcessor;
pub use selector::{DueItemSelector, Lease};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptKind {
    /// First charge of a newly created subscription
    Pending,
    /// Renewal that fell due
    Scheduled,
}

impl fmt::Display for AttemptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Scheduled => write!(f, "Scheduled"),
        }
    }
}

/// A subscription paired with the transaction to charge in this run.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub transaction: TransactionRecord,
    pub subscription: Subscription,
    pub kind: AttemptKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub success: bool,
    pub gateway_transaction_id: Option<String>,
    pub error_detail: Option<String>,
}

impl Outcome {
    pub fn success(gateway_transaction_id: Option<String>) -> Self {
        Self {
            success: true,
            gateway_transaction_id,
            error_detail: None,
        }
    }

    pub fn failure(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            gateway_transaction_id: None,
            error_detail: Some(detail.into()),
        }
    }
}
