// Background Jobs Service
//
// The recurring payment job runs on a cron schedule via tokio-cron-scheduler
// and can also be triggered over HTTP.

pub mod recurring_payments;
pub mod scheduler;

pub use recurring_payments::{RecurringPaymentJob, RunError};
pub use scheduler::{
    run_recorded, ExecutionLogs, JobError, JobExecutionLog, JobScheduler, JobStatus,
    RECURRING_PAYMENTS_JOB,
};
