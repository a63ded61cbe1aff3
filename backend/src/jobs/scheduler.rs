// Job Scheduler - runs the recurring payment job on its cron schedule

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler as TokioScheduler, JobSchedulerError};
use tracing::{error, info};
use uuid::Uuid;

use super::recurring_payments::{RecurringPaymentJob, RunError};

pub const RECURRING_PAYMENTS_JOB: &str = "recurring_payments";

const MAX_EXECUTION_LOGS: usize = 100;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Scheduler error: {0}")]
    SchedulerError(#[from] JobSchedulerError),
    #[error("Unknown job: {0}")]
    NotFound(String),
    #[error("Job execution error: {0}")]
    Run(#[from] RunError),
}

pub type JobResult<T> = Result<T, JobError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecutionLog {
    pub id: Uuid,
    pub job_name: String,
    pub domain_id: Option<i64>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub items_processed: i32,
    pub errors: Vec<String>,
    pub duration_ms: Option<i64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
    PartialFailure,
}

/// Recent executions, newest last, shared by the scheduler and the HTTP surface.
#[derive(Clone, Default)]
pub struct ExecutionLogs(Arc<RwLock<Vec<JobExecutionLog>>>);

impl ExecutionLogs {
    pub async fn push(&self, log: JobExecutionLog) {
        let mut logs = self.0.write().await;
        logs.push(log);
        if logs.len() > MAX_EXECUTION_LOGS {
            logs.remove(0);
        }
    }

    pub async fn snapshot(&self) -> Vec<JobExecutionLog> {
        self.0.read().await.clone()
    }
}

/// Runs the job once and records the execution whatever the result.
pub async fn run_recorded(
    job: &RecurringPaymentJob,
    domain_id: Option<i64>,
    logs: &ExecutionLogs,
) -> Result<Vec<String>, RunError> {
    let log_id = Uuid::new_v4();
    let started_at = Utc::now();

    let result = job.run(domain_id).await;

    let completed_at = Utc::now();
    let duration = (completed_at - started_at).num_milliseconds();

    let (status, items_processed, errors) = match &result {
        Ok(lines) => {
            let errors: Vec<String> = lines
                .iter()
                .filter(|line| line.starts_with("ERROR:"))
                .cloned()
                .collect();
            let processed = lines
                .iter()
                .filter(|line| line.starts_with("Finished processing contribution ID:"))
                .count() as i32;
            let status = if errors.is_empty() {
                JobStatus::Completed
            } else {
                JobStatus::PartialFailure
            };
            (status, processed, errors)
        }
        Err(e) => (JobStatus::Failed, 0, vec![e.to_string()]),
    };

    logs.push(JobExecutionLog {
        id: log_id,
        job_name: "Recurring Payments".to_string(),
        domain_id: domain_id.or(job.config().domain_id),
        started_at,
        completed_at: Some(completed_at),
        status,
        items_processed,
        errors,
        duration_ms: Some(duration),
    })
    .await;

    result
}

pub struct JobScheduler {
    scheduler: TokioScheduler,
    job: Arc<RecurringPaymentJob>,
    execution_logs: ExecutionLogs,
}

impl JobScheduler {
    pub async fn new(job: Arc<RecurringPaymentJob>, execution_logs: ExecutionLogs) -> JobResult<Self> {
        let scheduler = TokioScheduler::new().await?;

        Ok(Self {
            scheduler,
            job,
            execution_logs,
        })
    }

    pub async fn start(&self) -> JobResult<()> {
        info!("Starting background job scheduler");

        self.schedule_recurring_payments().await?;
        self.scheduler.start().await?;

        info!("Background job scheduler started successfully");
        Ok(())
    }

    pub async fn shutdown(&mut self) -> JobResult<()> {
        info!("Shutting down background job scheduler");
        self.scheduler.shutdown().await?;
        Ok(())
    }

    async fn schedule_recurring_payments(&self) -> JobResult<()> {
        let cron_expr = self.job.config().cron.clone();

        let job = self.job.clone();
        let logs = self.execution_logs.clone();

        let cron_job = Job::new_async(cron_expr.as_str(), move |_uuid, _lock| {
            let job = job.clone();
            let logs = logs.clone();

            Box::pin(async move {
                info!("Running recurring payments job");

                match run_recorded(&job, None, &logs).await {
                    Ok(lines) => {
                        info!("Recurring payments completed: {} log lines", lines.len());
                    }
                    Err(e) => {
                        error!("Recurring payments failed: {}", e);
                    }
                }
            })
        })?;

        self.scheduler.add(cron_job).await?;
        info!("Scheduled recurring payments with cron '{}'", cron_expr);

        Ok(())
    }

    pub async fn get_execution_logs(&self) -> Vec<JobExecutionLog> {
        self.execution_logs.snapshot().await
    }

    pub async fn run_job_now(&self, job_name: &str) -> JobResult<Vec<String>> {
        match job_name {
            RECURRING_PAYMENTS_JOB => Ok(run_recorded(&self.job, None, &self.execution_logs).await?),
            _ => Err(JobError::NotFound(job_name.to_string())),
        }
    }
}
