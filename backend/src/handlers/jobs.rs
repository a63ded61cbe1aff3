//! Job invocation surface
//!
//! Triggers a recurring payment run on demand and lists recent executions.

use axum::{
    extract::{Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::jobs::{run_recorded, JobExecutionLog};
use crate::{ApiResult, AppState};

#[derive(Debug, Default, Deserialize)]
pub struct RunJobParams {
    pub domain_id: Option<i64>,
}

/// Success payload of a run: the ordered progress log.
#[derive(Debug, Serialize, Deserialize)]
pub struct RunJobResponse {
    pub is_error: i32,
    pub count: usize,
    pub values: Vec<String>,
}

pub fn job_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/recurring-payments", post(run_recurring_payments))
        .route("/executions", get(list_executions))
}

/// `domain_id` may come from the query string or a JSON body; the query wins.
async fn run_recurring_payments(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RunJobParams>,
    body: Option<Json<RunJobParams>>,
) -> ApiResult<Json<RunJobResponse>> {
    let domain_id = query
        .domain_id
        .or_else(|| body.and_then(|Json(params)| params.domain_id));

    let values = run_recorded(&state.payments, domain_id, &state.executions).await?;

    Ok(Json(RunJobResponse {
        is_error: 0,
        count: values.len(),
        values,
    }))
}

async fn list_executions(State(state): State<Arc<AppState>>) -> Json<Vec<JobExecutionLog>> {
    let mut logs = state.executions.snapshot().await;
    logs.reverse();
    Json(logs)
}
