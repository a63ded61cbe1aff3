use axum::{routing::get, Router};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod billing;
mod config;
mod database;
mod error;
mod gateway;
mod handlers;
mod jobs;
mod services;
mod stores;

pub use error::{ApiError, ApiResult, AppError};


pub struct AppState {
    pub payments: Arc<jobs::RecurringPaymentJob>,
    pub executions: jobs::ExecutionLogs,
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(|| async { "Rebill Recurring Payments API v1.0.0" }))
        .route("/health", get(handlers::health_check))
        .nest("/api/v1/jobs", handlers::job_routes())
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::from_env()?;
    let db_pool = database::create_pool(&config.database_url).await?;

    database::migrate(&db_pool).await?;

    let notifier: Arc<dyn services::ReceiptNotifier> = match &config.receipt_webhook_url {
        Some(url) => {
            tracing::info!("Sending receipts to webhook {}", url);
            Arc::new(services::WebhookReceiptNotifier::new(
                url.clone(),
                config.billing.gateway_timeout(),
            )?)
        }
        None => Arc::new(services::LogReceiptNotifier),
    };

    let payments = Arc::new(jobs::RecurringPaymentJob::new(
        Arc::new(stores::PgProcessorConfigStore::new(db_pool.clone())),
        Arc::new(stores::PgSubscriptionStore::new(db_pool.clone())),
        Arc::new(stores::PgTransactionStore::new(db_pool.clone())),
        Arc::new(gateway::EwayClientFactory::new(config.billing.gateway_timeout())),
        notifier,
        Arc::new(services::SystemClock),
        config.billing.clone(),
    ));
    let executions = jobs::ExecutionLogs::default();

    let mut scheduler = jobs::JobScheduler::new(payments.clone(), executions.clone()).await?;
    if config.billing.scheduler_enabled {
        scheduler.start().await?;
    } else {
        tracing::info!("Recurring payment scheduler disabled");
    }

    let app_state = Arc::new(AppState {
        payments,
        executions,
    });

    let listener = tokio::net::TcpListener::bind(&config.server_addr).await?;
    tracing::info!("Server running on {}", config.server_addr);

    axum::serve(listener, app(app_state)).await?;

    scheduler.shutdown().await?;
    Ok(())
}
