//! Receipt delivery after a successful charge.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ReceiptError {
    #[error("Request failed: {0}")]
    RequestFailed(String),
    #[error("Webhook failed: {0}")]
    WebhookFailed(String),
}

#[async_trait]
pub trait ReceiptNotifier: Send + Sync {
    async fn send_receipt(&self, transaction_id: i64) -> Result<(), ReceiptError>;
}

/// Records the receipt request in the service log only.
#[derive(Debug, Default)]
pub struct LogReceiptNotifier;

#[async_trait]
impl ReceiptNotifier for LogReceiptNotifier {
    async fn send_receipt(&self, transaction_id: i64) -> Result<(), ReceiptError> {
        tracing::info!("Receipt requested for transaction {}", transaction_id);
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct ReceiptPayload {
    transaction_id: i64,
}

/// Posts `{"transaction_id": id}` to the configured receipt webhook.
pub struct WebhookReceiptNotifier {
    client: reqwest::Client,
    webhook_url: String,
}

impl WebhookReceiptNotifier {
    pub fn new(webhook_url: impl Into<String>, timeout: Duration) -> Result<Self, ReceiptError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ReceiptError::RequestFailed(e.to_string()))?;

        Ok(Self {
            client,
            webhook_url: webhook_url.into(),
        })
    }
}

#[async_trait]
impl ReceiptNotifier for WebhookReceiptNotifier {
    async fn send_receipt(&self, transaction_id: i64) -> Result<(), ReceiptError> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&ReceiptPayload { transaction_id })
            .send()
            .await
            .map_err(|e| ReceiptError::RequestFailed(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ReceiptError::WebhookFailed(format!(
                "Status: {}, Body: {}",
                status, body
            )))
        }
    }
}
