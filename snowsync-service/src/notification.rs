//! Webhook notifications for failed sync runs.
//!
//! Notifications are fire-and-forget: delivery failures are logged and never
//! propagate, so a flaky webhook cannot disturb sync execution.

use serde::Serialize;
use snowsync::types::{SyncRun, SyncStatus};
use tracing::{info, warn};

/// Payload posted to the webhook for a failed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunFailureNotification {
    pub pipeline: String,
    pub status: SyncStatus,
    pub rows_processed: u64,
    pub duration_seconds: f64,
    pub error_detail: Option<String>,
}

/// Client posting failed-run reports to a configured webhook.
#[derive(Clone)]
pub struct WebhookNotificationClient {
    client: reqwest::Client,
    webhook_url: String,
}

impl WebhookNotificationClient {
    pub fn new(webhook_url: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            webhook_url,
        }
    }

    /// Reports the run to the webhook when it did not succeed.
    pub async fn notify_if_failed(&self, run: &SyncRun) {
        if run.status == SyncStatus::Success {
            return;
        }

        let notification = RunFailureNotification {
            pipeline: run.pipeline_name.clone(),
            status: run.status,
            rows_processed: run.rows_processed,
            duration_seconds: run.duration_seconds(),
            error_detail: run.error_detail.clone(),
        };

        match self
            .client
            .post(&self.webhook_url)
            .json(&notification)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                info!(
                    pipeline = run.pipeline_name,
                    "failure notification delivered"
                );
            }
            Ok(response) => {
                warn!(
                    pipeline = run.pipeline_name,
                    status = %response.status(),
                    "failure notification rejected by webhook"
                );
            }
            Err(err) => {
                warn!(
                    pipeline = run.pipeline_name,
                    error = %err,
                    "failed to deliver failure notification"
                );
            }
        }
    }
}
