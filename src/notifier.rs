//! Alert dispatch boundary
//!
//! The pipeline only guarantees an alert is *attempted* when a pair's
//! batch contains an anomalous row. With a webhook configured the alert
//! is a short-timeout JSON POST; without one it is a log line. Failures
//! are logged and never propagate into the scheduler.

use crate::config::TagPair;
use crate::detector::AlignedRow;
use std::time::Duration;

const ALERT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Notifier {
    client: reqwest::Client,
    webhook_url: Option<String>,
}

impl Notifier {
    pub fn new(webhook_url: Option<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(ALERT_TIMEOUT).build()?;

        Ok(Self {
            client,
            webhook_url,
        })
    }

    /// Log-only notifier for tests and webhook-less deployments. Never
    /// touches the network, so the default client is fine.
    pub fn log_only() -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url: None,
        }
    }

    /// Dispatch an alert for an anomalous batch, best-effort.
    pub async fn alert(&self, pair: &TagPair, latest: &AlignedRow) {
        log::warn!(
            "Anomaly detected for pair {} (setpoint {:.3}, actual {:.3}, error {:.3} at {})",
            pair.file_stem(),
            latest.setpoint,
            latest.actual,
            latest.error,
            latest.timestamp.to_rfc3339()
        );

        let Some(url) = &self.webhook_url else {
            return;
        };

        let payload = serde_json::json!({
            "pair": pair.file_stem(),
            "setpoint_tag": pair.setpoint,
            "actual_tag": pair.actual,
            "timestamp": latest.timestamp.to_rfc3339(),
            "error": latest.error,
        });

        match self.client.post(url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                log::info!("Alert delivered for pair {}", pair.file_stem());
            }
            Ok(response) => {
                log::warn!(
                    "Alert webhook returned status {} for pair {}",
                    response.status(),
                    pair.file_stem()
                );
            }
            Err(e) => {
                log::warn!("Alert webhook failed for pair {}: {}", pair.file_stem(), e);
            }
        }
    }
}
