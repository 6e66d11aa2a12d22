//! HTTP JSON fan-out for alarm notifications
//!
//! Every notification is POSTed as `{"topic": .., "notification": {..}}` to a
//! single endpoint. Delivery is attempted once; non-2xx responses and
//! transport errors are reported back to the caller, which logs them.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use crate::alerts::AlarmNotification;
use crate::callbacks::NotificationPublisher;
use crate::error::{ShardwatchError, ShardwatchResult};

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    topic: &'a str,
    notification: &'a AlarmNotification,
}

/// [`NotificationPublisher`] backed by an HTTP webhook
#[derive(Debug, Clone)]
pub struct WebhookPublisher {
    client: reqwest::Client,
    endpoint: String,
}

impl WebhookPublisher {
    /// Create a publisher for `endpoint`; each request is bounded by `timeout`
    pub fn new(endpoint: &str, timeout: Duration) -> ShardwatchResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ShardwatchError::config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl NotificationPublisher for WebhookPublisher {
    async fn publish(&self, topic: &str, notification: &AlarmNotification) -> ShardwatchResult<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&WebhookPayload { topic, notification })
            .send()
            .await
            .map_err(|e| ShardwatchError::callback_failed("publish", e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ShardwatchError::callback_failed(
                "publish",
                format!("webhook returned {} for topic '{}'", status, topic),
            ));
        }
        Ok(())
    }
}
