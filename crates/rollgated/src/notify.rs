//! Webhook sink for rollout events.

use std::time::Duration;

use tracing::{debug, warn};

use rollgate_rollout::RolloutEvent;

/// Posts rollout events to a configured webhook.
///
/// Delivery is best-effort: a failed notification is logged and never fails
/// the rollout that produced it.
pub struct WebhookNotifier {
    http: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(WebhookNotifier { http, url })
    }

    pub async fn send(&self, event: &RolloutEvent) {
        let result = self.http.post(&self.url).json(event).send().await;
        match result {
            Ok(response) if response.status().is_success() => {
                debug!(service = %event.service, "rollout event delivered");
            }
            Ok(response) => {
                warn!(
                    service = %event.service,
                    status = response.status().as_u16(),
                    "webhook rejected the rollout event"
                );
            }
            Err(err) => {
                warn!(service = %event.service, error = %err, "failed to deliver rollout event");
            }
        }
    }
}
