//! Webhook targets
//!
//! A webhook registers a delivery channel under its ARN and a worker that
//! POSTs every batch as an event message to the configured endpoint.

use reqwest::Client;
use ripple_core::config::WebhookTargetConfig;
use ripple_core::types::{validate_arn, EventMessage, EventRecord};
use ripple_core::{Error, Result};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

use super::notifier::{EventNotifier, EventReceiver};
use crate::metrics::names;

/// A configured webhook destination
#[derive(Debug, Clone)]
pub struct WebhookTarget {
    arn: String,
    endpoint: Url,
    auth_token: Option<String>,
    max_retries: u32,
    retry_delay: Duration,
    client: Client,
}

impl WebhookTarget {
    pub fn from_config(config: &WebhookTargetConfig) -> Result<Self> {
        validate_arn(&config.arn)?;
        let endpoint = Url::parse(&config.endpoint).map_err(|e| {
            Error::InvalidArgument(format!("Invalid webhook endpoint {}: {}", config.endpoint, e))
        })?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::InternalError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            arn: config.arn.clone(),
            endpoint,
            auth_token: config.auth_token.clone(),
            max_retries: config.max_retries.max(1),
            retry_delay: Duration::from_secs(1),
            client,
        })
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn arn(&self) -> &str {
        &self.arn
    }

    /// Register the webhook's channel and start its delivery worker
    pub fn spawn(self, notifier: &EventNotifier) -> Result<JoinHandle<()>> {
        let (sender, receiver) = notifier.channel();
        notifier.add_listener(&self.arn, sender)?;
        info!("Webhook {} delivering to {}", self.arn, self.endpoint);
        Ok(tokio::spawn(self.run(receiver)))
    }

    async fn run(self, mut receiver: EventReceiver) {
        while let Some(records) = receiver.recv().await {
            self.deliver_with_retry(records).await;
        }
        debug!("Webhook worker for {} stopped", self.arn);
    }

    async fn deliver_with_retry(&self, records: Vec<EventRecord>) {
        let message = EventMessage::new(records);
        let mut attempts = 0;

        loop {
            attempts += 1;
            match self.deliver(&message).await {
                Ok(()) => {
                    debug!("Delivered event to {} (attempt {})", self.arn, attempts);
                    return;
                }
                Err(e) => {
                    warn!("Failed to deliver event to {} (attempt {}): {}", self.arn, attempts, e);
                    if attempts >= self.max_retries {
                        error!(
                            "Giving up on event delivery to {} after {} attempts",
                            self.arn, attempts
                        );
                        metrics::counter!(names::WEBHOOK_FAILURES_TOTAL, "arn" => self.arn.clone())
                            .increment(1);
                        return;
                    }
                    tokio::time::sleep(self.retry_delay * attempts).await;
                }
            }
        }
    }

    async fn deliver(&self, message: &EventMessage) -> std::result::Result<(), String> {
        let mut request = self.client.post(self.endpoint.clone()).json(message);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| format!("HTTP request failed: {}", e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("Webhook returned error status: {}", response.status()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventNotifierConfig;

    fn config(endpoint: &str) -> WebhookTargetConfig {
        WebhookTargetConfig {
            arn: "arn:ripple:sqs:us-east-1:1:webhook".into(),
            endpoint: endpoint.into(),
            auth_token: Some("secret".into()),
            max_retries: 2,
            timeout_secs: 1,
        }
    }

    #[test]
    fn test_rejects_bad_endpoint() {
        assert!(matches!(
            WebhookTarget::from_config(&config("not a url")),
            Err(Error::InvalidArgument(_))
        ));
        let mut bad_arn = config("http://127.0.0.1:1/hook");
        bad_arn.arn = "webhook".into();
        assert!(matches!(
            WebhookTarget::from_config(&bad_arn),
            Err(Error::InvalidArn(_))
        ));
    }

    #[tokio::test]
    async fn test_spawn_registers_destination() {
        let notifier = EventNotifier::new(EventNotifierConfig::default());
        let target = WebhookTarget::from_config(&config("http://127.0.0.1:1/hook"))
            .unwrap()
            .with_retry_delay(Duration::from_millis(1));
        let arn = target.arn().to_string();

        let worker = target.clone().spawn(&notifier).unwrap();
        assert!(notifier.has_listener(&arn));
        assert!(matches!(
            target.spawn(&notifier),
            Err(Error::DestinationConflict(_))
        ));

        notifier.remove_listener(&arn);
        worker.await.unwrap();
    }
}
