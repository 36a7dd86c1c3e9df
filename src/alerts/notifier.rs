use crate::error::NotifyError;
use crate::BoxFuture;
use log::{debug, info, warn};
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Trait for channels that deliver an alert message to one address
pub trait Notifier: Send + Sync {
    /// Deliver `message` to `recipient_email`, tagged with the alert group it belongs to
    fn send_alert<'a>(
        &'a self,
        message: &'a str,
        recipient_email: &'a str,
        group_key: &'a str,
    ) -> BoxFuture<'a, Result<(), NotifyError>>;

    /// Get a human-readable name for this channel
    fn name(&self) -> &str;
}

/// Dry-run channel that only writes alerts to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send_alert<'a>(
        &'a self,
        message: &'a str,
        recipient_email: &'a str,
        group_key: &'a str,
    ) -> BoxFuture<'a, Result<(), NotifyError>> {
        Box::pin(async move {
            info!(
                "Alert [{}] for {}:\n{}",
                group_key, recipient_email, message
            );
            Ok(())
        })
    }

    fn name(&self) -> &str {
        "log"
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    recipient: &'a str,
    group: &'a str,
    text: &'a str,
}

/// Channel that POSTs each alert as JSON to a webhook
///
/// The body is `{"recipient": ..., "group": ..., "text": ...}`; any non-2xx
/// answer is a rejection.
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String, timeout: Duration) -> Result<Self, NotifyError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Notifier for WebhookNotifier {
    fn send_alert<'a>(
        &'a self,
        message: &'a str,
        recipient_email: &'a str,
        group_key: &'a str,
    ) -> BoxFuture<'a, Result<(), NotifyError>> {
        Box::pin(async move {
            let payload = WebhookPayload {
                recipient: recipient_email,
                group: group_key,
                text: message,
            };
            let response = self.client.post(&self.url).json(&payload).send().await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(NotifyError::Rejected {
                    status: status.as_u16(),
                    body,
                });
            }
            debug!("Webhook accepted alert {} for {}", group_key, recipient_email);
            Ok(())
        })
    }

    fn name(&self) -> &str {
        "webhook"
    }
}

/// Fans one alert out to several channels
///
/// Channels are tried in order. A failing channel is logged and the rest
/// still run; the send fails only when every channel failed.
#[derive(Default)]
pub struct MultiNotifier {
    channels: Vec<Arc<dyn Notifier>>,
}

impl MultiNotifier {
    pub fn new(channels: Vec<Arc<dyn Notifier>>) -> Self {
        Self { channels }
    }

    pub fn add(&mut self, channel: Arc<dyn Notifier>) {
        self.channels.push(channel);
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

impl Notifier for MultiNotifier {
    fn send_alert<'a>(
        &'a self,
        message: &'a str,
        recipient_email: &'a str,
        group_key: &'a str,
    ) -> BoxFuture<'a, Result<(), NotifyError>> {
        Box::pin(async move {
            if self.channels.is_empty() {
                warn!("No notification channels configured, dropping alert {}", group_key);
                return Ok(());
            }

            let mut failures = Vec::new();
            for channel in &self.channels {
                if let Err(e) = channel.send_alert(message, recipient_email, group_key).await {
                    warn!("Channel '{}' failed for {}: {}", channel.name(), recipient_email, e);
                    failures.push(format!("{}: {}", channel.name(), e));
                }
            }

            if failures.len() == self.channels.len() {
                Err(NotifyError::NotificationFailed(failures.join("; ")))
            } else {
                Ok(())
            }
        })
    }

    fn name(&self) -> &str {
        "multi"
    }
}

/// A send that failed on every attempt
#[derive(Debug)]
pub struct DeliveryFailure {
    pub attempts: u32,
    pub error: NotifyError,
}

/// Bounded retry with exponential backoff for notification dispatch
///
/// The default is a single attempt, i.e. no retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay before retry number `retry` (1-based): base, 2x base, 4x base, ...
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }

    /// Send through `notifier`, retrying failures
    ///
    /// Returns the number of attempts used on success.
    pub async fn send(
        &self,
        notifier: &dyn Notifier,
        message: &str,
        recipient_email: &str,
        group_key: &str,
    ) -> Result<u32, DeliveryFailure> {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match notifier.send_alert(message, recipient_email, group_key).await {
                Ok(()) => return Ok(attempt),
                Err(error) if attempt >= max_attempts => {
                    return Err(DeliveryFailure {
                        attempts: attempt,
                        error,
                    })
                }
                Err(e) => {
                    let delay = self.delay_for(attempt);
                    debug!(
                        "Attempt {} to notify {} failed ({}), retrying in {:?}",
                        attempt, recipient_email, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
