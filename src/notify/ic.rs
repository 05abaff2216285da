//! IC chat push over HTTP form POST

use super::message::{MessageOptions, NotificationPayload};
use super::{NotifyResult, Notifier};
use crate::config::{IcDelivery, NotifyConfig, NotifyTarget};
use crate::error::NotifyError;
use crate::pipeline::RunReport;
use crate::retry::{retry, RetryPolicy};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, error, info};

/// Longest response body kept in a `Rejected` error
const MAX_BODY_CHARS: usize = 200;

/// IC chat notifier
pub struct IcNotifier {
    client: reqwest::Client,
    delivery: IcDelivery,
    options: MessageOptions,
    policy: RetryPolicy,
}

impl IcNotifier {
    pub fn new(delivery: IcDelivery, config: &NotifyConfig) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| NotifyError::TransportFailure(format!("HTTP client setup: {}", e)))?;

        Ok(Self {
            client,
            delivery,
            options: MessageOptions::from_config(config),
            policy: RetryPolicy::new(config.retries, config.retry_backoff_ms),
        })
    }

    /// Form fields for one message
    pub fn form_fields(&self, payload: &NotificationPayload) -> Vec<(&'static str, String)> {
        let mut fields = vec![("token", self.delivery.token.clone())];

        match &self.delivery.target {
            NotifyTarget::Group { room } => {
                fields.push(("target", "group".to_string()));
                fields.push(("room", room.clone()));
            }
            NotifyTarget::User { account } => {
                fields.push(("target", "single".to_string()));
                fields.push(("account", account.clone()));
            }
        }

        fields.push(("title", payload.title.clone()));
        fields.push(("content", payload.render()));
        fields.push(("content_type", "1".to_string()));

        match &self.delivery.target {
            NotifyTarget::Group { .. } => {
                if let Some(user) = self.delivery.at_user.as_ref().filter(|_| !payload.status.is_success()) {
                    fields.push(("at_user", user.clone()));
                }
            }
            NotifyTarget::User { .. } => fields.push(("popup_type", "0".to_string())),
        }
        fields
    }

    async fn deliver_once(&self, fields: &[(&'static str, String)]) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.delivery.endpoint)
            .form(fields)
            .send()
            .await
            .map_err(|e| NotifyError::TransportFailure(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!("IC endpoint answered {}", status);
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(NotifyError::Rejected {
            status: status.as_u16(),
            body: body.chars().take(MAX_BODY_CHARS).collect(),
        })
    }

    fn target_label(&self) -> String {
        match &self.delivery.target {
            NotifyTarget::Group { room } => format!("group {}", room),
            NotifyTarget::User { account } => format!("user {}", account),
        }
    }
}

#[async_trait::async_trait]
impl Notifier for IcNotifier {
    async fn send(&self, report: &RunReport) -> NotifyResult {
        let payload = NotificationPayload::from_report(report, &self.options);
        let fields = self.form_fields(&payload);
        info!("Sending '{}' to IC {}", payload.title, self.target_label());

        let attempts = AtomicU32::new(0);
        let counter = &attempts;
        let fields = &fields;
        let outcome = retry(
            "IC notify",
            self.policy,
            // Client errors will not fix themselves
            NotifyError::is_retryable,
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                self.deliver_once(fields).await
            },
        )
        .await;

        let attempts = attempts.load(Ordering::SeqCst);
        match outcome {
            Ok(()) => {
                info!("IC notification delivered after {} attempt(s)", attempts);
                NotifyResult::delivered(attempts)
            }
            Err(e) => {
                error!("IC notification failed after {} attempt(s): {}", attempts, e);
                NotifyResult::failed(attempts, e.to_string())
            }
        }
    }

    fn name(&self) -> &str {
        "ic"
    }
}
