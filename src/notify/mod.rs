//! Notify capability
//!
//! A notifier turns the finished run report into a message and delivers it.
//! Delivery problems are recorded in the returned [`NotifyResult`]; they
//! never change the run's status.

pub mod ic;
pub mod message;

use crate::config::{NotifyConfig, NotifyKind};
use crate::error::NotifyError;
use crate::pipeline::RunReport;
use serde::{Deserialize, Serialize};
use tracing::info;

pub use ic::IcNotifier;
pub use message::{MessageOptions, NotificationPayload};

/// Outcome of the notify stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyResult {
    pub delivered: bool,
    /// Notification disabled by configuration
    pub skipped: bool,
    pub attempts: u32,
    /// Last delivery error, when not delivered
    pub error: Option<String>,
}

impl NotifyResult {
    pub fn delivered(attempts: u32) -> Self {
        Self {
            delivered: true,
            skipped: false,
            attempts,
            error: None,
        }
    }

    pub fn skipped() -> Self {
        Self {
            delivered: false,
            skipped: true,
            attempts: 0,
            error: None,
        }
    }

    pub fn failed(attempts: u32, error: String) -> Self {
        Self {
            delivered: false,
            skipped: false,
            attempts,
            error: Some(error),
        }
    }

    /// Delivery was attempted and did not get through
    pub fn failed_delivery(&self) -> bool {
        !self.delivered && !self.skipped
    }
}

/// Notification backend
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver the report. Called exactly once per run.
    async fn send(&self, report: &RunReport) -> NotifyResult;

    /// Backend name (e.g., "ic")
    fn name(&self) -> &str;
}

/// Stand-in used when `notify.enabled = false`
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledNotifier;

#[async_trait::async_trait]
impl Notifier for DisabledNotifier {
    async fn send(&self, report: &RunReport) -> NotifyResult {
        info!("Notification disabled, skipping ({})", report.status());
        NotifyResult::skipped()
    }

    fn name(&self) -> &str {
        "disabled"
    }
}

/// Select the notifier named by the configuration
pub fn backend_for(config: &NotifyConfig) -> Result<Box<dyn Notifier>, NotifyError> {
    match (config.kind, &config.delivery) {
        (NotifyKind::Ic, Some(delivery)) if config.enabled => {
            Ok(Box::new(IcNotifier::new(delivery.clone(), config)?))
        }
        _ => Ok(Box::new(DisabledNotifier)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::TriggerContext;

    #[tokio::test]
    async fn test_disabled_notifier_skips() {
        let report = RunReport::new(TriggerContext::default(), "main");
        let result = DisabledNotifier.send(&report).await;
        assert!(result.skipped);
        assert!(!result.failed_delivery());
        assert_eq!(result.attempts, 0);
    }

    #[test]
    fn test_failed_delivery() {
        assert!(NotifyResult::failed(3, "HTTP 500".to_string()).failed_delivery());
        assert!(!NotifyResult::delivered(1).failed_delivery());
    }
}
