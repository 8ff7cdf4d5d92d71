//! Notification dispatch — audited delivery to external channels.
//!
//! Every message-linked delivery writes a PENDING `IntegrationLog` row
//! *before* the attempt, then resolves it to SUCCESS or FAILED. A crash
//! mid-delivery still leaves an audit trail distinguishing "attempted"
//! from "never tried". Delivery failure is propagated to the caller —
//! the dispatcher never swallows it.

pub mod smtp;
pub mod telegram;

pub use smtp::SmtpChannel;
pub use telegram::TelegramChannel;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::NotifyError;
use crate::store::{Database, IntegrationStatus};

/// Raw response from a successful channel delivery.
#[derive(Debug, Clone)]
pub struct DeliveryResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

/// A notification target. Pure transport — audit logging lives in the
/// dispatcher.
#[async_trait]
pub trait NotifyChannel: Send + Sync {
    /// Channel identifier recorded in the audit log (e.g. "telegram").
    fn name(&self) -> &str;

    /// Request payload recorded before the attempt.
    fn request_data(&self, message: &str) -> serde_json::Value;

    async fn deliver(&self, message: &str) -> Result<DeliveryResponse, NotifyError>;
}

/// Dispatcher over the configured channels.
pub struct NotificationDispatcher {
    db: Arc<dyn Database>,
    channels: Vec<Arc<dyn NotifyChannel>>,
}

impl NotificationDispatcher {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self {
            db,
            channels: Vec::new(),
        }
    }

    pub fn with_channel(mut self, channel: Arc<dyn NotifyChannel>) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    fn channel(&self, name: &str) -> Option<&Arc<dyn NotifyChannel>> {
        self.channels.iter().find(|c| c.name() == name)
    }

    /// Deliver `message` for `email_id` on the named channel, with a full
    /// audit trail. Each retry by a caller creates a new log row.
    pub async fn notify(
        &self,
        email_id: Uuid,
        channel: &str,
        message: &str,
    ) -> Result<serde_json::Value, NotifyError> {
        let target = self
            .channel(channel)
            .ok_or_else(|| NotifyError::NotConfigured {
                channel: channel.to_string(),
                reason: "no such channel registered".to_string(),
            })?;

        let log_id = self
            .db
            .insert_integration_log(email_id, channel, &target.request_data(message))
            .await?;

        match target.deliver(message).await {
            Ok(response) => {
                self.db
                    .complete_integration_log(
                        log_id,
                        IntegrationStatus::Success,
                        i64::from(response.status),
                        &response.body,
                    )
                    .await?;
                info!(email_id = %email_id, channel, "Notification delivered");
                Ok(response.body)
            }
            Err(e) => {
                let outcome = self
                    .db
                    .complete_integration_log(
                        log_id,
                        IntegrationStatus::Failed,
                        i64::from(e.response_code()),
                        &serde_json::json!({"error": e.to_string()}),
                    )
                    .await;
                if let Err(db_err) = outcome {
                    error!(email_id = %email_id, channel, error = %db_err,
                        "Failed to record delivery failure");
                }
                error!(email_id = %email_id, channel, error = %e, "Notification failed");
                Err(e)
            }
        }
    }

    /// Operational alert, not tied to any message — best-effort fan-out to
    /// every channel, no audit rows. Used for connection-level and
    /// unexpected ingestion errors.
    pub async fn alert(&self, message: &str) {
        if self.channels.is_empty() {
            warn!("Operational alert with no channels configured: {message}");
            return;
        }
        let deliveries =
            futures::future::join_all(self.channels.iter().map(|c| c.deliver(message))).await;
        for (channel, result) in self.channels.iter().zip(deliveries) {
            if let Err(e) = result {
                warn!(channel = channel.name(), error = %e, "Alert delivery failed");
            }
        }
    }
}

#[cfg(test)]
pub mod test_support {
    //! Scripted channel for dispatcher and orchestrator tests.

    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::{DeliveryResponse, NotifyChannel};
    use crate::error::NotifyError;

    pub struct FakeChannel {
        pub name: &'static str,
        pub outcomes: Mutex<Vec<Result<DeliveryResponse, NotifyError>>>,
        pub delivered: Mutex<Vec<String>>,
    }

    impl FakeChannel {
        pub fn succeeding(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                outcomes: Mutex::new(vec![]),
                delivered: Mutex::new(vec![]),
            })
        }

        pub fn failing(name: &'static str, error: NotifyError) -> Arc<Self> {
            Arc::new(Self {
                name,
                outcomes: Mutex::new(vec![Err(error)]),
                delivered: Mutex::new(vec![]),
            })
        }
    }

    #[async_trait]
    impl NotifyChannel for FakeChannel {
        fn name(&self) -> &str {
            self.name
        }

        fn request_data(&self, message: &str) -> serde_json::Value {
            serde_json::json!({"message": message})
        }

        async fn deliver(&self, message: &str) -> Result<DeliveryResponse, NotifyError> {
            self.delivered.lock().unwrap().push(message.to_string());
            match self.outcomes.lock().unwrap().pop() {
                Some(outcome) => outcome,
                None => Ok(DeliveryResponse {
                    status: 200,
                    body: serde_json::json!({"ok": true}),
                }),
            }
        }
    }
}
