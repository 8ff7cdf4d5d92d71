//! SMTP channel — operational alert delivery via lettre.

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;

use crate::config::SmtpConfig;
use crate::error::NotifyError;
use crate::notify::{DeliveryResponse, NotifyChannel};

pub struct SmtpChannel {
    config: SmtpConfig,
}

impl SmtpChannel {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    /// Build and send the email. Blocking — run under `spawn_blocking`.
    fn send_blocking(config: &SmtpConfig, subject: &str, body: &str) -> Result<(), NotifyError> {
        let send_failed = |reason: String| NotifyError::Transport {
            channel: "smtp".to_string(),
            reason,
        };

        let transport = SmtpTransport::relay(&config.host)
            .map_err(|e| send_failed(format!("SMTP relay error: {e}")))?
            .port(config.port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.expose_secret().to_string(),
            ))
            .build();

        let email = Message::builder()
            .from(
                config
                    .from_address
                    .parse()
                    .map_err(|e| send_failed(format!("Invalid from address: {e}")))?,
            )
            .to(config
                .alert_address
                .parse()
                .map_err(|e| send_failed(format!("Invalid alert address: {e}")))?)
            .subject(subject)
            .body(body.to_string())
            .map_err(|e| send_failed(format!("Failed to build email: {e}")))?;

        transport
            .send(&email)
            .map_err(|e| send_failed(format!("SMTP send failed: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl NotifyChannel for SmtpChannel {
    fn name(&self) -> &str {
        "smtp"
    }

    fn request_data(&self, message: &str) -> serde_json::Value {
        serde_json::json!({
            "to": self.config.alert_address,
            "message": message,
        })
    }

    async fn deliver(&self, message: &str) -> Result<DeliveryResponse, NotifyError> {
        let config = self.config.clone();
        let (subject, body) = split_subject(message);
        let subject = subject.to_string();
        let body = body.to_string();

        tokio::task::spawn_blocking(move || Self::send_blocking(&config, &subject, &body))
            .await
            .map_err(|e| NotifyError::Transport {
                channel: "smtp".to_string(),
                reason: format!("send task panicked: {e}"),
            })??;

        tracing::info!(to = %self.config.alert_address, "Alert email sent");
        Ok(DeliveryResponse {
            status: 250,
            body: serde_json::json!({"accepted": true}),
        })
    }
}

/// Use the first line as the subject when the message has several lines.
fn split_subject(message: &str) -> (&str, &str) {
    match message.split_once('\n') {
        Some((first, rest)) if !first.trim().is_empty() => (first.trim(), rest.trim_start()),
        _ => ("mailsift notification", message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn config() -> SmtpConfig {
        SmtpConfig {
            host: "smtp.example.com".into(),
            port: 587,
            username: "ops".into(),
            password: SecretString::from("pass"),
            from_address: "pipeline@example.com".into(),
            alert_address: "alerts@example.com".into(),
        }
    }

    #[test]
    fn split_subject_multiline() {
        let (subject, body) = split_subject("Mailbox down\nConnection refused at 10:02");
        assert_eq!(subject, "Mailbox down");
        assert_eq!(body, "Connection refused at 10:02");
    }

    #[test]
    fn split_subject_single_line_gets_default() {
        let (subject, body) = split_subject("just one line");
        assert_eq!(subject, "mailsift notification");
        assert_eq!(body, "just one line");
    }

    #[test]
    fn request_data_targets_alert_address() {
        let ch = SmtpChannel::new(config());
        let data = ch.request_data("ping");
        assert_eq!(data["to"], "alerts@example.com");
        assert_eq!(ch.name(), "smtp");
    }
}
