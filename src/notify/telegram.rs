//! Telegram channel — Bot API `sendMessage`, Markdown-first with a
//! plain-text retry when Telegram rejects the formatting.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;

use crate::config::TelegramConfig;
use crate::error::NotifyError;
use crate::notify::{DeliveryResponse, NotifyChannel};

/// Delivery timeout — notifications are small and should fail fast.
const REQUEST_TIMEOUT_SECS: u64 = 5;

pub struct TelegramChannel {
    config: TelegramConfig,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(config: TelegramConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self { config, client }
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "https://api.telegram.org/bot{}/{method}",
            self.config.bot_token.expose_secret()
        )
    }

    async fn send_message(
        &self,
        text: &str,
        parse_mode: Option<&str>,
    ) -> Result<reqwest::Response, NotifyError> {
        let mut body = serde_json::json!({
            "chat_id": self.config.chat_id,
            "text": text,
        });
        if let Some(mode) = parse_mode {
            body["parse_mode"] = serde_json::Value::String(mode.to_string());
        }

        self.client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await
            .map_err(|e| NotifyError::Transport {
                channel: "telegram".to_string(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl NotifyChannel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    fn request_data(&self, message: &str) -> serde_json::Value {
        serde_json::json!({
            "chat_id": self.config.chat_id,
            "message": message,
        })
    }

    async fn deliver(&self, message: &str) -> Result<DeliveryResponse, NotifyError> {
        // Markdown first; Telegram 400s on bad entities, so fall back to
        // plain text before reporting failure.
        let response = self.send_message(message, Some("Markdown")).await?;
        let status = response.status();
        if status.is_success() {
            let body = response.json().await.unwrap_or_default();
            return Ok(DeliveryResponse {
                status: status.as_u16(),
                body,
            });
        }

        tracing::warn!(
            status = status.as_u16(),
            "Telegram rejected Markdown message; retrying as plain text"
        );

        let plain = self.send_message(message, None).await?;
        let plain_status = plain.status();
        if plain_status.is_success() {
            let body = plain.json().await.unwrap_or_default();
            return Ok(DeliveryResponse {
                status: plain_status.as_u16(),
                body,
            });
        }

        let body = plain.text().await.unwrap_or_default();
        Err(NotifyError::Rejected {
            channel: "telegram".to_string(),
            status: plain_status.as_u16(),
            body,
        })
    }
}
