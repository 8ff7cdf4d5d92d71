//! Configuration types, built from environment variables.
//!
//! Each subsystem has its own config struct with a `from_env()`
//! constructor. Components take their config by value at call time —
//! nothing reads ambient process state after startup.

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default per-mailbox poll schedule (seconds-resolution cron): every 5 minutes.
pub const DEFAULT_POLL_CRON: &str = "0 */5 * * * *";

/// Environment-level IMAP credential override.
///
/// When present, takes precedence over the credentials stored on a mailbox
/// row — lets operators rotate credentials without touching the store.
#[derive(Debug, Clone)]
pub struct ImapOverride {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
}

impl ImapOverride {
    /// Returns `None` unless `MAILSIFT_IMAP_HOST` is set.
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("MAILSIFT_IMAP_HOST").ok()?;
        let port: u16 = std::env::var("MAILSIFT_IMAP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(993);
        let username = std::env::var("MAILSIFT_IMAP_USERNAME").unwrap_or_default();
        let password =
            SecretString::from(std::env::var("MAILSIFT_IMAP_PASSWORD").unwrap_or_default());
        Some(Self {
            host,
            port,
            username,
            password,
        })
    }
}

/// Ingestor tuning knobs.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Credential override, applied to every mailbox when set.
    pub imap_override: Option<ImapOverride>,
    /// Maximum items fetched per poll.
    pub batch_size: usize,
    /// Size of the recovery window used when both discovery tiers come up empty.
    pub recovery_window: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            imap_override: None,
            batch_size: 200,
            recovery_window: 50,
        }
    }
}

impl IngestConfig {
    pub fn from_env() -> Self {
        let batch_size = std::env::var("MAILSIFT_BATCH_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(200);
        let recovery_window = std::env::var("MAILSIFT_RECOVERY_WINDOW")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(50);
        Self {
            imap_override: ImapOverride::from_env(),
            batch_size,
            recovery_window,
        }
    }
}

/// Extraction gateway configuration.
#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    /// Provider API key. `None` switches the gateway to the deterministic mock.
    pub api_key: Option<SecretString>,
    pub model: String,
    /// Maximum provider calls per extraction.
    pub max_attempts: u32,
    /// Base backoff delay in seconds, doubled per attempt.
    pub base_delay_secs: u64,
    /// Extra fixed wait after a rate-limit signal, in seconds.
    pub rate_limit_wait_secs: u64,
    /// Per-request HTTP timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gpt-5".to_string(),
            max_attempts: 3,
            base_delay_secs: 2,
            rate_limit_wait_secs: 60,
            request_timeout_secs: 30,
        }
    }
}

impl ExtractionConfig {
    pub fn from_env() -> Self {
        let api_key = std::env::var("OPENAI_API_KEY").ok().map(SecretString::from);
        let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-5".to_string());
        let max_attempts = std::env::var("MAILSIFT_EXTRACT_MAX_ATTEMPTS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(3);
        Self {
            api_key,
            model,
            max_attempts,
            ..Default::default()
        }
    }
}

/// Telegram notification channel configuration.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: SecretString,
    pub chat_id: String,
}

impl TelegramConfig {
    /// Returns `None` when either credential is missing (channel disabled).
    pub fn from_env() -> Option<Self> {
        let bot_token = std::env::var("TELEGRAM_BOT_TOKEN").ok()?;
        let chat_id = std::env::var("TELEGRAM_CHAT_ID").ok()?;
        Some(Self {
            bot_token: SecretString::from(bot_token),
            chat_id,
        })
    }
}

/// SMTP channel configuration, used for operational alert delivery.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
    pub alert_address: String,
}

impl SmtpConfig {
    /// Returns `None` unless `MAILSIFT_SMTP_HOST` is set (channel disabled).
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("MAILSIFT_SMTP_HOST").ok()?;
        let port: u16 = std::env::var("MAILSIFT_SMTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(587);
        let username = std::env::var("MAILSIFT_SMTP_USERNAME").unwrap_or_default();
        let password =
            SecretString::from(std::env::var("MAILSIFT_SMTP_PASSWORD").unwrap_or_default());
        let from_address =
            std::env::var("MAILSIFT_SMTP_FROM").unwrap_or_else(|_| username.clone());
        let alert_address =
            std::env::var("MAILSIFT_ALERT_ADDRESS").unwrap_or_else(|_| from_address.clone());
        Some(Self {
            host,
            port,
            username,
            password,
            from_address,
            alert_address,
        })
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: String,
    pub poll_cron: String,
    pub workers: usize,
    pub ops_port: u16,
    pub ingest: IngestConfig,
    pub extraction: ExtractionConfig,
    pub telegram: Option<TelegramConfig>,
    pub smtp: Option<SmtpConfig>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let db_path =
            std::env::var("MAILSIFT_DB_PATH").unwrap_or_else(|_| "./data/mailsift.db".to_string());
        let poll_cron =
            std::env::var("MAILSIFT_POLL_CRON").unwrap_or_else(|_| DEFAULT_POLL_CRON.to_string());
        // Reject a bad schedule at startup rather than in the poll loop.
        poll_cron
            .parse::<cron::Schedule>()
            .map_err(|e| ConfigError::InvalidValue {
                key: "MAILSIFT_POLL_CRON".to_string(),
                message: e.to_string(),
            })?;
        let workers = std::env::var("MAILSIFT_WORKERS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(4);
        let ops_port = std::env::var("MAILSIFT_OPS_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(8080);

        Ok(Self {
            db_path,
            poll_cron,
            workers,
            ops_port,
            ingest: IngestConfig::from_env(),
            extraction: ExtractionConfig::from_env(),
            telegram: TelegramConfig::from_env(),
            smtp: SmtpConfig::from_env(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingest_defaults() {
        let cfg = IngestConfig::default();
        assert_eq!(cfg.batch_size, 200);
        assert_eq!(cfg.recovery_window, 50);
        assert!(cfg.imap_override.is_none());
    }

    #[test]
    fn extraction_defaults() {
        let cfg = ExtractionConfig::default();
        assert_eq!(cfg.max_attempts, 3);
        assert_eq!(cfg.base_delay_secs, 2);
        assert_eq!(cfg.rate_limit_wait_secs, 60);
        assert_eq!(cfg.request_timeout_secs, 30);
        assert!(cfg.api_key.is_none());
    }

    #[test]
    fn default_poll_cron_parses() {
        assert!(DEFAULT_POLL_CRON.parse::<cron::Schedule>().is_ok());
    }
}
