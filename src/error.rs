//! Error types for mailsift.

use uuid::Uuid;

/// Top-level error type for the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

impl DatabaseError {
    /// True when the error is a uniqueness violation — the Ingestor treats
    /// these as "already ingested", not as failures.
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::Constraint(_))
    }
}

/// Mailbox ingestion errors.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Connection to {host}:{port} failed: {reason}")]
    Connect {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("IMAP authentication failed for {username}")]
    Auth { username: String },

    #[error("IMAP protocol error: {0}")]
    Protocol(String),

    #[error("Mailbox {id} is not active")]
    Inactive { id: Uuid },

    #[error("Malformed item at uid {uid}: {reason}")]
    MalformedItem { uid: u32, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// AI provider errors, split by retry class.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Request to {provider} timed out")]
    Timeout { provider: String },

    #[error("Connection to {provider} failed: {reason}")]
    Connection { provider: String, reason: String },

    #[error("{provider} rate limited the request")]
    RateLimited { provider: String },

    #[error("Authentication failed for {provider}")]
    AuthFailed { provider: String },

    #[error("{provider} returned status {status}: {body}")]
    Api {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("Empty completion from {provider}")]
    EmptyResponse { provider: String },
}

impl ProviderError {
    /// Transient errors are retried with backoff; permanent ones abort the
    /// retry loop.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. }
            | Self::Connection { .. }
            | Self::RateLimited { .. }
            | Self::EmptyResponse { .. } => true,
            Self::AuthFailed { .. } => false,
            Self::Api { status, .. } => *status >= 500,
        }
    }
}

/// Notification delivery errors.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Channel {channel} is not configured: {reason}")]
    NotConfigured { channel: String, reason: String },

    #[error("Delivery on {channel} failed with status {status}: {body}")]
    Rejected {
        channel: String,
        status: u16,
        body: String,
    },

    #[error("Transport error on {channel}: {reason}")]
    Transport { channel: String, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl NotifyError {
    /// HTTP status recorded in the audit log; 0 when no response was
    /// received at all.
    pub fn response_code(&self) -> u16 {
        match self {
            Self::Rejected { status, .. } => *status,
            _ => 0,
        }
    }
}

/// Orchestrator errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Message {id} not found")]
    NotFound { id: Uuid },

    #[error("Message {id} is already being processed")]
    AlreadyRunning { id: Uuid },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),
}

/// Result type alias for the pipeline.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classes() {
        assert!(
            ProviderError::Timeout {
                provider: "openai".into()
            }
            .is_transient()
        );
        assert!(
            ProviderError::RateLimited {
                provider: "openai".into()
            }
            .is_transient()
        );
        assert!(
            ProviderError::Api {
                provider: "openai".into(),
                status: 503,
                body: "overloaded".into()
            }
            .is_transient()
        );
    }

    #[test]
    fn permanent_classes() {
        assert!(
            !ProviderError::AuthFailed {
                provider: "openai".into()
            }
            .is_transient()
        );
        assert!(
            !ProviderError::Api {
                provider: "openai".into(),
                status: 400,
                body: "bad request".into()
            }
            .is_transient()
        );
    }

    #[test]
    fn notify_error_sentinel_code() {
        let e = NotifyError::Transport {
            channel: "telegram".into(),
            reason: "connection reset".into(),
        };
        assert_eq!(e.response_code(), 0);

        let e = NotifyError::Rejected {
            channel: "telegram".into(),
            status: 403,
            body: "forbidden".into(),
        };
        assert_eq!(e.response_code(), 403);
    }

    #[test]
    fn unique_violation_detection() {
        assert!(DatabaseError::Constraint("UNIQUE constraint failed".into()).is_unique_violation());
        assert!(!DatabaseError::Query("syntax error".into()).is_unique_violation());
    }
}
