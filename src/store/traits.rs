//! Unified `Database` trait — single async interface for all persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DatabaseError;

/// Processing status of an ingested email.
///
/// `PENDING → PROCESSING → (EXTRACTED → INTEGRATED) | REQUIRES_REVIEW | FAILED`.
/// The only back-edge is the explicit re-enqueue to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailStatus {
    /// Ingested, awaiting a processing run.
    Pending,
    /// A processing run has claimed the message.
    Processing,
    /// Extraction succeeded; notification not yet delivered.
    Extracted,
    /// Extraction failed; needs human review. Recoverable via re-enqueue.
    RequiresReview,
    /// Extracted and notified. Terminal success.
    Integrated,
    /// Unrecoverable failure. Terminal until manual re-enqueue.
    Failed,
}

impl EmailStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Extracted => "EXTRACTED",
            Self::RequiresReview => "REQUIRES_REVIEW",
            Self::Integrated => "INTEGRATED",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "PROCESSING" => Self::Processing,
            "EXTRACTED" => Self::Extracted,
            "REQUIRES_REVIEW" => Self::RequiresReview,
            "INTEGRATED" => Self::Integrated,
            "FAILED" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// Outcome of one delivery attempt in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrationStatus {
    Pending,
    Success,
    Failed,
}

impl IntegrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "SUCCESS" => Self::Success,
            "FAILED" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// A configured mail source.
#[derive(Debug, Clone)]
pub struct Mailbox {
    pub id: Uuid,
    pub name: String,
    pub imap_host: String,
    pub imap_port: u16,
    pub username: String,
    pub password: String,
    pub folder: String,
    /// Highest IMAP UID already ingested. Monotonically non-decreasing.
    pub last_checkpoint: u32,
    pub last_poll_at: Option<DateTime<Utc>>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Mailbox {
    /// New active mailbox with a zero checkpoint (cold start).
    pub fn new(
        name: &str,
        imap_host: &str,
        imap_port: u16,
        username: &str,
        password: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            imap_host: imap_host.to_string(),
            imap_port,
            username: username.to_string(),
            password: password.to_string(),
            folder: "INBOX".to_string(),
            last_checkpoint: 0,
            last_poll_at: None,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A persisted inbound email.
#[derive(Debug, Clone)]
pub struct StoredEmail {
    pub id: Uuid,
    pub mailbox_id: Uuid,
    /// Message-ID header, or a synthesized `host/mailbox/uid` key.
    /// Unique per mailbox.
    pub natural_key: String,
    pub subject: String,
    pub sender: String,
    pub received_at: DateTime<Utc>,
    pub body_text: String,
    pub status: EmailStatus,
    pub attempts: u32,
    pub extracted_data: Option<serde_json::Value>,
    pub last_processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload for a new email row. Status starts at `Pending`.
#[derive(Debug, Clone)]
pub struct NewEmail {
    pub mailbox_id: Uuid,
    pub natural_key: String,
    pub subject: String,
    pub sender: String,
    pub received_at: DateTime<Utc>,
    pub body_text: String,
}

/// One delivery attempt to one external channel. Append-only.
#[derive(Debug, Clone)]
pub struct IntegrationLog {
    pub id: Uuid,
    pub email_id: Uuid,
    pub channel: String,
    pub status: IntegrationStatus,
    pub request_data: Option<serde_json::Value>,
    pub response_code: Option<i64>,
    pub response_body: Option<serde_json::Value>,
    pub attempted_at: DateTime<Utc>,
}

/// Filter for the email listing endpoint.
#[derive(Debug, Clone, Default)]
pub struct EmailFilter {
    pub status: Option<EmailStatus>,
    /// Substring match on subject or sender.
    pub query: Option<String>,
    pub limit: usize,
}

/// Backend-agnostic database trait covering mailboxes, emails, and the
/// integration audit log.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    /// Liveness probe — a trivial query against the backend.
    async fn probe(&self) -> Result<(), DatabaseError>;

    // ── Mailboxes ───────────────────────────────────────────────────

    async fn insert_mailbox(&self, mailbox: &Mailbox) -> Result<(), DatabaseError>;

    async fn get_mailbox(&self, id: Uuid) -> Result<Option<Mailbox>, DatabaseError>;

    async fn list_active_mailboxes(&self) -> Result<Vec<Mailbox>, DatabaseError>;

    /// Advance the checkpoint high-water mark and stamp the poll time in a
    /// single update. The stored checkpoint never decreases: the update
    /// writes `max(last_checkpoint, seq)`.
    async fn advance_checkpoint(
        &self,
        id: Uuid,
        seq: u32,
        polled_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    // ── Emails ──────────────────────────────────────────────────────

    /// Insert a new email row. Returns `DatabaseError::Constraint` when the
    /// `(mailbox_id, natural_key)` pair already exists — the caller decides
    /// whether that is an error.
    async fn insert_email(&self, email: &NewEmail) -> Result<Uuid, DatabaseError>;

    async fn get_email(&self, id: Uuid) -> Result<Option<StoredEmail>, DatabaseError>;

    async fn list_emails(&self, filter: &EmailFilter) -> Result<Vec<StoredEmail>, DatabaseError>;

    /// Atomically claim a message for processing: set `PROCESSING` and
    /// increment `attempts`, but only when the current status is not already
    /// `PROCESSING`. Returns `Ok(false)` for the already-running no-op case
    /// and `Err(NotFound)` when the row does not exist.
    async fn claim_for_processing(&self, id: Uuid) -> Result<bool, DatabaseError>;

    async fn update_email_status(
        &self,
        id: Uuid,
        status: EmailStatus,
    ) -> Result<(), DatabaseError>;

    /// Store the validated payload and set `EXTRACTED` in one update.
    async fn store_extracted(
        &self,
        id: Uuid,
        payload: &serde_json::Value,
    ) -> Result<(), DatabaseError>;

    /// Terminal success: set `INTEGRATED` and stamp `last_processed_at`.
    async fn mark_integrated(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), DatabaseError>;

    /// Manual re-enqueue: reset to `PENDING` and increment `attempts`.
    /// Returns the updated status.
    async fn reenqueue_email(&self, id: Uuid) -> Result<EmailStatus, DatabaseError>;

    // ── Integration logs ────────────────────────────────────────────

    /// Create a `PENDING` audit row before a delivery attempt.
    async fn insert_integration_log(
        &self,
        email_id: Uuid,
        channel: &str,
        request_data: &serde_json::Value,
    ) -> Result<Uuid, DatabaseError>;

    /// Record the outcome of the attempt on an existing audit row.
    async fn complete_integration_log(
        &self,
        id: Uuid,
        status: IntegrationStatus,
        response_code: i64,
        response_body: &serde_json::Value,
    ) -> Result<(), DatabaseError>;

    async fn list_integration_logs(
        &self,
        email_id: Uuid,
    ) -> Result<Vec<IntegrationLog>, DatabaseError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trip() {
        for status in [
            EmailStatus::Pending,
            EmailStatus::Processing,
            EmailStatus::Extracted,
            EmailStatus::RequiresReview,
            EmailStatus::Integrated,
            EmailStatus::Failed,
        ] {
            assert_eq!(EmailStatus::parse(status.as_str()), status);
        }
    }

    #[test]
    fn unknown_status_defaults_to_pending() {
        assert_eq!(EmailStatus::parse("GARBAGE"), EmailStatus::Pending);
    }

    #[test]
    fn integration_status_round_trip() {
        for status in [
            IntegrationStatus::Pending,
            IntegrationStatus::Success,
            IntegrationStatus::Failed,
        ] {
            assert_eq!(IntegrationStatus::parse(status.as_str()), status);
        }
    }

    #[test]
    fn new_mailbox_cold_start() {
        let mb = Mailbox::new("support", "imap.example.com", 993, "user", "pass");
        assert_eq!(mb.last_checkpoint, 0);
        assert_eq!(mb.folder, "INBOX");
        assert!(mb.active);
        assert!(mb.last_poll_at.is_none());
    }
}
