//! libSQL backend — async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. All status transitions are
//! single-row atomic updates; the claim query is conditional so concurrent
//! processing runs for the same message cannot both proceed.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{
    Database, EmailFilter, EmailStatus, IntegrationLog, IntegrationStatus, Mailbox, NewEmail,
    StoredEmail,
};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to open database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.enable_foreign_keys().await?;
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.enable_foreign_keys().await?;
        backend.run_migrations().await?;
        Ok(backend)
    }

    /// SQLite leaves foreign keys off by default; the integration-log
    /// cascade depends on them.
    async fn enable_foreign_keys(&self) -> Result<(), DatabaseError> {
        self.conn
            .execute("PRAGMA foreign_keys = ON", ())
            .await
            .map_err(|e| DatabaseError::Connection(format!("PRAGMA foreign_keys: {e}")))?;
        Ok(())
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

/// Convert `Option<String>` to libsql Value.
fn opt_text_owned(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

/// Map a libsql error, classifying uniqueness violations so callers can
/// treat duplicate inserts as idempotent no-ops.
fn map_exec_error(op: &str, e: libsql::Error) -> DatabaseError {
    let msg = e.to_string();
    if msg.contains("UNIQUE constraint") {
        DatabaseError::Constraint(format!("{op}: {msg}"))
    } else {
        DatabaseError::Query(format!("{op}: {msg}"))
    }
}

fn row_to_mailbox(row: &libsql::Row) -> Result<Mailbox, libsql::Error> {
    let id_str: String = row.get(0)?;
    let port: i64 = row.get(3)?;
    let checkpoint: i64 = row.get(7)?;
    let last_poll_str: Option<String> = row.get(8).ok();
    let active: i64 = row.get(9)?;
    let created_str: String = row.get(10)?;
    let updated_str: String = row.get(11)?;

    Ok(Mailbox {
        id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
        name: row.get(1)?,
        imap_host: row.get(2)?,
        imap_port: port as u16,
        username: row.get(4)?,
        password: row.get(5)?,
        folder: row.get(6)?,
        last_checkpoint: checkpoint.max(0) as u32,
        last_poll_at: parse_optional_datetime(&last_poll_str),
        active: active != 0,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

fn row_to_email(row: &libsql::Row) -> Result<StoredEmail, libsql::Error> {
    let id_str: String = row.get(0)?;
    let mailbox_str: String = row.get(1)?;
    let received_str: String = row.get(5)?;
    let status_str: String = row.get(7)?;
    let attempts: i64 = row.get(8)?;
    let extracted_str: Option<String> = row.get(9).ok();
    let processed_str: Option<String> = row.get(10).ok();
    let created_str: String = row.get(11)?;
    let updated_str: String = row.get(12)?;

    Ok(StoredEmail {
        id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
        mailbox_id: Uuid::parse_str(&mailbox_str).unwrap_or_else(|_| Uuid::nil()),
        natural_key: row.get(2)?,
        subject: row.get(3)?,
        sender: row.get(4)?,
        received_at: parse_datetime(&received_str),
        body_text: row.get(6)?,
        status: EmailStatus::parse(&status_str),
        attempts: attempts.max(0) as u32,
        extracted_data: extracted_str.and_then(|s| serde_json::from_str(&s).ok()),
        last_processed_at: parse_optional_datetime(&processed_str),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

fn row_to_log(row: &libsql::Row) -> Result<IntegrationLog, libsql::Error> {
    let id_str: String = row.get(0)?;
    let email_str: String = row.get(1)?;
    let status_str: String = row.get(3)?;
    let request_str: Option<String> = row.get(4).ok();
    let code: Option<i64> = row.get(5).ok();
    let response_str: Option<String> = row.get(6).ok();
    let attempted_str: String = row.get(7)?;

    Ok(IntegrationLog {
        id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
        email_id: Uuid::parse_str(&email_str).unwrap_or_else(|_| Uuid::nil()),
        channel: row.get(2)?,
        status: IntegrationStatus::parse(&status_str),
        request_data: request_str.and_then(|s| serde_json::from_str(&s).ok()),
        response_code: code,
        response_body: response_str.and_then(|s| serde_json::from_str(&s).ok()),
        attempted_at: parse_datetime(&attempted_str),
    })
}

// ── Trait implementation ────────────────────────────────────────────

const MAILBOX_COLUMNS: &str = "id, name, imap_host, imap_port, username, password, folder, \
     last_checkpoint, last_poll_at, active, created_at, updated_at";

const EMAIL_COLUMNS: &str = "id, mailbox_id, natural_key, subject, sender, received_at, \
     body_text, status, attempts, extracted_data, last_processed_at, created_at, updated_at";

const LOG_COLUMNS: &str =
    "id, email_id, channel, status, request_data, response_code, response_body, attempted_at";

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    async fn probe(&self) -> Result<(), DatabaseError> {
        self.conn()
            .query("SELECT 1", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("probe: {e}")))?;
        Ok(())
    }

    // ── Mailboxes ───────────────────────────────────────────────────

    async fn insert_mailbox(&self, mailbox: &Mailbox) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO mailboxes (id, name, imap_host, imap_port, username, password,
                    folder, last_checkpoint, last_poll_at, active, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
                params![
                    mailbox.id.to_string(),
                    mailbox.name.clone(),
                    mailbox.imap_host.clone(),
                    mailbox.imap_port as i64,
                    mailbox.username.clone(),
                    mailbox.password.clone(),
                    mailbox.folder.clone(),
                    mailbox.last_checkpoint as i64,
                    opt_text_owned(mailbox.last_poll_at.map(|t| t.to_rfc3339())),
                    mailbox.active as i64,
                    mailbox.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| map_exec_error("insert_mailbox", e))?;

        debug!(id = %mailbox.id, name = %mailbox.name, "Mailbox inserted");
        Ok(())
    }

    async fn get_mailbox(&self, id: Uuid) -> Result<Option<Mailbox>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {MAILBOX_COLUMNS} FROM mailboxes WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_mailbox: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(
                row_to_mailbox(&row).map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?,
            )),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_mailbox: {e}"))),
        }
    }

    async fn list_active_mailboxes(&self) -> Result<Vec<Mailbox>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {MAILBOX_COLUMNS} FROM mailboxes WHERE active = 1 ORDER BY name"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_active_mailboxes: {e}")))?;

        let mut mailboxes = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_mailbox(&row) {
                Ok(mb) => mailboxes.push(mb),
                Err(e) => tracing::warn!("Skipping mailbox row: {e}"),
            }
        }
        Ok(mailboxes)
    }

    async fn advance_checkpoint(
        &self,
        id: Uuid,
        seq: u32,
        polled_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        // MAX() keeps the high-water mark monotonic even if an older poll
        // finishes after a newer one.
        self.conn()
            .execute(
                "UPDATE mailboxes
                 SET last_checkpoint = MAX(last_checkpoint, ?1),
                     last_poll_at = ?2,
                     updated_at = ?2
                 WHERE id = ?3",
                params![seq as i64, polled_at.to_rfc3339(), id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("advance_checkpoint: {e}")))?;

        debug!(id = %id, seq, "Checkpoint advanced");
        Ok(())
    }

    // ── Emails ──────────────────────────────────────────────────────

    async fn insert_email(&self, email: &NewEmail) -> Result<Uuid, DatabaseError> {
        let id = Uuid::new_v4();
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO emails (id, mailbox_id, natural_key, subject, sender,
                    received_at, body_text, status, attempts, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'PENDING', 0, ?8, ?8)",
                params![
                    id.to_string(),
                    email.mailbox_id.to_string(),
                    email.natural_key.clone(),
                    email.subject.clone(),
                    email.sender.clone(),
                    email.received_at.to_rfc3339(),
                    email.body_text.clone(),
                    now,
                ],
            )
            .await
            .map_err(|e| map_exec_error("insert_email", e))?;

        debug!(id = %id, natural_key = %email.natural_key, "Email inserted");
        Ok(id)
    }

    async fn get_email(&self, id: Uuid) -> Result<Option<StoredEmail>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {EMAIL_COLUMNS} FROM emails WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_email: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(
                row_to_email(&row).map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?,
            )),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_email: {e}"))),
        }
    }

    async fn list_emails(&self, filter: &EmailFilter) -> Result<Vec<StoredEmail>, DatabaseError> {
        let limit = if filter.limit == 0 { 100 } else { filter.limit };
        let mut sql = format!("SELECT {EMAIL_COLUMNS} FROM emails WHERE 1=1");
        let mut args: Vec<libsql::Value> = Vec::new();

        if let Some(status) = filter.status {
            args.push(libsql::Value::Text(status.as_str().to_string()));
            sql.push_str(&format!(" AND status = ?{}", args.len()));
        }
        if let Some(ref q) = filter.query {
            args.push(libsql::Value::Text(format!("%{q}%")));
            let n = args.len();
            sql.push_str(&format!(" AND (subject LIKE ?{n} OR sender LIKE ?{n})"));
        }
        args.push(libsql::Value::Integer(limit as i64));
        sql.push_str(&format!(" ORDER BY received_at DESC LIMIT ?{}", args.len()));

        let mut rows = self
            .conn()
            .query(&sql, args)
            .await
            .map_err(|e| DatabaseError::Query(format!("list_emails: {e}")))?;

        let mut emails = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_email(&row) {
                Ok(email) => emails.push(email),
                Err(e) => tracing::warn!("Skipping email row: {e}"),
            }
        }
        Ok(emails)
    }

    async fn claim_for_processing(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let changed = self
            .conn()
            .execute(
                "UPDATE emails
                 SET status = 'PROCESSING', attempts = attempts + 1, updated_at = ?1
                 WHERE id = ?2 AND status != 'PROCESSING'",
                params![now, id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("claim_for_processing: {e}")))?;

        if changed > 0 {
            return Ok(true);
        }

        // Zero rows: either the row is missing or another run holds the claim.
        match self.get_email(id).await? {
            Some(_) => Ok(false),
            None => Err(DatabaseError::NotFound {
                entity: "email".to_string(),
                id: id.to_string(),
            }),
        }
    }

    async fn update_email_status(
        &self,
        id: Uuid,
        status: EmailStatus,
    ) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "UPDATE emails SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), now, id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_email_status: {e}")))?;

        debug!(id = %id, status = status.as_str(), "Email status updated");
        Ok(())
    }

    async fn store_extracted(
        &self,
        id: Uuid,
        payload: &serde_json::Value,
    ) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "UPDATE emails
                 SET status = 'EXTRACTED', extracted_data = ?1, updated_at = ?2
                 WHERE id = ?3",
                params![payload.to_string(), now, id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("store_extracted: {e}")))?;
        Ok(())
    }

    async fn mark_integrated(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE emails
                 SET status = 'INTEGRATED', last_processed_at = ?1, updated_at = ?1
                 WHERE id = ?2",
                params![at.to_rfc3339(), id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_integrated: {e}")))?;
        Ok(())
    }

    async fn reenqueue_email(&self, id: Uuid) -> Result<EmailStatus, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let changed = self
            .conn()
            .execute(
                "UPDATE emails
                 SET status = 'PENDING', attempts = attempts + 1, updated_at = ?1
                 WHERE id = ?2",
                params![now, id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("reenqueue_email: {e}")))?;

        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "email".to_string(),
                id: id.to_string(),
            });
        }
        Ok(EmailStatus::Pending)
    }

    // ── Integration logs ────────────────────────────────────────────

    async fn insert_integration_log(
        &self,
        email_id: Uuid,
        channel: &str,
        request_data: &serde_json::Value,
    ) -> Result<Uuid, DatabaseError> {
        let id = Uuid::new_v4();
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO integration_logs (id, email_id, channel, status, request_data, attempted_at)
                 VALUES (?1, ?2, ?3, 'PENDING', ?4, ?5)",
                params![
                    id.to_string(),
                    email_id.to_string(),
                    channel,
                    request_data.to_string(),
                    now,
                ],
            )
            .await
            .map_err(|e| map_exec_error("insert_integration_log", e))?;
        Ok(id)
    }

    async fn complete_integration_log(
        &self,
        id: Uuid,
        status: IntegrationStatus,
        response_code: i64,
        response_body: &serde_json::Value,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE integration_logs
                 SET status = ?1, response_code = ?2, response_body = ?3
                 WHERE id = ?4",
                params![
                    status.as_str(),
                    response_code,
                    response_body.to_string(),
                    id.to_string(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("complete_integration_log: {e}")))?;
        Ok(())
    }

    async fn list_integration_logs(
        &self,
        email_id: Uuid,
    ) -> Result<Vec<IntegrationLog>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {LOG_COLUMNS} FROM integration_logs
                     WHERE email_id = ?1 ORDER BY attempted_at ASC"
                ),
                params![email_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_integration_logs: {e}")))?;

        let mut logs = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_log(&row) {
                Ok(log) => logs.push(log),
                Err(e) => tracing::warn!("Skipping integration log row: {e}"),
            }
        }
        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::{insert_test_email, test_mailbox};

    async fn backend() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.expect("in-memory db")
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let db = backend().await;
        db.run_migrations().await.expect("second run");
        db.probe().await.expect("probe after migrations");
    }

    #[tokio::test]
    async fn mailbox_round_trip() {
        let db = backend().await;
        let mb = test_mailbox();
        db.insert_mailbox(&mb).await.unwrap();

        let loaded = db.get_mailbox(mb.id).await.unwrap().expect("mailbox");
        assert_eq!(loaded.name, mb.name);
        assert_eq!(loaded.imap_port, 993);
        assert_eq!(loaded.last_checkpoint, 0);
        assert!(loaded.active);
    }

    #[tokio::test]
    async fn duplicate_natural_key_is_constraint_violation() {
        let db = backend().await;
        let mb = test_mailbox();
        db.insert_mailbox(&mb).await.unwrap();

        let first = insert_test_email(&db, mb.id, "<msg-1@example.com>").await;
        assert!(first.is_ok());

        let second = insert_test_email(&db, mb.id, "<msg-1@example.com>").await;
        match second {
            Err(e) => assert!(e.is_unique_violation(), "expected constraint, got {e}"),
            Ok(_) => panic!("duplicate insert must fail"),
        }

        // Exactly one row survives.
        let all = db.list_emails(&EmailFilter::default()).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn same_natural_key_in_different_mailboxes_is_allowed() {
        let db = backend().await;
        let mut mb1 = test_mailbox();
        mb1.name = "first".into();
        let mut mb2 = test_mailbox();
        mb2.name = "second".into();
        db.insert_mailbox(&mb1).await.unwrap();
        db.insert_mailbox(&mb2).await.unwrap();

        insert_test_email(&db, mb1.id, "<shared@example.com>")
            .await
            .unwrap();
        insert_test_email(&db, mb2.id, "<shared@example.com>")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn checkpoint_is_monotonic() {
        let db = backend().await;
        let mb = test_mailbox();
        db.insert_mailbox(&mb).await.unwrap();

        db.advance_checkpoint(mb.id, 103, Utc::now()).await.unwrap();
        let loaded = db.get_mailbox(mb.id).await.unwrap().unwrap();
        assert_eq!(loaded.last_checkpoint, 103);
        assert!(loaded.last_poll_at.is_some());

        // A stale poll finishing late must not move the mark backwards.
        db.advance_checkpoint(mb.id, 90, Utc::now()).await.unwrap();
        let loaded = db.get_mailbox(mb.id).await.unwrap().unwrap();
        assert_eq!(loaded.last_checkpoint, 103);

        db.advance_checkpoint(mb.id, 110, Utc::now()).await.unwrap();
        let loaded = db.get_mailbox(mb.id).await.unwrap().unwrap();
        assert_eq!(loaded.last_checkpoint, 110);
    }

    #[tokio::test]
    async fn claim_transitions_and_blocks_double_claim() {
        let db = backend().await;
        let mb = test_mailbox();
        db.insert_mailbox(&mb).await.unwrap();
        let id = insert_test_email(&db, mb.id, "<claim@example.com>")
            .await
            .unwrap();

        assert!(db.claim_for_processing(id).await.unwrap());
        let email = db.get_email(id).await.unwrap().unwrap();
        assert_eq!(email.status, EmailStatus::Processing);
        assert_eq!(email.attempts, 1);

        // Second claim while PROCESSING is a no-op, not an error.
        assert!(!db.claim_for_processing(id).await.unwrap());
        let email = db.get_email(id).await.unwrap().unwrap();
        assert_eq!(email.attempts, 1);
    }

    #[tokio::test]
    async fn claim_missing_email_is_not_found() {
        let db = backend().await;
        let result = db.claim_for_processing(Uuid::new_v4()).await;
        assert!(matches!(result, Err(DatabaseError::NotFound { .. })));
    }

    #[tokio::test]
    async fn extracted_payload_round_trip() {
        let db = backend().await;
        let mb = test_mailbox();
        db.insert_mailbox(&mb).await.unwrap();
        let id = insert_test_email(&db, mb.id, "<payload@example.com>")
            .await
            .unwrap();

        let payload = serde_json::json!({
            "document_type": "SERVICE_ORDER",
            "confidence_score": 95,
        });
        db.store_extracted(id, &payload).await.unwrap();

        let email = db.get_email(id).await.unwrap().unwrap();
        assert_eq!(email.status, EmailStatus::Extracted);
        assert_eq!(email.extracted_data, Some(payload));
    }

    #[tokio::test]
    async fn mark_integrated_stamps_processing_time() {
        let db = backend().await;
        let mb = test_mailbox();
        db.insert_mailbox(&mb).await.unwrap();
        let id = insert_test_email(&db, mb.id, "<done@example.com>")
            .await
            .unwrap();

        let at = Utc::now();
        db.mark_integrated(id, at).await.unwrap();
        let email = db.get_email(id).await.unwrap().unwrap();
        assert_eq!(email.status, EmailStatus::Integrated);
        let stamped = email.last_processed_at.expect("processed stamp");
        assert!((stamped - at).num_seconds().abs() < 2);
    }

    #[tokio::test]
    async fn reenqueue_resets_status_and_bumps_attempts() {
        let db = backend().await;
        let mb = test_mailbox();
        db.insert_mailbox(&mb).await.unwrap();
        let id = insert_test_email(&db, mb.id, "<redo@example.com>")
            .await
            .unwrap();

        db.update_email_status(id, EmailStatus::RequiresReview)
            .await
            .unwrap();
        let status = db.reenqueue_email(id).await.unwrap();
        assert_eq!(status, EmailStatus::Pending);

        let email = db.get_email(id).await.unwrap().unwrap();
        assert_eq!(email.status, EmailStatus::Pending);
        assert_eq!(email.attempts, 1);
    }

    #[tokio::test]
    async fn reenqueue_missing_email_is_not_found() {
        let db = backend().await;
        let result = db.reenqueue_email(Uuid::new_v4()).await;
        assert!(matches!(result, Err(DatabaseError::NotFound { .. })));
    }

    #[tokio::test]
    async fn list_emails_filters_by_status_and_query() {
        let db = backend().await;
        let mb = test_mailbox();
        db.insert_mailbox(&mb).await.unwrap();

        let a = insert_test_email(&db, mb.id, "<a@example.com>").await.unwrap();
        let _b = insert_test_email(&db, mb.id, "<b@example.com>").await.unwrap();
        db.update_email_status(a, EmailStatus::Failed).await.unwrap();

        let failed = db
            .list_emails(&EmailFilter {
                status: Some(EmailStatus::Failed),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, a);

        let matched = db
            .list_emails(&EmailFilter {
                query: Some("customer".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(matched.len(), 2, "subject substring matches both");

        let none = db
            .list_emails(&EmailFilter {
                query: Some("no-such-subject".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn integration_log_lifecycle() {
        let db = backend().await;
        let mb = test_mailbox();
        db.insert_mailbox(&mb).await.unwrap();
        let email_id = insert_test_email(&db, mb.id, "<log@example.com>")
            .await
            .unwrap();

        let request = serde_json::json!({"chat_id": "42", "message": "hello"});
        let log_id = db
            .insert_integration_log(email_id, "telegram", &request)
            .await
            .unwrap();

        let logs = db.list_integration_logs(email_id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, IntegrationStatus::Pending);
        assert_eq!(logs[0].request_data, Some(request));

        db.complete_integration_log(
            log_id,
            IntegrationStatus::Success,
            200,
            &serde_json::json!({"ok": true}),
        )
        .await
        .unwrap();

        let logs = db.list_integration_logs(email_id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, IntegrationStatus::Success);
        assert_eq!(logs[0].response_code, Some(200));
    }

    #[tokio::test]
    async fn local_file_backend_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mailsift.db");
        let db = LibSqlBackend::new_local(&path).await.unwrap();
        db.probe().await.unwrap();
        assert!(path.exists());
    }
}
