//! Mailbox ingestor — checkpointed, idempotent ingestion.
//!
//! `poll(mailbox_id)` connects to the mailbox's IMAP source, discovers
//! unseen items (tiered: checkpoint search → unseen → recent window),
//! persists each exactly once, enqueues a processing task per fresh row,
//! and advances the checkpoint. Idempotency comes from the store's
//! `(mailbox_id, natural_key)` uniqueness constraint, not from a
//! check-then-act probe — concurrent polls of the same mailbox are safe.

pub mod imap;
pub mod parse;
pub mod source;

pub use imap::{ImapEndpoint, ImapSession};
pub use source::{MailSource, RawItem, collect_items};

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::IngestConfig;
use crate::dispatch::{Task, TaskQueue};
use crate::error::{DatabaseError, IngestError};
use crate::notify::NotificationDispatcher;
use crate::store::{Database, Mailbox, NewEmail};

pub struct Ingestor {
    db: Arc<dyn Database>,
    dispatcher: Arc<NotificationDispatcher>,
    queue: TaskQueue,
    config: IngestConfig,
}

impl Ingestor {
    pub fn new(
        db: Arc<dyn Database>,
        dispatcher: Arc<NotificationDispatcher>,
        queue: TaskQueue,
        config: IngestConfig,
    ) -> Self {
        Self {
            db,
            dispatcher,
            queue,
            config,
        }
    }

    /// Poll one mailbox over IMAP. Returns the number of newly created
    /// messages.
    pub async fn poll(&self, mailbox_id: Uuid) -> Result<usize, IngestError> {
        let mailbox = self.load_active(mailbox_id).await?;
        let endpoint = ImapEndpoint::resolve(&mailbox, self.config.imap_override.as_ref());

        let checkpoint = mailbox.last_checkpoint;
        let batch_size = self.config.batch_size;
        let window = self.config.recovery_window;

        let fetched = tokio::task::spawn_blocking(move || -> Result<Vec<RawItem>, IngestError> {
            let mut session = ImapSession::connect(&endpoint)?;
            let items = collect_items(&mut session, checkpoint, batch_size, window);
            session.logout();
            items
        })
        .await
        .unwrap_or_else(|e| Err(IngestError::Protocol(format!("fetch task panicked: {e}"))));

        match fetched {
            Ok(items) => Ok(self.finish_poll(&mailbox, items).await),
            Err(e) => {
                error!(mailbox = %mailbox.name, error = %e, "Mailbox poll failed");
                self.dispatcher
                    .alert(&format!(
                        "Mailbox '{}' poll failed\n{e}",
                        mailbox.name
                    ))
                    .await;
                Err(e)
            }
        }
    }

    /// Poll against an explicit source — the same pipeline minus the IMAP
    /// session (tests, alternate sources).
    pub async fn poll_source(
        &self,
        mailbox_id: Uuid,
        source: &mut dyn MailSource,
    ) -> Result<usize, IngestError> {
        let mailbox = self.load_active(mailbox_id).await?;
        match collect_items(
            source,
            mailbox.last_checkpoint,
            self.config.batch_size,
            self.config.recovery_window,
        ) {
            Ok(items) => Ok(self.finish_poll(&mailbox, items).await),
            Err(e) => {
                error!(mailbox = %mailbox.name, error = %e, "Mailbox poll failed");
                self.dispatcher
                    .alert(&format!("Mailbox '{}' poll failed\n{e}", mailbox.name))
                    .await;
                Err(e)
            }
        }
    }

    async fn load_active(&self, mailbox_id: Uuid) -> Result<Mailbox, IngestError> {
        let mailbox = self
            .db
            .get_mailbox(mailbox_id)
            .await?
            .ok_or(DatabaseError::NotFound {
                entity: "mailbox".to_string(),
                id: mailbox_id.to_string(),
            })?;
        if !mailbox.active {
            return Err(IngestError::Inactive { id: mailbox_id });
        }
        Ok(mailbox)
    }

    /// Persist a batch of fetched items and advance the checkpoint.
    ///
    /// Per-item failures are logged (and alerted) but never abort the batch.
    async fn finish_poll(&self, mailbox: &Mailbox, items: Vec<RawItem>) -> usize {
        let now = Utc::now();
        let mut created = 0_usize;
        let mut max_uid = 0_u32;

        for item in &items {
            // Handled items move the high-water mark — a malformed item will
            // not parse differently next poll, so it counts too.
            max_uid = max_uid.max(item.uid);

            let parsed =
                match parse::parse_email(&item.raw, item.uid, mailbox.id, &mailbox.imap_host, now) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        warn!(uid = item.uid, error = %e, "Skipping malformed item");
                        self.dispatcher
                            .alert(&format!(
                                "Mailbox '{}': skipped malformed item\n{e}",
                                mailbox.name
                            ))
                            .await;
                        continue;
                    }
                };

            let new_email = NewEmail {
                mailbox_id: mailbox.id,
                natural_key: parsed.natural_key,
                subject: parsed.subject,
                sender: parsed.sender,
                received_at: parsed.received_at,
                body_text: parsed.body_text,
            };

            match self.db.insert_email(&new_email).await {
                Ok(id) => {
                    created += 1;
                    debug!(id = %id, uid = item.uid, "Email ingested");
                    // The row stays PENDING if this fails — recoverable by a
                    // status sweep, so no rollback.
                    if let Err(e) = self.queue.enqueue(Task::Process(id)) {
                        error!(id = %id, error = %e,
                            "Failed to enqueue processing task; message remains PENDING");
                    }
                }
                Err(e) if e.is_unique_violation() => {
                    debug!(
                        uid = item.uid,
                        natural_key = %new_email.natural_key,
                        "Already ingested"
                    );
                }
                Err(e) => {
                    error!(uid = item.uid, error = %e, "Failed to persist item");
                    self.dispatcher
                        .alert(&format!(
                            "Mailbox '{}': failed to persist item {}\n{e}",
                            mailbox.name, item.uid
                        ))
                        .await;
                }
            }
        }

        // Single update: high-water mark plus poll stamp. Non-fatal — the
        // next poll re-discovers and deduplicates.
        if let Err(e) = self.db.advance_checkpoint(mailbox.id, max_uid, now).await {
            warn!(mailbox = %mailbox.name, error = %e, "Checkpoint update failed");
        }

        info!(
            mailbox = %mailbox.name,
            fetched = items.len(),
            created,
            checkpoint = max_uid.max(mailbox.last_checkpoint),
            "Poll complete"
        );
        created
    }
}

#[cfg(test)]
mod tests {
    use super::source::test_support::FakeSource;
    use super::*;
    use crate::store::test_support::test_mailbox;
    use crate::store::{EmailFilter, EmailStatus, LibSqlBackend};

    fn raw_item(uid: u32) -> (u32, Vec<u8>) {
        let raw = format!(
            "Message-ID: <item-{uid}@example.com>\r\n\
             From: customer@example.com\r\n\
             Subject: Order {uid}\r\n\
             \r\n\
             Please handle order {uid}."
        );
        (uid, raw.into_bytes())
    }

    async fn setup() -> (Arc<LibSqlBackend>, Ingestor, tokio::sync::mpsc::UnboundedReceiver<Task>, Uuid)
    {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let mailbox = test_mailbox();
        db.insert_mailbox(&mailbox).await.unwrap();

        let dispatcher = Arc::new(NotificationDispatcher::new(db.clone()));
        let (queue, rx) = TaskQueue::new();
        let ingestor = Ingestor::new(db.clone(), dispatcher, queue, IngestConfig::default());
        (db, ingestor, rx, mailbox.id)
    }

    #[tokio::test]
    async fn poll_creates_messages_and_advances_checkpoint() {
        let (db, ingestor, mut rx, mailbox_id) = setup().await;
        db.advance_checkpoint(mailbox_id, 100, Utc::now())
            .await
            .unwrap();

        let mut source =
            FakeSource::with_items(vec![raw_item(101), raw_item(102), raw_item(103)]);
        let created = ingestor.poll_source(mailbox_id, &mut source).await.unwrap();
        assert_eq!(created, 3);

        let mailbox = db.get_mailbox(mailbox_id).await.unwrap().unwrap();
        assert_eq!(mailbox.last_checkpoint, 103);

        // One processing task per created message.
        let mut task_ids = Vec::new();
        while let Ok(task) = rx.try_recv() {
            match task {
                Task::Process(id) => task_ids.push(id),
                other => panic!("unexpected task {other:?}"),
            }
        }
        assert_eq!(task_ids.len(), 3);

        // Everything lands PENDING.
        let emails = db.list_emails(&EmailFilter::default()).await.unwrap();
        assert_eq!(emails.len(), 3);
        assert!(emails.iter().all(|e| e.status == EmailStatus::Pending));
    }

    #[tokio::test]
    async fn reingest_is_idempotent() {
        let (db, ingestor, mut rx, mailbox_id) = setup().await;

        let items = vec![raw_item(101), raw_item(102)];
        let mut source = FakeSource::with_items(items.clone());
        let created = ingestor.poll_source(mailbox_id, &mut source).await.unwrap();
        assert_eq!(created, 2);

        // Same items again (checkpoint reset simulates a recovery window).
        let mut stale = FakeSource::with_items(items);
        stale.unseen = vec![101, 102];
        let mut mailbox = db.get_mailbox(mailbox_id).await.unwrap().unwrap();
        mailbox.last_checkpoint = 0;
        let created = ingestor.finish_poll(&mailbox, collect_items(&mut stale, 0, 200, 50).unwrap()).await;
        assert_eq!(created, 0, "duplicates are no-ops, not errors");

        let emails = db.list_emails(&EmailFilter::default()).await.unwrap();
        assert_eq!(emails.len(), 2, "exactly one row per natural key");

        // Only the first poll enqueued tasks.
        let mut count = 0;
        while rx.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn empty_mailbox_polls_to_zero() {
        let (db, ingestor, _rx, mailbox_id) = setup().await;
        let mut source = FakeSource::default();
        let created = ingestor.poll_source(mailbox_id, &mut source).await.unwrap();
        assert_eq!(created, 0);

        // Poll time is stamped even when nothing is found.
        let mailbox = db.get_mailbox(mailbox_id).await.unwrap().unwrap();
        assert!(mailbox.last_poll_at.is_some());
        assert_eq!(mailbox.last_checkpoint, 0);
    }

    #[tokio::test]
    async fn malformed_item_does_not_abort_batch() {
        let (db, ingestor, _rx, mailbox_id) = setup().await;

        let mut items = vec![raw_item(101)];
        items.push((102, Vec::new())); // unparseable
        items.push(raw_item(103));

        let mut source = FakeSource::with_items(items);
        let created = ingestor.poll_source(mailbox_id, &mut source).await.unwrap();
        // The malformed item is skipped; the rest of the batch lands.
        assert_eq!(created, 2);

        let mailbox = db.get_mailbox(mailbox_id).await.unwrap().unwrap();
        assert_eq!(mailbox.last_checkpoint, 103);
    }

    #[tokio::test]
    async fn inactive_mailbox_is_rejected() {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let mut mailbox = test_mailbox();
        mailbox.active = false;
        db.insert_mailbox(&mailbox).await.unwrap();

        let dispatcher = Arc::new(NotificationDispatcher::new(db.clone()));
        let (queue, _rx) = TaskQueue::new();
        let ingestor = Ingestor::new(db, dispatcher, queue, IngestConfig::default());

        let mut source = FakeSource::default();
        let result = ingestor.poll_source(mailbox.id, &mut source).await;
        assert!(matches!(result, Err(IngestError::Inactive { .. })));
    }

    #[tokio::test]
    async fn unknown_mailbox_is_not_found() {
        let (_db, ingestor, _rx, _mailbox_id) = setup().await;
        let mut source = FakeSource::default();
        let result = ingestor.poll_source(Uuid::new_v4(), &mut source).await;
        assert!(matches!(
            result,
            Err(IngestError::Database(DatabaseError::NotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn synthesized_keys_deduplicate_too() {
        let (db, ingestor, _rx, mailbox_id) = setup().await;

        // No Message-ID header: key is synthesized from host/mailbox/uid.
        let raw = b"From: a@b.com\r\nSubject: no id\r\n\r\nbody".to_vec();
        let mut source = FakeSource::with_items(vec![(5, raw.clone())]);
        assert_eq!(ingestor.poll_source(mailbox_id, &mut source).await.unwrap(), 1);

        let mailbox = db.get_mailbox(mailbox_id).await.unwrap().unwrap();
        let mut again = FakeSource::with_items(vec![(5, raw)]);
        again.unseen = vec![5];
        let created = ingestor
            .finish_poll(&mailbox, collect_items(&mut again, 5, 200, 50).unwrap())
            .await;
        assert_eq!(created, 0);
    }
}
