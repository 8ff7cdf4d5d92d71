//! Processing orchestrator — the per-message state machine.
//!
//! `PENDING → PROCESSING → (EXTRACTED → INTEGRATED) | REQUIRES_REVIEW | FAILED`
//!
//! One invocation drives one message: claim, extract, persist, notify,
//! terminal state. Every failure resolves to a terminal status — a
//! completed run never leaves a message in `PROCESSING`.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{DatabaseError, PipelineError};
use crate::extract::{ExtractionGateway, SchemaKind};
use crate::notify::NotificationDispatcher;
use crate::store::{Database, EmailStatus, StoredEmail};

/// Default extraction instructions, per deployment profile.
const DEFAULT_INSTRUCTIONS: &str =
    "Extract the order fields from the following email text.";

pub struct Orchestrator {
    db: Arc<dyn Database>,
    gateway: Arc<ExtractionGateway>,
    dispatcher: Arc<NotificationDispatcher>,
    /// Channel used for pipeline notifications.
    notify_channel: String,
    /// Schema requested from the extraction gateway.
    schema: SchemaKind,
    instructions: String,
}

impl Orchestrator {
    pub fn new(
        db: Arc<dyn Database>,
        gateway: Arc<ExtractionGateway>,
        dispatcher: Arc<NotificationDispatcher>,
        notify_channel: impl Into<String>,
    ) -> Self {
        Self {
            db,
            gateway,
            dispatcher,
            notify_channel: notify_channel.into(),
            schema: SchemaKind::ServiceOrder,
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
        }
    }

    pub fn with_schema(mut self, schema: SchemaKind, instructions: impl Into<String>) -> Self {
        self.schema = schema;
        self.instructions = instructions.into();
        self
    }

    /// Drive one message through the pipeline. Returns its terminal status.
    ///
    /// Re-entrant: a message already claimed by another run is a no-op
    /// (`AlreadyRunning`), not a second execution.
    pub async fn process(&self, id: Uuid) -> Result<EmailStatus, PipelineError> {
        // Claim first, so a crash after this point is observably
        // "in progress" rather than silently stuck at PENDING.
        match self.db.claim_for_processing(id).await {
            Ok(true) => {}
            Ok(false) => {
                info!(id = %id, "Message already being processed; skipping");
                return Err(PipelineError::AlreadyRunning { id });
            }
            Err(DatabaseError::NotFound { .. }) => {
                error!(id = %id, "Message not found");
                return Err(PipelineError::NotFound { id });
            }
            Err(e) => return Err(e.into()),
        }

        let email = self
            .db
            .get_email(id)
            .await?
            .ok_or(PipelineError::NotFound { id })?;

        info!(
            id = %id,
            attempt = email.attempts,
            subject = %email.subject,
            "Processing message"
        );

        match self.run(&email).await {
            Ok(status) => Ok(status),
            Err(e) => {
                // Outer boundary: any unexpected failure resolves to FAILED.
                error!(id = %id, error = %e, "Processing failed; marking FAILED");
                if let Err(persist) = self.db.update_email_status(id, EmailStatus::Failed).await {
                    error!(id = %id, error = %persist, "Failed to persist FAILED status");
                }
                Err(e)
            }
        }
    }

    /// Extraction → persistence → notification.
    async fn run(&self, email: &StoredEmail) -> Result<EmailStatus, PipelineError> {
        let document = match self
            .gateway
            .extract(&email.body_text, &self.schema, &self.instructions)
            .await
        {
            Ok(document) => document,
            Err(failure) => {
                // Recoverable terminal state: a human re-enqueues after review.
                warn!(id = %email.id, failure = %failure, "Extraction failed; needs review");
                self.db
                    .update_email_status(email.id, EmailStatus::RequiresReview)
                    .await?;

                let message = format!(
                    "Review needed\nEmail '{}' from {}: extraction failed ({failure})",
                    email.subject, email.sender
                );
                if let Err(e) = self
                    .dispatcher
                    .notify(email.id, &self.notify_channel, &message)
                    .await
                {
                    // Best-effort: the review status is already persisted.
                    warn!(id = %email.id, error = %e, "Review alert delivery failed");
                }
                return Ok(EmailStatus::RequiresReview);
            }
        };

        self.db
            .store_extracted(email.id, &document.to_value())
            .await?;
        info!(
            id = %email.id,
            confidence = document.confidence_score(),
            "Extraction stored"
        );

        // Delivery failure propagates: the outer boundary turns it into
        // FAILED, with the audit row already written by the dispatcher.
        let message = format!(
            "*New automated process*\n*Subject:* {}\n*Extraction:* SUCCESS\n*Summary:* {}\n*Confidence:* {}",
            email.subject,
            document.summary(),
            document.confidence_score()
        );
        self.dispatcher
            .notify(email.id, &self.notify_channel, &message)
            .await?;

        self.db.mark_integrated(email.id, Utc::now()).await?;
        info!(id = %email.id, "Message integrated");
        Ok(EmailStatus::Integrated)
    }
}
