//! Ops surface — a thin axum router for liveness, message inspection, and
//! manual reprocessing. Authentication sits in front of this service; the
//! router itself is deliberately minimal.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::dispatch::{Task, TaskQueue};
use crate::error::DatabaseError;
use crate::health;
use crate::store::{Database, EmailFilter, EmailStatus, StoredEmail};

#[derive(Clone)]
pub struct OpsState {
    pub db: Arc<dyn Database>,
    pub queue: TaskQueue,
}

pub fn ops_router(state: OpsState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/emails", get(list_emails_handler))
        .route("/emails/{id}", get(email_detail_handler))
        .route("/emails/{id}/reprocess", post(reprocess_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Views ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct EmailView {
    id: Uuid,
    mailbox_id: Uuid,
    subject: String,
    sender: String,
    status: &'static str,
    attempts: u32,
    received_at: chrono::DateTime<chrono::Utc>,
    last_processed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<&StoredEmail> for EmailView {
    fn from(email: &StoredEmail) -> Self {
        Self {
            id: email.id,
            mailbox_id: email.mailbox_id,
            subject: email.subject.clone(),
            sender: email.sender.clone(),
            status: email.status.as_str(),
            attempts: email.attempts,
            received_at: email.received_at,
            last_processed_at: email.last_processed_at,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct ListParams {
    status: Option<String>,
    q: Option<String>,
    limit: Option<usize>,
}

fn parse_status(s: &str) -> Option<EmailStatus> {
    let upper = s.to_uppercase();
    let parsed = EmailStatus::parse(&upper);
    // `parse` falls back to Pending; only accept it when it was asked for.
    (parsed != EmailStatus::Pending || upper == "PENDING").then_some(parsed)
}

// ── Handlers ────────────────────────────────────────────────────────

async fn health_handler(
    State(state): State<OpsState>,
) -> (StatusCode, Json<health::HealthReport>) {
    let report = health::check(&state.db).await;
    let status = if report.is_ok() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

async fn list_emails_handler(
    State(state): State<OpsState>,
    Query(params): Query<ListParams>,
) -> (StatusCode, Json<serde_json::Value>) {
    let status = match params.status.as_deref() {
        None => None,
        Some(raw) => match parse_status(raw) {
            Some(status) => Some(status),
            None => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({"detail": format!("unknown status '{raw}'")})),
                );
            }
        },
    };

    let filter = EmailFilter {
        status,
        query: params.q,
        limit: params.limit.unwrap_or(100),
    };

    match state.db.list_emails(&filter).await {
        Ok(emails) => {
            let views: Vec<EmailView> = emails.iter().map(EmailView::from).collect();
            (
                StatusCode::OK,
                Json(serde_json::json!({"emails": views})),
            )
        }
        Err(e) => {
            error!(error = %e, "Email listing failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"detail": e.to_string()})),
            )
        }
    }
}

async fn email_detail_handler(
    State(state): State<OpsState>,
    Path(id): Path<Uuid>,
) -> (StatusCode, Json<serde_json::Value>) {
    let email = match state.db.get_email(id).await {
        Ok(Some(email)) => email,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({"detail": "email not found"})),
            );
        }
        Err(e) => {
            error!(error = %e, "Email lookup failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"detail": e.to_string()})),
            );
        }
    };

    let logs = state.db.list_integration_logs(id).await.unwrap_or_default();
    let log_views: Vec<serde_json::Value> = logs
        .iter()
        .map(|log| {
            serde_json::json!({
                "channel": log.channel,
                "status": log.status.as_str(),
                "response_code": log.response_code,
                "attempted_at": log.attempted_at,
            })
        })
        .collect();

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "email": EmailView::from(&email),
            "extracted_data": email.extracted_data,
            "integration_logs": log_views,
        })),
    )
}

/// Manual reprocess: reset to PENDING, bump attempts, enqueue one task.
async fn reprocess_handler(
    State(state): State<OpsState>,
    Path(id): Path<Uuid>,
) -> (StatusCode, Json<serde_json::Value>) {
    let status = match state.db.reenqueue_email(id).await {
        Ok(status) => status,
        Err(DatabaseError::NotFound { .. }) => {
            return (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({"detail": "email not found"})),
            );
        }
        Err(e) => {
            error!(id = %id, error = %e, "Re-enqueue failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"detail": e.to_string()})),
            );
        }
    };

    if let Err(e) = state.queue.enqueue(Task::Process(id)) {
        // The row is PENDING; a startup sweep will pick it up.
        error!(id = %id, error = %e, "Failed to enqueue reprocess task");
    }

    info!(id = %id, "Email re-enqueued for processing");
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "detail": "email queued for reprocessing",
            "new_status": status.as_str(),
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::{insert_test_email, test_mailbox};
    use crate::store::LibSqlBackend;

    async fn state() -> (OpsState, tokio::sync::mpsc::UnboundedReceiver<Task>, Uuid) {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let mailbox = test_mailbox();
        db.insert_mailbox(&mailbox).await.unwrap();
        let (queue, rx) = TaskQueue::new();
        (
            OpsState {
                db: db as Arc<dyn Database>,
                queue,
            },
            rx,
            mailbox.id,
        )
    }

    #[tokio::test]
    async fn health_endpoint_reports_ok() {
        let (state, _rx, _) = state().await;
        let (status, Json(report)) = health_handler(State(state)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(report.is_ok());
    }

    #[tokio::test]
    async fn reprocess_unknown_email_is_404() {
        let (state, mut rx, _) = state().await;
        let (status, _) = reprocess_handler(State(state), Path(Uuid::new_v4())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(rx.try_recv().is_err(), "nothing enqueued");
    }

    #[tokio::test]
    async fn reprocess_resets_and_enqueues() {
        let (state, mut rx, mailbox_id) = state().await;
        let id = insert_test_email(state.db.as_ref(), mailbox_id, "<re@example.com>")
            .await
            .unwrap();
        state
            .db
            .update_email_status(id, EmailStatus::RequiresReview)
            .await
            .unwrap();

        let (status, Json(body)) = reprocess_handler(State(state.clone()), Path(id)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["new_status"], "PENDING");
        assert_eq!(rx.try_recv().unwrap(), Task::Process(id));

        let email = state.db.get_email(id).await.unwrap().unwrap();
        assert_eq!(email.status, EmailStatus::Pending);
        assert_eq!(email.attempts, 1);
    }

    #[tokio::test]
    async fn list_rejects_unknown_status() {
        let (state, _rx, _) = state().await;
        let params = ListParams {
            status: Some("SHINY".into()),
            ..Default::default()
        };
        let (status, _) = list_emails_handler(State(state), Query(params)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn list_filters_by_status() {
        let (state, _rx, mailbox_id) = state().await;
        let a = insert_test_email(state.db.as_ref(), mailbox_id, "<a@example.com>")
            .await
            .unwrap();
        let _b = insert_test_email(state.db.as_ref(), mailbox_id, "<b@example.com>")
            .await
            .unwrap();
        state
            .db
            .update_email_status(a, EmailStatus::Failed)
            .await
            .unwrap();

        let params = ListParams {
            status: Some("failed".into()),
            ..Default::default()
        };
        let (status, Json(body)) = list_emails_handler(State(state), Query(params)).await;
        assert_eq!(status, StatusCode::OK);
        let emails = body["emails"].as_array().unwrap();
        assert_eq!(emails.len(), 1);
        assert_eq!(emails[0]["status"], "FAILED");
    }

    #[tokio::test]
    async fn detail_includes_extraction_and_logs() {
        let (state, _rx, mailbox_id) = state().await;
        let id = insert_test_email(state.db.as_ref(), mailbox_id, "<d@example.com>")
            .await
            .unwrap();
        state
            .db
            .store_extracted(id, &serde_json::json!({"document_type": "SERVICE_ORDER"}))
            .await
            .unwrap();
        let log_id = state
            .db
            .insert_integration_log(id, "telegram", &serde_json::json!({}))
            .await
            .unwrap();
        state
            .db
            .complete_integration_log(
                log_id,
                crate::store::IntegrationStatus::Success,
                200,
                &serde_json::json!({"ok": true}),
            )
            .await
            .unwrap();

        let (status, Json(body)) = email_detail_handler(State(state), Path(id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["extracted_data"]["document_type"], "SERVICE_ORDER");
        assert_eq!(body["integration_logs"][0]["status"], "SUCCESS");
    }

    #[test]
    fn status_parsing_is_case_insensitive_and_strict() {
        assert_eq!(parse_status("pending"), Some(EmailStatus::Pending));
        assert_eq!(parse_status("INTEGRATED"), Some(EmailStatus::Integrated));
        assert_eq!(parse_status("requires_review"), Some(EmailStatus::RequiresReview));
        assert_eq!(parse_status("nonsense"), None);
    }
}
