use std::sync::Arc;

use anyhow::Context;

use mailsift::config::AppConfig;
use mailsift::dispatch::{TaskQueue, WorkerDeps, spawn_poll_scheduler, spawn_workers};
use mailsift::extract::ExtractionGateway;
use mailsift::ingest::Ingestor;
use mailsift::notify::{NotificationDispatcher, SmtpChannel, TelegramChannel};
use mailsift::ops::{OpsState, ops_router};
use mailsift::pipeline::Orchestrator;
use mailsift::store::{Database, EmailFilter, EmailStatus, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env().context("invalid configuration")?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        db = %config.db_path,
        workers = config.workers,
        "mailsift starting"
    );

    // ── Store ───────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(std::path::Path::new(&config.db_path))
            .await
            .context("failed to open database")?,
    );

    // ── Notification channels ───────────────────────────────────────
    let mut dispatcher = NotificationDispatcher::new(Arc::clone(&db));
    if let Some(telegram) = config.telegram.clone() {
        dispatcher = dispatcher.with_channel(Arc::new(TelegramChannel::new(telegram)));
    }
    if let Some(smtp) = config.smtp.clone() {
        dispatcher = dispatcher.with_channel(Arc::new(SmtpChannel::new(smtp)));
    }
    let dispatcher = Arc::new(dispatcher);
    tracing::info!(channels = ?dispatcher.channel_names(), "Notification channels ready");

    // ── Pipeline ────────────────────────────────────────────────────
    let gateway = Arc::new(ExtractionGateway::from_config(config.extraction.clone()));
    let (queue, task_rx) = TaskQueue::new();

    let ingestor = Arc::new(Ingestor::new(
        Arc::clone(&db),
        Arc::clone(&dispatcher),
        queue.clone(),
        config.ingest.clone(),
    ));
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&db),
        gateway,
        Arc::clone(&dispatcher),
        "telegram",
    ));

    let _workers = spawn_workers(
        config.workers,
        task_rx,
        WorkerDeps {
            ingestor,
            orchestrator,
        },
    );

    // ── Startup recovery: re-enqueue messages stuck at PENDING ──────
    let pending = db
        .list_emails(&EmailFilter {
            status: Some(EmailStatus::Pending),
            query: None,
            limit: 500,
        })
        .await
        .unwrap_or_default();
    if !pending.is_empty() {
        tracing::info!(count = pending.len(), "Re-enqueueing pending messages");
        for email in &pending {
            let _ = queue.enqueue(mailsift::dispatch::Task::Process(email.id));
        }
    }

    // ── Poll scheduler ──────────────────────────────────────────────
    let schedule: cron::Schedule = config
        .poll_cron
        .parse()
        .context("invalid poll schedule")?;
    let (_scheduler, _scheduler_shutdown) =
        spawn_poll_scheduler(Arc::clone(&db), queue.clone(), schedule);

    // ── Ops server ──────────────────────────────────────────────────
    let router = ops_router(OpsState {
        db: Arc::clone(&db),
        queue,
    });
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.ops_port))
        .await
        .with_context(|| format!("failed to bind ops port {}", config.ops_port))?;
    tracing::info!(port = config.ops_port, "Ops server listening");

    axum::serve(listener, router)
        .await
        .context("ops server failed")?;
    Ok(())
}
