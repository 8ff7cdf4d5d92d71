//! Work dispatch — task queue, worker pool, and the poll scheduler.
//!
//! The queue delivers task references at least once; workers pull one task
//! at a time. Task failures are logged and never tear down a worker —
//! outcome capture lives in the message status, not here.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::ingest::Ingestor;
use crate::pipeline::Orchestrator;
use crate::store::Database;

/// A unit of work pulled by the worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    /// Poll one mailbox for new items.
    Poll(Uuid),
    /// Drive one message through the processing pipeline.
    Process(Uuid),
}

/// Cloneable enqueue handle.
#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::UnboundedSender<Task>,
}

impl TaskQueue {
    /// Create a queue and its single consumer end.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Task>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Submit a task. Fails only when the worker pool is gone.
    pub fn enqueue(&self, task: Task) -> Result<(), mpsc::error::SendError<Task>> {
        self.tx.send(task)
    }
}

/// Everything a worker needs to execute tasks.
#[derive(Clone)]
pub struct WorkerDeps {
    pub ingestor: Arc<Ingestor>,
    pub orchestrator: Arc<Orchestrator>,
}

/// Per-task execution budget. A task past this is abandoned; the message
/// status shows it as in progress until it is manually re-enqueued.
const TASK_BUDGET_SECS: u64 = 90;

/// Spawn `count` workers sharing one receiver. Workers exit when the queue
/// closes.
pub fn spawn_workers(
    count: usize,
    rx: mpsc::UnboundedReceiver<Task>,
    deps: WorkerDeps,
) -> Vec<JoinHandle<()>> {
    let rx = Arc::new(tokio::sync::Mutex::new(rx));
    (0..count.max(1))
        .map(|worker| {
            let rx = Arc::clone(&rx);
            let deps = deps.clone();
            tokio::spawn(async move {
                info!(worker, "Worker started");
                loop {
                    let task = { rx.lock().await.recv().await };
                    let Some(task) = task else {
                        info!(worker, "Queue closed; worker stopping");
                        return;
                    };
                    run_task(worker, task, &deps).await;
                }
            })
        })
        .collect()
}

/// Execute one task within the worker budget. Failures are captured in
/// message/mailbox state and logs; the worker itself never dies on them.
async fn run_task(worker: usize, task: Task, deps: &WorkerDeps) {
    let budget = std::time::Duration::from_secs(TASK_BUDGET_SECS);
    match task {
        Task::Poll(mailbox_id) => {
            match tokio::time::timeout(budget, deps.ingestor.poll(mailbox_id)).await {
                Ok(Ok(created)) => debug!(worker, %mailbox_id, created, "Poll task done"),
                Ok(Err(e)) => warn!(worker, %mailbox_id, error = %e, "Poll task failed"),
                Err(_) => warn!(worker, %mailbox_id, "Poll task exceeded budget; abandoned"),
            }
        }
        Task::Process(message_id) => {
            match tokio::time::timeout(budget, deps.orchestrator.process(message_id)).await {
                Ok(Ok(status)) => {
                    debug!(worker, %message_id, status = status.as_str(), "Process task done");
                }
                Ok(Err(e)) => warn!(worker, %message_id, error = %e, "Process task failed"),
                Err(_) => {
                    warn!(worker, %message_id, "Process task exceeded budget; abandoned");
                }
            }
        }
    }
}

/// Spawn the poll scheduler: on every cron fire, enqueue a `Poll` task per
/// active mailbox. Returns the join handle and a shutdown flag.
pub fn spawn_poll_scheduler(
    db: Arc<dyn Database>,
    queue: TaskQueue,
    schedule: cron::Schedule,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(schedule = %schedule, "Poll scheduler started");
        loop {
            let Some(next) = schedule.upcoming(Utc).next() else {
                warn!("Poll schedule has no upcoming fire times; scheduler stopping");
                return;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Poll scheduler shutting down");
                return;
            }

            let mailboxes = match db.list_active_mailboxes().await {
                Ok(mailboxes) => mailboxes,
                Err(e) => {
                    error!(error = %e, "Failed to list mailboxes for polling");
                    continue;
                }
            };

            for mailbox in mailboxes {
                if let Err(e) = queue.enqueue(Task::Poll(mailbox.id)) {
                    error!(mailbox = %mailbox.name, error = %e, "Failed to enqueue poll task");
                }
            }
        }
    });

    (handle, shutdown_flag)
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn enqueue_delivers_in_order() {
        let (queue, mut rx) = TaskQueue::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        queue.enqueue(Task::Poll(a)).unwrap();
        queue.enqueue(Task::Process(b)).unwrap();

        assert_eq!(rx.try_recv().unwrap(), Task::Poll(a));
        assert_eq!(rx.try_recv().unwrap(), Task::Process(b));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn enqueue_fails_when_consumer_is_gone() {
        let (queue, rx) = TaskQueue::new();
        drop(rx);
        assert!(queue.enqueue(Task::Poll(Uuid::new_v4())).is_err());
    }

    #[test]
    fn clones_share_one_queue() {
        let (queue, mut rx) = TaskQueue::new();
        let other = queue.clone();
        other.enqueue(Task::Poll(Uuid::new_v4())).unwrap();
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn default_schedule_fires_every_five_minutes() {
        let schedule = cron::Schedule::from_str(crate::config::DEFAULT_POLL_CRON).unwrap();
        let mut fires = schedule.upcoming(Utc);
        let first = fires.next().unwrap();
        let second = fires.next().unwrap();
        assert_eq!((second - first).num_minutes(), 5);
    }
}
