//! In-process email job queue.
//!
//! Jobs are accepted by the HTTP layer and handed to a single background
//! worker over a bounded channel. The worker processes them one at a time.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Result, TollboothError};

/// An email to send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailJob {
    pub to: String,
    pub subject: String,
    pub text: String,
}

/// A job with its queue-assigned id.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub id: u64,
    pub job: EmailJob,
}

/// Sending side of the job queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<QueuedJob>,
    /// Id handed to the next accepted job
    next_id: Arc<Mutex<u64>>,
}

impl JobQueue {
    /// Create a queue holding at most `capacity` pending jobs.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<QueuedJob>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let queue = Self {
            tx,
            next_id: Arc::new(Mutex::new(1)),
        };
        (queue, rx)
    }

    /// Add a job without waiting. Returns the job id.
    ///
    /// Ids are only consumed by accepted jobs, so they stay gapless.
    pub fn enqueue(&self, job: EmailJob) -> Result<u64> {
        let mut next_id = self.next_id.lock();
        let id = *next_id;
        match self.tx.try_send(QueuedJob { id, job }) {
            Ok(()) => {
                *next_id += 1;
                debug!(job_id = id, "Email job added to queue");
                Ok(id)
            }
            Err(TrySendError::Full(_)) => Err(TollboothError::Queue("queue is full".to_string())),
            Err(TrySendError::Closed(_)) => Err(TollboothError::Queue("queue is closed".to_string())),
        }
    }
}

/// Totals reported by a worker once its queue closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub processed: u64,
    pub failed: u64,
}

/// Spawn the worker task draining `rx`.
pub fn spawn_worker(rx: mpsc::Receiver<QueuedJob>) -> JoinHandle<WorkerStats> {
    tokio::spawn(run_worker(rx))
}

/// Process jobs until every sender is dropped.
pub async fn run_worker(mut rx: mpsc::Receiver<QueuedJob>) -> WorkerStats {
    info!("Email worker started");
    let mut stats = WorkerStats::default();

    while let Some(queued) = rx.recv().await {
        match deliver(&queued.job) {
            Ok(()) => stats.processed += 1,
            Err(reason) => {
                warn!(job_id = queued.id, "Job {} failed with error {}", queued.id, reason);
                stats.failed += 1;
            }
        }
    }

    info!(
        processed = stats.processed,
        failed = stats.failed,
        "Email worker stopped"
    );
    stats
}

fn deliver(job: &EmailJob) -> std::result::Result<(), String> {
    if job.to.trim().is_empty() {
        return Err("missing recipient".to_string());
    }
    info!("Sending email to {}: {} - {}", job.to, job.subject, job.text);
    Ok(())
}
