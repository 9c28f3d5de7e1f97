//! Ordered write-behind queue for durable match stats
//!
//! The tick only ever calls [`PersistenceQueue::enqueue`], which never blocks.
//! A single [`PersistenceWorker`] drains jobs in order and retries failures at
//! the head of the queue.

use futures::future::BoxFuture;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::game::entities::UserId;
use crate::ws::protocol::PlayerResult;

use super::supabase::SupabaseError;

pub const MAX_ATTEMPTS: u32 = 5;
/// Back-off grows linearly with the attempt number
pub const RETRY_BASE_DELAY: Duration = Duration::from_millis(250);

/// A durable write produced by the simulation
#[derive(Debug, Clone, PartialEq)]
pub enum PersistJob {
    StartSession {
        session_id: Uuid,
        lobby_id: String,
        participants: Vec<UserId>,
    },
    RecordKill {
        session_id: Uuid,
        killer_id: UserId,
        victim_id: UserId,
    },
    FinishSession {
        session_id: Uuid,
        lobby_id: String,
        winner_id: UserId,
        results: Vec<PlayerResult>,
    },
}

impl PersistJob {
    pub fn kind(&self) -> &'static str {
        match self {
            PersistJob::StartSession { .. } => "start_session",
            PersistJob::RecordKill { .. } => "record_kill",
            PersistJob::FinishSession { .. } => "finish_session",
        }
    }
}

/// Storage backend the worker writes through
pub trait StatsWriter: Send + Sync + 'static {
    fn write<'a>(&'a self, job: &'a PersistJob) -> BoxFuture<'a, Result<(), SupabaseError>>;
}

/// Producer side, cheap to clone
#[derive(Clone)]
pub struct PersistenceQueue {
    tx: mpsc::UnboundedSender<PersistJob>,
    pending: Arc<AtomicUsize>,
}

impl PersistenceQueue {
    /// Create a queue and the worker that drains it
    pub fn channel<W: StatsWriter>(writer: W) -> (Self, PersistenceWorker<W>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let queue = Self {
            tx,
            pending: pending.clone(),
        };
        let worker = PersistenceWorker {
            rx,
            writer,
            pending,
            retry_delay: RETRY_BASE_DELAY,
        };
        (queue, worker)
    }

    pub fn enqueue(&self, job: PersistJob) {
        debug!(job = job.kind(), "Persistence job queued");
        self.pending.fetch_add(1, Ordering::Relaxed);
        if self.tx.send(job).is_err() {
            self.pending.fetch_sub(1, Ordering::Relaxed);
            warn!("Persistence worker is gone, dropping job");
        }
    }

    /// Jobs queued or in flight
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }
}

/// Consumer side; run exactly one per queue
pub struct PersistenceWorker<W> {
    rx: mpsc::UnboundedReceiver<PersistJob>,
    writer: W,
    pending: Arc<AtomicUsize>,
    retry_delay: Duration,
}

impl<W: StatsWriter> PersistenceWorker<W> {
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Drain until every producer is dropped
    pub async fn run(mut self) {
        info!("Persistence worker started");
        while let Some(job) = self.rx.recv().await {
            self.process(job).await;
        }
        info!("Persistence worker stopped");
    }

    /// Write one job, retrying in place so later jobs never overtake it
    async fn process(&self, job: PersistJob) {
        for attempt in 1..=MAX_ATTEMPTS {
            match self.writer.write(&job).await {
                Ok(()) => {
                    debug!(job = job.kind(), attempt, "Persistence job written");
                    break;
                }
                Err(e) if e.is_permanent() => {
                    error!(job = job.kind(), error = %e, "Persistence job rejected, dropping");
                    break;
                }
                Err(e) if attempt == MAX_ATTEMPTS => {
                    error!(job = job.kind(), attempts = attempt, error = %e, "Persistence job failed, dropping");
                }
                Err(e) => {
                    warn!(job = job.kind(), attempt, error = %e, "Persistence job failed, retrying");
                    tokio::time::sleep(self.retry_delay * attempt).await;
                }
            }
        }
        self.pending.fetch_sub(1, Ordering::Relaxed);
    }
}
