//! Deferred transfer queue and the worker that drains it.
//!
//! The dispatcher publishes fire-and-forget; callers never block on the
//! remote copy. The worker pulls one job at a time, copies bytes to the
//! destination tier, and only then moves the metadata pointer, so a crash
//! mid-transfer can leak an unreferenced destination copy but never leave
//! a dangling pointer. Failed jobs are retried a bounded number of times
//! and then dead-lettered.

use crate::models::transfer::TransferJob;
use crate::services::metadata::MetadataStore;
use crate::services::session_store::SessionStore;
use crate::services::tiers::{TierError, TierSet};
use async_trait::async_trait;
use futures::StreamExt;
use redis::{AsyncCommands, aio::ConnectionManager};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error(transparent)]
    Tier(#[from] TierError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Durable-ish job transport between the upload path and the worker.
#[async_trait]
pub trait TransferQueue: Send + Sync {
    /// Fire-and-forget enqueue. Returns false on failure; callers log and
    /// carry on, the object stays readable from its current tier.
    async fn publish(&self, job: &TransferJob) -> bool;

    /// Next job, blocking until one arrives. `None` means the queue is
    /// closed and the worker should exit.
    async fn next(&self) -> Option<TransferJob>;

    /// Park a permanently failing job where an operator can find it.
    async fn dead_letter(&self, job: &TransferJob);
}

/// In-process queue over a tokio channel. Used in tests and single-node
/// deployments without Redis.
pub struct ChannelTransferQueue {
    tx: mpsc::UnboundedSender<TransferJob>,
    rx: AsyncMutex<mpsc::UnboundedReceiver<TransferJob>>,
    dead: std::sync::Mutex<Vec<TransferJob>>,
}

impl ChannelTransferQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: AsyncMutex::new(rx),
            dead: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Jobs that exhausted their retries.
    pub fn dead_letters(&self) -> Vec<TransferJob> {
        self.dead.lock().expect("dead-letter list poisoned").clone()
    }
}

impl Default for ChannelTransferQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransferQueue for ChannelTransferQueue {
    async fn publish(&self, job: &TransferJob) -> bool {
        self.tx.send(job.clone()).is_ok()
    }

    async fn next(&self) -> Option<TransferJob> {
        self.rx.lock().await.recv().await
    }

    async fn dead_letter(&self, job: &TransferJob) {
        self.dead
            .lock()
            .expect("dead-letter list poisoned")
            .push(job.clone());
    }
}

/// Redis-list backed queue: RPUSH to publish, BLPOP to consume,
/// `<queue>:dead` for dead letters.
#[derive(Clone)]
pub struct RedisTransferQueue {
    conn: ConnectionManager,
    queue_key: String,
}

impl RedisTransferQueue {
    pub async fn connect(url: &str, queue_key: impl Into<String>) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self {
            conn,
            queue_key: queue_key.into(),
        })
    }

    fn dead_key(&self) -> String {
        format!("{}:dead", self.queue_key)
    }
}

#[async_trait]
impl TransferQueue for RedisTransferQueue {
    async fn publish(&self, job: &TransferJob) -> bool {
        let payload = match serde_json::to_string(job) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("failed to encode transfer job: {err}");
                return false;
            }
        };
        let mut conn = self.conn.clone();
        match conn.rpush::<_, _, ()>(&self.queue_key, payload).await {
            Ok(()) => true,
            Err(err) => {
                warn!("failed to enqueue transfer job: {err}");
                false
            }
        }
    }

    async fn next(&self) -> Option<TransferJob> {
        loop {
            let mut conn = self.conn.clone();
            let popped: Result<Option<(String, String)>, _> =
                conn.blpop(&self.queue_key, 5.0).await;
            match popped {
                Ok(Some((_, payload))) => match serde_json::from_str(&payload) {
                    Ok(job) => return Some(job),
                    Err(err) => {
                        warn!("dropping undecodable transfer job: {err}");
                        continue;
                    }
                },
                // Timeout with no job; keep waiting.
                Ok(None) => continue,
                Err(err) => {
                    warn!("transfer queue read failed, retrying: {err}");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    async fn dead_letter(&self, job: &TransferJob) {
        if let Ok(payload) = serde_json::to_string(job) {
            let mut conn = self.conn.clone();
            if let Err(err) = conn.rpush::<_, _, ()>(self.dead_key(), payload).await {
                error!("failed to dead-letter transfer job: {err}");
            }
        }
    }
}

/// Long-lived consumer moving objects between tiers.
pub struct TransferWorker {
    queue: Arc<dyn TransferQueue>,
    tiers: TierSet,
    metadata: MetadataStore,
    sessions: Arc<dyn SessionStore>,
    scratch_dir: PathBuf,
    max_attempts: u32,
    retry_delay: Duration,
}

impl TransferWorker {
    pub fn new(
        queue: Arc<dyn TransferQueue>,
        tiers: TierSet,
        metadata: MetadataStore,
        sessions: Arc<dyn SessionStore>,
        scratch_dir: impl Into<PathBuf>,
        max_attempts: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            queue,
            tiers,
            metadata,
            sessions,
            scratch_dir: scratch_dir.into(),
            max_attempts: max_attempts.max(1),
            retry_delay,
        }
    }

    /// Consume jobs until the queue closes. One transfer in flight per
    /// worker; run more workers for throughput.
    pub async fn run(self) {
        info!("transfer worker started");
        while let Some(job) = self.queue.next().await {
            if let Err(err) = self.process(&job).await {
                let attempt = job.attempts + 1;
                if attempt >= self.max_attempts {
                    error!(
                        content_hash = %job.content_hash,
                        attempt,
                        "transfer failed permanently, dead-lettering: {err}"
                    );
                    self.queue.dead_letter(&job).await;
                } else {
                    warn!(
                        content_hash = %job.content_hash,
                        attempt,
                        "transfer failed, requeueing: {err}"
                    );
                    tokio::time::sleep(self.retry_delay * attempt).await;
                    let retry = job.retry();
                    if !self.queue.publish(&retry).await {
                        self.queue.dead_letter(&retry).await;
                    }
                }
            }
        }
        info!("transfer queue closed, worker exiting");
    }

    /// Handle one job end to end, deduplicating concurrent transfers of
    /// the same content hash across worker instances.
    pub async fn process(&self, job: &TransferJob) -> Result<(), TransferError> {
        match self.sessions.try_lock_transfer(&job.content_hash).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(content_hash = %job.content_hash, "transfer already in flight, skipping");
                return Ok(());
            }
            // Lock service unavailable: proceed without dedup rather than
            // stall the queue.
            Err(err) => warn!("transfer lock unavailable: {err}"),
        }

        let result = self.copy_and_repoint(job).await;
        if let Err(err) = self.sessions.unlock_transfer(&job.content_hash).await {
            warn!("failed to release transfer lock: {err}");
        }
        result
    }

    async fn copy_and_repoint(&self, job: &TransferJob) -> Result<(), TransferError> {
        let source = self.tiers.client(job.source_tier);
        let dest = self.tiers.client(job.dest_tier);

        // Spool through scratch so the destination put sees a complete file.
        let spool = self
            .scratch_dir
            .join(format!(".transfer-{}", Uuid::new_v4()));
        let mut stream = source.get(&job.source_location, None).await?;
        let mut file = File::create(&spool).await?;
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&spool).await;
                    return Err(err.into());
                }
            };
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&spool).await;
                return Err(err.into());
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&spool).await;
            return Err(err.into());
        }
        drop(file);

        let put_result = dest.put_path(&job.dest_location, &spool).await;
        let _ = fs::remove_file(&spool).await;
        put_result?;

        // Pointer moves only after the destination write is confirmed.
        let updated = self
            .metadata
            .update_location(&job.content_hash, job.dest_tier, &job.dest_location)
            .await?;
        if !updated {
            warn!(content_hash = %job.content_hash, "no file record for transferred object");
            return Ok(());
        }

        // The stale source copy is unreferenced now; reclaim it best-effort.
        if job.source_tier != job.dest_tier {
            if let Err(err) = source.delete(&job.source_location).await {
                debug!("failed to remove stale source copy: {err}");
            }
        }

        info!(
            content_hash = %job.content_hash,
            from = %job.source_tier,
            to = %job.dest_tier,
            "transfer complete"
        );
        Ok(())
    }
}
