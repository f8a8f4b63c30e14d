use crate::{
    buffer::{DrainReport, MessageBuffer},
    checkpoint::CheckpointStore,
    config::{QueueNames, ReconcilerConfig},
    error::ReconcileError,
};
use chrono::{DateTime, Utc};
use harvest_core::{
    broker::{Delivery, MessageBroker},
    clock::{Clock, SystemClock},
    models::{Checkpoint, StateUpdate},
    store::DocumentStore,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// What a `commit_and_drain` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CommitReport {
    pub committed_at: DateTime<Utc>,
    pub staged: u64,
    /// `None` when the batch was empty and no drain ran.
    pub drain: Option<DrainReport>,
    pub main_queue_depth: Option<u64>,
}

/// Keeps the checkpoint and the record queues consistent.
///
/// The checkpoint timestamp fences every drain: staged messages older than
/// it are replayed into the main queue, the rest are dropped. One instance
/// runs at most one drain at a time and only exposes read access to the
/// queues; separate processes sharing the same store and broker must be
/// serialized by the caller.
pub struct Reconciler {
    checkpoints: CheckpointStore,
    buffer: MessageBuffer,
    drain_lock: Mutex<()>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        broker: Arc<dyn MessageBroker>,
        config: ReconcilerConfig,
    ) -> Self {
        Self::with_clock(store, broker, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn DocumentStore>,
        broker: Arc<dyn MessageBroker>,
        config: ReconcilerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            checkpoints: CheckpointStore::new(store, clock.clone(), config.call_timeout),
            buffer: MessageBuffer::new(broker, clock, config.queues, config.call_timeout),
            drain_lock: Mutex::new(()),
        }
    }

    pub fn queues(&self) -> &QueueNames {
        self.buffer.queues()
    }

    /// Reads the last persisted checkpoint.
    pub async fn checkpoint(&self) -> Result<Checkpoint, ReconcileError> {
        self.checkpoints.read().await
    }

    pub async fn staging_depth(&self) -> Result<u64, ReconcileError> {
        self.buffer.ensure_queues().await?;
        self.buffer.staging_depth().await
    }

    pub async fn main_queue_depth(&self) -> Result<u64, ReconcileError> {
        self.buffer.ensure_queues().await?;
        self.buffer.main_queue_depth().await
    }

    /// Lists the head of the staging queue without consuming it.
    pub async fn peek_staging(&self, limit: usize) -> Result<Vec<Delivery>, ReconcileError> {
        self.buffer.ensure_queues().await?;
        self.buffer.peek_staging(limit).await
    }

    /// Lists the head of the main queue without consuming it.
    pub async fn peek_main(&self, limit: usize) -> Result<Vec<Delivery>, ReconcileError> {
        self.buffer.ensure_queues().await?;
        self.buffer.peek_main(limit).await
    }

    /// Stages `records`, persists `update` and, if anything was staged,
    /// drains the staging queue against the new commit timestamp.
    ///
    /// A crash between any two steps is recovered by [`Reconciler::recover`]:
    /// before the write, the orphaned batch postdates the old fence and is
    /// dropped; after it, the batch predates the new fence and is replayed.
    pub async fn commit_and_drain(
        &self,
        update: StateUpdate,
        records: &[Vec<u8>],
    ) -> Result<CommitReport, ReconcileError> {
        let _guard = self.drain_lock.lock().await;

        self.buffer.ensure_queues().await?;

        let staged = if records.is_empty() {
            0
        } else {
            self.buffer.stage(records).await?.confirmed
        };

        let committed_at = self.checkpoints.write(update).await?;

        if staged == 0 {
            return Ok(CommitReport {
                committed_at,
                staged,
                drain: None,
                main_queue_depth: None,
            });
        }

        info!("Requeuing staged records");
        let drain = self.buffer.drain_staging(Some(committed_at)).await?;
        let depth = self.buffer.main_queue_depth().await?;

        Ok(CommitReport {
            committed_at,
            staged,
            drain: Some(drain),
            main_queue_depth: Some(depth),
        })
    }

    /// Flushes any staging backlog against the last known checkpoint
    /// without writing a new one.
    pub async fn recover(&self) -> Result<DrainReport, ReconcileError> {
        let _guard = self.drain_lock.lock().await;

        self.buffer.ensure_queues().await?;
        let checkpoint = self.checkpoints.read().await?;

        info!(
            status = %checkpoint.status,
            fence = ?checkpoint.timestamp.map(|t| t.to_rfc3339()),
            "Recovering staging backlog"
        );
        let report = self.buffer.drain_staging(checkpoint.timestamp).await?;

        info!(
            "Forwarded {} messages, discarded {}",
            report.forwarded, report.discarded
        );
        Ok(report)
    }
}
