use crate::{
    config::QueueNames,
    deadline::within,
    error::ReconcileError,
    fence::{FenceDecision, decide},
};
use chrono::{DateTime, Utc};
use harvest_core::{
    broker::{Delivery, MessageBroker, MessageProperties},
    clock::Clock,
    error::BrokerError,
};
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

/// Outcome of one pass over the staging queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub forwarded: u64,
    pub discarded: u64,
}

impl DrainReport {
    pub fn total(&self) -> u64 {
        self.forwarded + self.discarded
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagedBatch {
    pub confirmed: u64,
    /// Shared enqueue timestamp of every record in the batch.
    pub staged_at: DateTime<Utc>,
}

/// The staging and main queues on top of a [`MessageBroker`].
#[derive(Clone)]
pub struct MessageBuffer {
    broker: Arc<dyn MessageBroker>,
    clock: Arc<dyn Clock>,
    queues: QueueNames,
    call_timeout: Option<Duration>,
}

impl MessageBuffer {
    pub fn new(
        broker: Arc<dyn MessageBroker>,
        clock: Arc<dyn Clock>,
        queues: QueueNames,
        call_timeout: Option<Duration>,
    ) -> Self {
        Self {
            broker,
            clock,
            queues,
            call_timeout,
        }
    }

    pub fn queues(&self) -> &QueueNames {
        &self.queues
    }

    pub async fn ensure_queues(&self) -> Result<(), ReconcileError> {
        for queue in [&self.queues.main, &self.queues.staging] {
            let ready = within(
                self.call_timeout,
                self.broker.declare_durable_queue(queue),
                BrokerError::Timeout,
            )
            .await?;
            debug!(queue = %queue, ready, "Queue declared");
        }
        Ok(())
    }

    /// Publishes `records` to the staging queue under one shared timestamp
    /// and waits until the broker has confirmed all of them.
    pub async fn stage(&self, records: &[Vec<u8>]) -> Result<StagedBatch, ReconcileError> {
        let staged_at = self.clock.now();
        let total = records.len() as u64;
        let properties = MessageProperties::persistent().with_timestamp(staged_at);

        for (idx, record) in records.iter().enumerate() {
            debug!("Sending record {}/{} to staging queue", idx + 1, total);

            let published = within(
                self.call_timeout,
                self.broker
                    .publish(&self.queues.staging, record, properties.clone()),
                BrokerError::Timeout,
            )
            .await;

            if let Err(source) = published {
                return Err(self.interrupted_batch(idx as u64, total, source).await);
            }
        }

        within(
            self.call_timeout,
            self.broker.wait_for_confirms(),
            BrokerError::Timeout,
        )
        .await?;

        info!(records = total, staged_at = %staged_at.to_rfc3339(), "Batch staged");
        Ok(StagedBatch {
            confirmed: total,
            staged_at,
        })
    }

    /// Works out how much of a failed batch the broker still confirms.
    async fn interrupted_batch(
        &self,
        published: u64,
        total: u64,
        source: BrokerError,
    ) -> ReconcileError {
        if published == 0 {
            return ReconcileError::BufferUnavailable(source);
        }

        let confirmed = within(
            self.call_timeout,
            self.broker.wait_for_confirms(),
            BrokerError::Timeout,
        )
        .await;

        match confirmed {
            Ok(()) => {
                warn!(confirmed = published, total, error = %source, "Batch only partially staged");
                ReconcileError::PartialBatchStaged {
                    confirmed: published,
                    total,
                    source,
                }
            }
            Err(confirm_err) => {
                warn!(error = %confirm_err, "Could not confirm partially staged batch");
                ReconcileError::BufferUnavailable(source)
            }
        }
    }

    /// Empties the staging queue, forwarding each message that predates
    /// `fence` to the main queue and discarding the rest.
    ///
    /// Messages are handled strictly one at a time in dequeue order. On a
    /// broker error the drain stops; the message in hand and everything
    /// behind it stay unacknowledged in staging for a later drain.
    pub async fn drain_staging(
        &self,
        fence: Option<DateTime<Utc>>,
    ) -> Result<DrainReport, ReconcileError> {
        let expected = self.staging_depth().await?;
        let mut report = DrainReport::default();

        while let Some(delivery) = self.next_staged().await? {
            debug!(
                "Handling message {}/{}",
                report.total() + 1,
                expected.max(report.total() + 1)
            );

            match decide(fence, delivery.properties.timestamp) {
                FenceDecision::Forward => {
                    self.forward(&delivery).await?;
                    self.acknowledge(&delivery).await?;
                    report.forwarded += 1;
                }
                FenceDecision::Discard => {
                    self.acknowledge(&delivery).await?;
                    report.discarded += 1;
                }
            }
        }

        info!(
            forwarded = report.forwarded,
            discarded = report.discarded,
            fence = ?fence.map(|f| f.to_rfc3339()),
            "Staging queue drained"
        );
        Ok(report)
    }

    pub async fn main_queue_depth(&self) -> Result<u64, ReconcileError> {
        self.depth(&self.queues.main).await
    }

    pub async fn staging_depth(&self) -> Result<u64, ReconcileError> {
        self.depth(&self.queues.staging).await
    }

    /// Head of the staging queue, left in place.
    pub async fn peek_staging(&self, limit: usize) -> Result<Vec<Delivery>, ReconcileError> {
        self.peek(&self.queues.staging, limit).await
    }

    /// Head of the main queue, left in place.
    pub async fn peek_main(&self, limit: usize) -> Result<Vec<Delivery>, ReconcileError> {
        self.peek(&self.queues.main, limit).await
    }

    async fn peek(&self, queue: &str, limit: usize) -> Result<Vec<Delivery>, ReconcileError> {
        Ok(within(
            self.call_timeout,
            self.broker.peek(queue, limit),
            BrokerError::Timeout,
        )
        .await?)
    }

    async fn depth(&self, queue: &str) -> Result<u64, ReconcileError> {
        Ok(within(
            self.call_timeout,
            self.broker.queue_depth(queue),
            BrokerError::Timeout,
        )
        .await?)
    }

    async fn next_staged(&self) -> Result<Option<Delivery>, ReconcileError> {
        within(
            self.call_timeout,
            self.broker.get(&self.queues.staging),
            BrokerError::Timeout,
        )
        .await
        .map_err(|e| {
            warn!(error = %e, "Drain aborted while fetching from staging");
            ReconcileError::BufferUnavailable(e)
        })
    }

    /// Copies the payload into the main queue and waits for its confirm
    /// before the staging copy may be acknowledged.
    async fn forward(&self, delivery: &Delivery) -> Result<(), ReconcileError> {
        let published = within(
            self.call_timeout,
            self.broker.publish(
                &self.queues.main,
                &delivery.payload,
                MessageProperties::persistent(),
            ),
            BrokerError::Timeout,
        )
        .await;

        let result = match published {
            Ok(()) => {
                within(
                    self.call_timeout,
                    self.broker.wait_for_confirms(),
                    BrokerError::Timeout,
                )
                .await
            }
            Err(e) => Err(e),
        };

        result.map_err(|e| {
            warn!(tag = delivery.tag, error = %e, "Drain aborted while forwarding");
            ReconcileError::BufferUnavailable(e)
        })
    }

    async fn acknowledge(&self, delivery: &Delivery) -> Result<(), ReconcileError> {
        within(
            self.call_timeout,
            self.broker.ack(delivery),
            BrokerError::Timeout,
        )
        .await
        .map_err(|e| {
            warn!(tag = delivery.tag, error = %e, "Drain aborted while acknowledging");
            ReconcileError::BufferUnavailable(e)
        })
    }
}
