#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use harvest_core::{
    broker::{MessageBroker, sled_broker::SledBroker},
    clock::ManualClock,
    store::{DocumentStore, sled_store::SledDocumentStore},
};
use harvest_sync::{
    buffer::MessageBuffer,
    config::{QueueNames, ReconcilerConfig},
    reconciler::Reconciler,
};
use std::sync::Arc;
use tempfile::TempDir;
use utils::{BrokerOp, FlakyBroker, ObservedStore, SlowBroker};

pub mod integration;
pub mod utils;

/// A harvest environment backed by one on-disk sled database.
///
/// Dropping a [`Reconciler`] and building a new one over the same
/// `store`/`broker` stands in for a process restart.
pub struct Harness {
    _dir: TempDir,
    pub store: Arc<SledDocumentStore>,
    pub broker: Arc<SledBroker>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let db = sled::open(dir.path()).expect("open sled");
        let store = Arc::new(SledDocumentStore::from_db(&db).expect("open state tree"));
        let broker = Arc::new(SledBroker::from_db(db).expect("open broker"));
        // Every reading moves the clock one second, so a batch staged inside
        // `commit_and_drain` always predates the commit that follows it.
        let clock = Arc::new(ManualClock::ticking(at(9, 0, 0), Duration::seconds(1)));

        Self {
            _dir: dir,
            store,
            broker,
            clock,
        }
    }

    /// A fresh reconciler over this environment's store and broker.
    pub fn reconciler(&self) -> Reconciler {
        self.reconciler_over(
            self.store.clone(),
            self.broker.clone(),
            ReconcilerConfig::default(),
        )
    }

    /// A reconciler reaching this environment through wrapped collaborators.
    pub fn reconciler_over(
        &self,
        store: Arc<dyn DocumentStore>,
        broker: Arc<dyn MessageBroker>,
        config: ReconcilerConfig,
    ) -> Reconciler {
        Reconciler::with_clock(store, broker, config, self.clock.clone())
    }

    /// Stages records straight into the default queues without committing,
    /// the way a harvester that crashed mid-commit leaves them.
    pub fn producer(&self) -> MessageBuffer {
        MessageBuffer::new(
            self.broker.clone(),
            self.clock.clone(),
            QueueNames::default(),
            None,
        )
    }

    pub fn flaky_broker(&self) -> Arc<FlakyBroker> {
        Arc::new(FlakyBroker::new(self.broker.clone()))
    }

    pub fn slow_broker(&self, op: BrokerOp, delay: std::time::Duration) -> Arc<SlowBroker> {
        Arc::new(SlowBroker::new(self.broker.clone(), op, delay))
    }

    pub fn observed_store(&self, read_delay: std::time::Duration) -> Arc<ObservedStore> {
        Arc::new(ObservedStore::slow(self.store.clone(), read_delay))
    }

    /// Decoded payloads of `queue`, head first, without consuming them.
    pub async fn payloads(&self, queue: &str) -> Vec<serde_json::Value> {
        self.broker
            .peek(queue, usize::MAX)
            .await
            .expect("peek queue")
            .into_iter()
            .map(|d| serde_json::from_slice(&d.payload).expect("json payload"))
            .collect()
    }

    pub async fn depth(&self, queue: &str) -> u64 {
        self.broker.queue_depth(queue).await.expect("queue depth")
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

pub fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, h, m, s)
        .single()
        .expect("valid test instant")
}

/// `n` JSON records tagged with `batch`, serialized the way a harvester
/// hands them over.
pub fn records(batch: &str, n: usize) -> Vec<Vec<u8>> {
    (0..n)
        .map(|i| {
            serde_json::json!({ "batch": batch, "seq": i })
                .to_string()
                .into_bytes()
        })
        .collect()
}
