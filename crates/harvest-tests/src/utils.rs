use async_trait::async_trait;
use harvest_core::{
    broker::{Delivery, MessageBroker, MessageProperties},
    error::{BrokerError, StoreError},
    models::Document,
    store::DocumentStore,
};
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::time::sleep;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrokerOp {
    Declare,
    Publish,
    Confirm,
    Get,
    Ack,
    Depth,
    Peek,
}

#[derive(Debug, Clone)]
struct Fault {
    op: BrokerOp,
    queue: Option<String>,
    after: u64,
}

/// Wraps a broker and makes selected operations fail once they have
/// succeeded `after` times, simulating a broker that drops mid-batch.
pub struct FlakyBroker {
    inner: Arc<dyn MessageBroker>,
    faults: Mutex<Vec<Fault>>,
    calls: Mutex<HashMap<(BrokerOp, Option<String>), u64>>,
}

impl FlakyBroker {
    pub fn new(inner: Arc<dyn MessageBroker>) -> Self {
        Self {
            inner,
            faults: Mutex::new(Vec::new()),
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Fails `op` (on `queue`, or on any queue when `None`) after `after`
    /// successful calls.
    pub fn fail(&self, op: BrokerOp, queue: Option<&str>, after: u64) {
        self.faults.lock().unwrap().push(Fault {
            op,
            queue: queue.map(str::to_string),
            after,
        });
    }

    /// Removes every fault and forgets call counts.
    pub fn heal(&self) {
        self.faults.lock().unwrap().clear();
        self.calls.lock().unwrap().clear();
    }

    fn check(&self, op: BrokerOp, queue: Option<&str>) -> Result<(), BrokerError> {
        let faults = self.faults.lock().unwrap();
        let mut calls = self.calls.lock().unwrap();

        for fault in faults.iter().filter(|f| f.op == op) {
            if fault.queue.is_some() && fault.queue.as_deref() != queue {
                continue;
            }
            let seen = calls.get(&(op, fault.queue.clone())).copied().unwrap_or(0);
            if seen >= fault.after {
                return Err(BrokerError::Unavailable(format!(
                    "injected {op:?} failure on {}",
                    queue.unwrap_or("<channel>")
                )));
            }
        }

        *calls.entry((op, None)).or_default() += 1;
        if let Some(queue) = queue {
            *calls.entry((op, Some(queue.to_string()))).or_default() += 1;
        }
        Ok(())
    }
}

#[async_trait]
impl MessageBroker for FlakyBroker {
    async fn declare_durable_queue(&self, name: &str) -> Result<u64, BrokerError> {
        self.check(BrokerOp::Declare, Some(name))?;
        self.inner.declare_durable_queue(name).await
    }

    async fn publish(
        &self,
        queue: &str,
        payload: &[u8],
        properties: MessageProperties,
    ) -> Result<(), BrokerError> {
        self.check(BrokerOp::Publish, Some(queue))?;
        self.inner.publish(queue, payload, properties).await
    }

    async fn wait_for_confirms(&self) -> Result<(), BrokerError> {
        self.check(BrokerOp::Confirm, None)?;
        self.inner.wait_for_confirms().await
    }

    async fn get(&self, queue: &str) -> Result<Option<Delivery>, BrokerError> {
        self.check(BrokerOp::Get, Some(queue))?;
        self.inner.get(queue).await
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        self.check(BrokerOp::Ack, Some(&delivery.queue))?;
        self.inner.ack(delivery).await
    }

    async fn queue_depth(&self, queue: &str) -> Result<u64, BrokerError> {
        self.check(BrokerOp::Depth, Some(queue))?;
        self.inner.queue_depth(queue).await
    }

    async fn peek(&self, queue: &str, limit: usize) -> Result<Vec<Delivery>, BrokerError> {
        self.check(BrokerOp::Peek, Some(queue))?;
        self.inner.peek(queue, limit).await
    }
}

/// Broker wrapper that stalls one kind of operation, for deadline tests.
pub struct SlowBroker {
    inner: Arc<dyn MessageBroker>,
    op: BrokerOp,
    delay: Duration,
}

impl SlowBroker {
    pub fn new(inner: Arc<dyn MessageBroker>, op: BrokerOp, delay: Duration) -> Self {
        Self { inner, op, delay }
    }

    async fn pause(&self, op: BrokerOp) {
        if op == self.op {
            sleep(self.delay).await;
        }
    }
}

#[async_trait]
impl MessageBroker for SlowBroker {
    async fn declare_durable_queue(&self, name: &str) -> Result<u64, BrokerError> {
        self.pause(BrokerOp::Declare).await;
        self.inner.declare_durable_queue(name).await
    }

    async fn publish(
        &self,
        queue: &str,
        payload: &[u8],
        properties: MessageProperties,
    ) -> Result<(), BrokerError> {
        self.pause(BrokerOp::Publish).await;
        self.inner.publish(queue, payload, properties).await
    }

    async fn wait_for_confirms(&self) -> Result<(), BrokerError> {
        self.pause(BrokerOp::Confirm).await;
        self.inner.wait_for_confirms().await
    }

    async fn get(&self, queue: &str) -> Result<Option<Delivery>, BrokerError> {
        self.pause(BrokerOp::Get).await;
        self.inner.get(queue).await
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        self.pause(BrokerOp::Ack).await;
        self.inner.ack(delivery).await
    }

    async fn queue_depth(&self, queue: &str) -> Result<u64, BrokerError> {
        self.pause(BrokerOp::Depth).await;
        self.inner.queue_depth(queue).await
    }

    async fn peek(&self, queue: &str, limit: usize) -> Result<Vec<Delivery>, BrokerError> {
        self.pause(BrokerOp::Peek).await;
        self.inner.peek(queue, limit).await
    }
}

/// Document store wrapper that delays reads and counts writes.
pub struct ObservedStore {
    inner: Arc<dyn DocumentStore>,
    read_delay: Duration,
    upserts: AtomicU64,
}

impl ObservedStore {
    pub fn new(inner: Arc<dyn DocumentStore>) -> Self {
        Self::slow(inner, Duration::ZERO)
    }

    pub fn slow(inner: Arc<dyn DocumentStore>, read_delay: Duration) -> Self {
        Self {
            inner,
            read_delay,
            upserts: AtomicU64::new(0),
        }
    }

    pub fn upserts(&self) -> u64 {
        self.upserts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for ObservedStore {
    async fn read_document(&self) -> Result<Option<Document>, StoreError> {
        if !self.read_delay.is_zero() {
            sleep(self.read_delay).await;
        }
        self.inner.read_document().await
    }

    async fn upsert_document(&self, fields: Document) -> Result<(), StoreError> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.inner.upsert_document(fields).await
    }
}
