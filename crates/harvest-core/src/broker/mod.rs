use crate::error::BrokerError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod sled_broker;

/// Identifies a delivered message until it is acknowledged.
pub type DeliveryTag = u64;

/// Per-message metadata carried next to the payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageProperties {
    pub persistent: bool,
    pub timestamp: Option<DateTime<Utc>>,
}

impl MessageProperties {
    pub fn persistent() -> Self {
        Self {
            persistent: true,
            timestamp: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub queue: String,
    pub tag: DeliveryTag,
    pub payload: Vec<u8>,
    pub properties: MessageProperties,
}

/// A durable message broker with publisher confirms and manual acks.
///
/// A delivery obtained through [`MessageBroker::get`] stays in its queue
/// until [`MessageBroker::ack`] is called for it.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Declares a queue that survives broker restarts. Idempotent.
    /// Returns the number of ready messages in it.
    async fn declare_durable_queue(&self, name: &str) -> Result<u64, BrokerError>;

    async fn publish(
        &self,
        queue: &str,
        payload: &[u8],
        properties: MessageProperties,
    ) -> Result<(), BrokerError>;

    /// Blocks until every message published so far is durably stored.
    async fn wait_for_confirms(&self) -> Result<(), BrokerError>;

    /// Fetches the next message of `queue`, `None` when it is empty.
    async fn get(&self, queue: &str) -> Result<Option<Delivery>, BrokerError>;

    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError>;

    async fn queue_depth(&self, queue: &str) -> Result<u64, BrokerError>;

    /// Lists up to `limit` messages from the head of `queue` without
    /// delivering or acknowledging them.
    async fn peek(&self, queue: &str, limit: usize) -> Result<Vec<Delivery>, BrokerError>;
}
