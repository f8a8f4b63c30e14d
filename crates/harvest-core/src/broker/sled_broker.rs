use crate::{
    broker::{Delivery, DeliveryTag, MessageBroker, MessageProperties},
    error::BrokerError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

const QUEUES_TREE: &str = "queues";

#[derive(Serialize, Deserialize)]
struct StoredMessage {
    payload: Vec<u8>,
    persistent: bool,
    timestamp: Option<DateTime<Utc>>,
}

/// Embedded broker keeping one sled tree per queue.
///
/// Keys are big-endian ids from [`sled::Db::generate_id`], which stay
/// monotonic across restarts, so tree order is FIFO order.
pub struct SledBroker {
    db: sled::Db,
    queues: sled::Tree,
}

impl SledBroker {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BrokerError> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    pub fn from_db(db: sled::Db) -> Result<Self, BrokerError> {
        let queues = db.open_tree(QUEUES_TREE)?;
        Ok(Self { db, queues })
    }

    #[inline]
    fn tree_name(queue: &str) -> String {
        format!("queue:{queue}")
    }

    fn queue_tree(&self, queue: &str) -> Result<sled::Tree, BrokerError> {
        if !self.queues.contains_key(queue)? {
            return Err(BrokerError::UnknownQueue(queue.to_string()));
        }
        Ok(self.db.open_tree(Self::tree_name(queue))?)
    }

    fn decode(queue: &str, key: &[u8], value: &[u8]) -> Result<Delivery, BrokerError> {
        let tag = key
            .try_into()
            .map(DeliveryTag::from_be_bytes)
            .map_err(|_| BrokerError::Unavailable(format!("corrupt key in queue '{queue}'")))?;
        let stored: StoredMessage = bincode::deserialize(value)?;

        Ok(Delivery {
            queue: queue.to_string(),
            tag,
            payload: stored.payload,
            properties: MessageProperties {
                persistent: stored.persistent,
                timestamp: stored.timestamp,
            },
        })
    }
}

#[async_trait]
impl MessageBroker for SledBroker {
    async fn declare_durable_queue(&self, name: &str) -> Result<u64, BrokerError> {
        if self.queues.insert(name, b"durable".as_slice())?.is_none() {
            self.queues.flush_async().await?;
            debug!(queue = name, "Declared durable queue");
        }
        let tree = self.db.open_tree(Self::tree_name(name))?;
        Ok(tree.len() as u64)
    }

    async fn publish(
        &self,
        queue: &str,
        payload: &[u8],
        properties: MessageProperties,
    ) -> Result<(), BrokerError> {
        let tree = self.queue_tree(queue)?;
        let tag = self.db.generate_id()?;
        let value = bincode::serialize(&StoredMessage {
            payload: payload.to_vec(),
            persistent: properties.persistent,
            timestamp: properties.timestamp,
        })?;

        tree.insert(tag.to_be_bytes(), value)?;
        Ok(())
    }

    async fn wait_for_confirms(&self) -> Result<(), BrokerError> {
        self.db.flush_async().await?;
        Ok(())
    }

    async fn get(&self, queue: &str) -> Result<Option<Delivery>, BrokerError> {
        let tree = self.queue_tree(queue)?;
        match tree.first()? {
            Some((key, value)) => Ok(Some(Self::decode(queue, &key, &value)?)),
            None => Ok(None),
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        let tree = self.queue_tree(&delivery.queue)?;
        if tree.remove(delivery.tag.to_be_bytes())?.is_none() {
            return Err(BrokerError::UnknownDelivery {
                queue: delivery.queue.clone(),
                tag: delivery.tag,
            });
        }
        // An ack decides the message's fate for good; make it durable.
        tree.flush_async().await?;
        Ok(())
    }

    async fn queue_depth(&self, queue: &str) -> Result<u64, BrokerError> {
        Ok(self.queue_tree(queue)?.len() as u64)
    }

    async fn peek(&self, queue: &str, limit: usize) -> Result<Vec<Delivery>, BrokerError> {
        let tree = self.queue_tree(queue)?;
        let mut out = Vec::new();
        for item in tree.iter().take(limit) {
            let (key, value) = item?;
            out.push(Self::decode(queue, &key, &value)?);
        }
        Ok(out)
    }
}
