use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("Failed to (de)serialize state document: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid state document: {0}")]
    InvalidDocument(String),

    #[error("State store call timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("Failed to encode or decode message: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("Queue '{0}' has not been declared")]
    UnknownQueue(String),

    #[error("Delivery {tag} is not pending on queue '{queue}'")]
    UnknownDelivery { queue: String, tag: u64 },

    #[error("Broker call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Broker unavailable: {0}")]
    Unavailable(String),
}
