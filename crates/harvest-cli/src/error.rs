use harvest_core::error::{BrokerError, StoreError};
use harvest_sync::error::ReconcileError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Failed to read input: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to open state store: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to open queue store: {0}")]
    Broker(#[from] BrokerError),

    #[error("Reconciliation failed: {0}")]
    Reconcile(#[from] ReconcileError),

    #[error("Invalid record on line {line}: {source}")]
    InvalidRecord {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize data to JSON: {0}")]
    JsonSerialize(#[from] serde_json::Error),
}
