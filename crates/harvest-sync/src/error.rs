use harvest_core::{
    error::{BrokerError, StoreError},
    retry::RetryDisposition,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Checkpoint store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),

    #[error("Message buffer unavailable: {0}")]
    BufferUnavailable(#[source] BrokerError),

    /// Some records of a batch were confirmed before the broker failed.
    /// Re-staging the whole batch is safe: the fence discards duplicates
    /// that do not predate the next checkpoint.
    #[error("Staged {confirmed} of {total} records before failure: {source}")]
    PartialBatchStaged {
        confirmed: u64,
        total: u64,
        #[source]
        source: BrokerError,
    },
}

impl From<StoreError> for ReconcileError {
    fn from(err: StoreError) -> Self {
        ReconcileError::StoreUnavailable(err)
    }
}

impl From<BrokerError> for ReconcileError {
    fn from(err: BrokerError) -> Self {
        ReconcileError::BufferUnavailable(err)
    }
}

impl ReconcileError {
    /// Whether an outer caller may retry the whole operation.
    pub fn disposition(&self) -> RetryDisposition {
        match self {
            ReconcileError::StoreUnavailable(StoreError::InvalidDocument(_)) => {
                RetryDisposition::Stop
            }
            ReconcileError::BufferUnavailable(BrokerError::UnknownQueue(_)) => {
                RetryDisposition::Stop
            }
            ReconcileError::StoreUnavailable(_)
            | ReconcileError::BufferUnavailable(_)
            | ReconcileError::PartialBatchStaged { .. } => RetryDisposition::Retry,
        }
    }
}
