use crate::{deadline::within, error::ReconcileError};
use chrono::{DateTime, Utc};
use harvest_core::{
    clock::Clock,
    error::StoreError,
    models::{Checkpoint, StateUpdate},
    store::DocumentStore,
};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info};

/// Reads and writes the singleton harvest checkpoint.
///
/// Nothing is cached: every read goes back to the store.
#[derive(Clone)]
pub struct CheckpointStore {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    call_timeout: Option<Duration>,
}

impl CheckpointStore {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        call_timeout: Option<Duration>,
    ) -> Self {
        Self {
            store,
            clock,
            call_timeout,
        }
    }

    /// Current checkpoint, or the default one before the first write.
    pub async fn read(&self) -> Result<Checkpoint, ReconcileError> {
        let doc = within(
            self.call_timeout,
            self.store.read_document(),
            StoreError::Timeout,
        )
        .await?;

        match doc {
            Some(doc) => Ok(Checkpoint::from_document(doc)?),
            None => {
                debug!("No checkpoint stored yet, using default");
                Ok(Checkpoint::default())
            }
        }
    }

    /// Persists `update` with a fresh commit timestamp and returns that
    /// timestamp once the store has acknowledged the write.
    pub async fn write(&self, update: StateUpdate) -> Result<DateTime<Utc>, ReconcileError> {
        let committed_at = self.clock.now();
        let status = update.status;
        let doc = update.into_document(committed_at)?;

        within(
            self.call_timeout,
            self.store.upsert_document(doc),
            StoreError::Timeout,
        )
        .await?;

        info!(
            status = status.map(|s| s.as_str()).unwrap_or("unchanged"),
            committed_at = %committed_at.to_rfc3339(),
            "Checkpoint written"
        );
        Ok(committed_at)
    }
}
