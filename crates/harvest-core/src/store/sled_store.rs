use crate::{
    error::StoreError,
    models::{Document, ID_KEY},
    store::DocumentStore,
};
use async_trait::async_trait;
use serde_json::Value;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use std::path::Path;
use tracing::debug;
use uuid::Uuid;

const STATE_TREE: &str = "state";
const STATE_KEY: &[u8] = b"singleton";

pub struct SledDocumentStore {
    tree: sled::Tree,
}

impl SledDocumentStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Self::from_db(&db)
    }

    pub fn from_db(db: &sled::Db) -> Result<Self, StoreError> {
        let tree = db.open_tree(STATE_TREE)?;
        Ok(Self { tree })
    }
}

#[async_trait]
impl DocumentStore for SledDocumentStore {
    async fn read_document(&self) -> Result<Option<Document>, StoreError> {
        match self.tree.get(STATE_KEY)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn upsert_document(&self, fields: Document) -> Result<(), StoreError> {
        // Read-merge-write inside one transaction so the merge never sees a
        // half-applied concurrent upsert.
        let result = self.tree.transaction::<_, _, StoreError>(|tx| {
            let mut doc = match tx.get(STATE_KEY)? {
                Some(bytes) => serde_json::from_slice::<Document>(&bytes)
                    .map_err(|e| ConflictableTransactionError::Abort(e.into()))?,
                None => {
                    let mut doc = Document::new();
                    doc.insert(
                        ID_KEY.to_string(),
                        Value::String(Uuid::new_v4().to_string()),
                    );
                    doc
                }
            };

            for (key, value) in fields.iter().filter(|(key, _)| *key != ID_KEY) {
                doc.insert(key.clone(), value.clone());
            }

            let bytes = serde_json::to_vec(&doc)
                .map_err(|e| ConflictableTransactionError::Abort(e.into()))?;
            tx.insert(STATE_KEY, bytes)?;
            Ok(())
        });

        match result {
            Ok(()) => {}
            Err(TransactionError::Abort(e)) => return Err(e),
            Err(TransactionError::Storage(e)) => return Err(StoreError::Sled(e)),
        }

        let flushed = self.tree.flush_async().await?;
        debug!(bytes = flushed, "State document flushed");
        Ok(())
    }
}
