use crate::{error::StoreError, models::Document};
use async_trait::async_trait;

pub mod sled_store;

/// Backing store for the singleton state document.
///
/// There is no filter: the store holds at most one document and every write
/// is an upsert against it.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Returns the stored document, `None` before the first write.
    async fn read_document(&self) -> Result<Option<Document>, StoreError>;

    /// Shallow-merges `fields` into the document, creating it (and its
    /// identity key) when absent. Returns once the write is durable.
    async fn upsert_document(&self, fields: Document) -> Result<(), StoreError>;
}
