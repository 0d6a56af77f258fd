use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::document::{ChangeEvent, DocPath, Document, Query, WriteOp};
use crate::error::StoreError;

/// The transactional document database behind the booking engine.
///
/// `commit` applies all ops as one indivisible unit: readers either observe
/// every write of a commit or none of them. Contention with a concurrent
/// commit surfaces as `StoreError::Conflict` and is retried by callers.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, path: &DocPath) -> Result<Option<Document>, StoreError>;

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError>;

    async fn commit(&self, writes: Vec<WriteOp>) -> Result<(), StoreError>;

    /// Live change feed. Every committed write produces one event per
    /// touched document after the commit becomes visible.
    fn changes(&self) -> broadcast::Receiver<ChangeEvent>;
}

/// A staged read-then-write unit against a [`DocumentStore`].
///
/// All reads must happen before the first staged write; a read issued after
/// a write is a programming error and fails with `ReadAfterWrite` rather
/// than being silently reordered.
pub struct Transaction<'a> {
    store: &'a dyn DocumentStore,
    writes: Vec<WriteOp>,
}

impl<'a> Transaction<'a> {
    pub fn new(store: &'a dyn DocumentStore) -> Self {
        Self {
            store,
            writes: Vec::new(),
        }
    }

    pub async fn get(&self, path: &DocPath) -> Result<Option<Document>, StoreError> {
        if !self.writes.is_empty() {
            return Err(StoreError::ReadAfterWrite);
        }
        self.store.get(path).await
    }

    pub fn stage(&mut self, op: WriteOp) {
        self.writes.push(op);
    }

    pub async fn commit(self) -> Result<(), StoreError> {
        self.store.commit(self.writes).await
    }
}
