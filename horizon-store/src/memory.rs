use chrono::{DateTime, Utc};
use horizon_core::{
    ChangeEvent, DocPath, Document, DocumentStore, Query, SortDirection, StoreError, WriteMode,
    WriteOp,
};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::broadcast;

use crate::apply::{apply_fields, compare_values, value_at_path};

const CHANGE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
struct Stored {
    data: Value,
    version: u64,
    updated_at: DateTime<Utc>,
}

/// In-process reference backend. All documents live behind one write lock,
/// so a commit is indivisible from any reader's point of view: every op is
/// validated against the pre-commit state before any op is applied.
pub struct MemoryStore {
    collections: RwLock<HashMap<String, HashMap<String, Stored>>>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            collections: RwLock::new(HashMap::new()),
            changes,
        }
    }

    fn locked(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, HashMap<String, Stored>>>, StoreError>
    {
        self.collections
            .write()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &DocPath) -> Result<Option<Document>, StoreError> {
        let collections = self
            .collections
            .read()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))?;
        Ok(collections
            .get(&path.collection)
            .and_then(|docs| docs.get(&path.id))
            .map(|stored| Document {
                path: path.clone(),
                data: stored.data.clone(),
                version: stored.version,
                updated_at: stored.updated_at,
            }))
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        let collections = self
            .collections
            .read()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))?;
        let mut matches: Vec<Document> = collections
            .get(&query.collection)
            .map(|docs| {
                docs.iter()
                    .filter(|(_, stored)| {
                        query.filters.iter().all(|(field, expected)| {
                            value_at_path(&stored.data, field) == Some(expected)
                        })
                    })
                    .map(|(id, stored)| Document {
                        path: DocPath::new(query.collection.clone(), id.clone()),
                        data: stored.data.clone(),
                        version: stored.version,
                        updated_at: stored.updated_at,
                    })
                    .collect()
            })
            .unwrap_or_default();

        if let Some((field, direction)) = &query.order_by {
            matches.sort_by(|a, b| {
                let ord = compare_values(
                    value_at_path(&a.data, field),
                    value_at_path(&b.data, field),
                );
                match direction {
                    SortDirection::Ascending => ord,
                    SortDirection::Descending => ord.reverse(),
                }
            });
        }
        if let Some(limit) = query.limit {
            matches.truncate(limit);
        }
        Ok(matches)
    }

    async fn commit(&self, writes: Vec<WriteOp>) -> Result<(), StoreError> {
        let mut events = Vec::with_capacity(writes.len());
        {
            let mut collections = self.locked()?;

            // Validate everything against the pre-commit state first so a
            // failed precondition leaves no partial write behind.
            for op in &writes {
                let exists = collections
                    .get(&op.path.collection)
                    .map(|docs| docs.contains_key(&op.path.id))
                    .unwrap_or(false);
                match op.mode {
                    WriteMode::Create if exists => {
                        return Err(StoreError::AlreadyExists(op.path.clone()));
                    }
                    WriteMode::Update if !exists => {
                        return Err(StoreError::NotFound(op.path.clone()));
                    }
                    _ => {}
                }
            }

            let now = Utc::now();
            for op in &writes {
                let docs = collections.entry(op.path.collection.clone()).or_default();
                let stored = docs.entry(op.path.id.clone()).or_insert_with(|| Stored {
                    data: Value::Object(Map::new()),
                    version: 0,
                    updated_at: now,
                });
                apply_fields(&mut stored.data, &op.fields, now);
                stored.version += 1;
                stored.updated_at = now;
                events.push(ChangeEvent {
                    collection: op.path.collection.clone(),
                    doc_id: op.path.id.clone(),
                });
            }
        }

        // Notify after the lock is released; no subscribers is fine.
        for event in events {
            let _ = self.changes.send(event);
        }
        Ok(())
    }

    fn changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use horizon_core::Transaction;

    fn path(collection: &str, id: &str) -> DocPath {
        DocPath::new(collection, id)
    }

    #[tokio::test]
    async fn test_create_then_get_roundtrip() {
        let store = MemoryStore::new();
        let op = WriteOp::create(
            path("bookings", "b-1"),
            &serde_json::json!({"user_id": "u-1", "amount": 2500}),
        )
        .unwrap();
        store.commit(vec![op]).await.unwrap();

        let doc = store.get(&path("bookings", "b-1")).await.unwrap().unwrap();
        assert_eq!(doc.data["user_id"], "u-1");
        assert_eq!(doc.version, 1);
    }

    #[tokio::test]
    async fn test_create_duplicate_fails() {
        let store = MemoryStore::new();
        let op = WriteOp::create(path("bookings", "b-1"), &serde_json::json!({"a": 1})).unwrap();
        store.commit(vec![op.clone()]).await.unwrap();
        let err = store.commit(vec![op]).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_update_missing_fails_and_commit_applies_nothing() {
        let store = MemoryStore::new();
        let create =
            WriteOp::create(path("bookings", "b-1"), &serde_json::json!({"a": 1})).unwrap();
        let update = WriteOp::update(path("bookings", "missing"))
            .field("a", 2)
            .unwrap();

        let err = store.commit(vec![create, update]).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        // The valid create in the same commit must not have been applied.
        assert!(store.get(&path("bookings", "b-1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_merge_creates_and_increments() {
        let store = MemoryStore::new();
        let op = WriteOp::merge(path("analytics", "counters"))
            .increment("total_bookings", 1)
            .increment("bookings_by_type.tour", 1)
            .server_timestamp("updated_at");
        store.commit(vec![op.clone()]).await.unwrap();
        store.commit(vec![op]).await.unwrap();

        let doc = store
            .get(&path("analytics", "counters"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.data["total_bookings"], 2);
        assert_eq!(doc.data["bookings_by_type"]["tour"], 2);
        assert!(doc.data["updated_at"].is_string());
    }

    #[tokio::test]
    async fn test_query_filters_orders_and_limits() {
        let store = MemoryStore::new();
        for (id, user, ts) in [
            ("b-1", "u-1", "2026-01-01T00:00:00+00:00"),
            ("b-2", "u-1", "2026-03-01T00:00:00+00:00"),
            ("b-3", "u-2", "2026-02-01T00:00:00+00:00"),
        ] {
            let op = WriteOp::create(
                path("bookings", id),
                &serde_json::json!({"user_id": user, "created_at": ts}),
            )
            .unwrap();
            store.commit(vec![op]).await.unwrap();
        }

        let query = Query::collection("bookings")
            .filter_eq("user_id", "u-1")
            .order_by("created_at", SortDirection::Descending)
            .limit(1);
        let docs = store.query(&query).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].path.id, "b-2");
    }

    #[tokio::test]
    async fn test_commit_emits_change_events() {
        let store = MemoryStore::new();
        let mut rx = store.changes();
        let op = WriteOp::create(path("bookings", "b-1"), &serde_json::json!({"a": 1})).unwrap();
        store.commit(vec![op]).await.unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.collection, "bookings");
        assert_eq!(event.doc_id, "b-1");
    }

    #[tokio::test]
    async fn test_transaction_rejects_read_after_write() {
        let store = MemoryStore::new();
        let mut tx = Transaction::new(&store);
        tx.stage(WriteOp::create(path("bookings", "b-1"), &serde_json::json!({"a": 1})).unwrap());
        let err = tx.get(&path("bookings", "b-1")).await.unwrap_err();
        assert!(matches!(err, StoreError::ReadAfterWrite));
    }
}
