use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};

use super::{
    apply_patch, with_id, ChangeFeed, ConditionalWrite, DocumentChange, DocumentStore, Query,
    WriteOutcome,
};
use crate::errors::{AppError, AppResult};

type Collections = HashMap<String, BTreeMap<String, Value>>;

/// In-process document store. Writes are serialized by a single lock, which
/// makes every conditional write a true compare-and-swap.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<Collections>,
    feed: ChangeFeed,
    writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed writes (inserts, sets and conditional updates).
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn committed(&self, changes: Vec<DocumentChange>) {
        self.writes.fetch_add(1, Ordering::SeqCst);
        for change in changes {
            self.feed.publish(change);
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> AppResult<Option<Value>> {
        let guard = self.collections.read().await;
        Ok(guard.get(collection).and_then(|docs| docs.get(id)).cloned())
    }

    async fn insert(&self, collection: &str, id: &str, body: Value) -> AppResult<()> {
        let body = with_id(body, id);
        {
            let mut guard = self.collections.write().await;
            let docs = guard.entry(collection.to_string()).or_default();
            if docs.contains_key(id) {
                return Err(AppError::conflict(format!("{collection}/{id} already exists")));
            }
            docs.insert(id.to_string(), body.clone());
        }

        self.committed(vec![DocumentChange {
            collection: collection.to_string(),
            id: id.to_string(),
            before: None,
            after: Some(body),
        }]);
        Ok(())
    }

    async fn set(&self, collection: &str, id: &str, body: Value) -> AppResult<()> {
        let body = with_id(body, id);
        let before = {
            let mut guard = self.collections.write().await;
            guard
                .entry(collection.to_string())
                .or_default()
                .insert(id.to_string(), body.clone())
        };

        self.committed(vec![DocumentChange {
            collection: collection.to_string(),
            id: id.to_string(),
            before,
            after: Some(body),
        }]);
        Ok(())
    }

    async fn query(&self, query: &Query) -> AppResult<Vec<Value>> {
        let guard = self.collections.read().await;
        let docs = guard
            .get(&query.collection)
            .map(|docs| docs.values().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        Ok(query.apply(docs))
    }

    async fn transactional_update(&self, write: ConditionalWrite) -> AppResult<WriteOutcome> {
        let mut changes = Vec::with_capacity(1 + write.appends.len());
        let updated = {
            let mut guard = self.collections.write().await;

            let Some(current) = guard.get(&write.collection).and_then(|docs| docs.get(&write.id)) else {
                return Ok(WriteOutcome::NotFound);
            };
            if !write.precondition.holds(current) {
                return Ok(WriteOutcome::PreconditionFailed);
            }

            for doc in &write.appends {
                let taken = guard
                    .get(&doc.collection)
                    .map_or(false, |docs| docs.contains_key(&doc.id));
                if taken {
                    return Err(AppError::conflict(format!(
                        "{}/{} already exists",
                        doc.collection, doc.id
                    )));
                }
            }

            let before = current.clone();
            let mut updated = before.clone();
            apply_patch(&mut updated, &write.patch);

            guard
                .entry(write.collection.clone())
                .or_default()
                .insert(write.id.clone(), updated.clone());
            changes.push(DocumentChange {
                collection: write.collection.clone(),
                id: write.id.clone(),
                before: Some(before),
                after: Some(updated.clone()),
            });

            for doc in write.appends {
                let body = with_id(doc.body, &doc.id);
                guard
                    .entry(doc.collection.clone())
                    .or_default()
                    .insert(doc.id.clone(), body.clone());
                changes.push(DocumentChange {
                    collection: doc.collection,
                    id: doc.id,
                    before: None,
                    after: Some(body),
                });
            }

            updated
        };

        self.committed(changes);
        Ok(WriteOutcome::Committed(updated))
    }

    fn subscribe(&self) -> broadcast::Receiver<DocumentChange> {
        self.feed.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{NewDocument, Precondition};
    use serde_json::json;

    #[tokio::test]
    async fn conditional_write_applies_once() {
        let store = MemoryStore::new();
        store
            .insert("approvalRequests", "r1", json!({"status": "pending", "currentStepIndex": 0}))
            .await
            .unwrap();

        let write = || {
            ConditionalWrite::new("approvalRequests", "r1")
                .precondition(
                    Precondition::none()
                        .field_equals("status", "pending")
                        .field_equals("currentStepIndex", 0),
                )
                .set("status", "approved")
        };

        assert!(matches!(
            store.transactional_update(write()).await.unwrap(),
            WriteOutcome::Committed(_)
        ));
        assert_eq!(
            store.transactional_update(write()).await.unwrap(),
            WriteOutcome::PreconditionFailed
        );
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn appends_are_written_with_the_update() {
        let store = MemoryStore::new();
        let mut feed = store.subscribe();
        store.insert("a", "1", json!({"n": 1})).await.unwrap();

        let outcome = store
            .transactional_update(
                ConditionalWrite::new("a", "1")
                    .set("n", 2)
                    .append(NewDocument::new("log", "l1", json!({"ref": "1"}))),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, WriteOutcome::Committed(ref doc) if doc["n"] == 2));

        let log = store.get("log", "l1").await.unwrap().unwrap();
        assert_eq!(log["id"], "l1");

        let first = feed.recv().await.unwrap();
        assert!(first.before.is_none());
        let second = feed.recv().await.unwrap();
        assert_eq!(second.before, Some(json!({"id": "1", "n": 1})));
        let third = feed.recv().await.unwrap();
        assert_eq!(third.collection, "log");
    }

    #[tokio::test]
    async fn conflicting_append_aborts_the_whole_write() {
        let store = MemoryStore::new();
        store.insert("a", "1", json!({"n": 1})).await.unwrap();
        store.insert("log", "l1", json!({})).await.unwrap();

        let err = store
            .transactional_update(
                ConditionalWrite::new("a", "1")
                    .set("n", 2)
                    .append(NewDocument::new("log", "l1", json!({}))),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(store.get("a", "1").await.unwrap().unwrap()["n"], 1);
    }

    #[tokio::test]
    async fn missing_document_is_reported() {
        let store = MemoryStore::new();
        let outcome = store
            .transactional_update(ConditionalWrite::new("a", "nope").set("n", 1))
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::NotFound);
    }
}
