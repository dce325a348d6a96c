//! In-memory record store
//!
//! Backs unit tests and short-lived tooling. Behaves like the real thing:
//! writes fan out change batches to subscribers, reads degrade to empty
//! when the store is flagged offline.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use uuid::Uuid;

use super::{
    merge_document_fields, ChangeEvent, Document, RecordStore, Result, StoreError, StoreEvent,
    SubscriberHub, Subscription,
};

/// Volatile document store with change fan-out.
pub struct MemoryStore {
    collections: Mutex<BTreeMap<String, Vec<Document>>>,
    hub: Arc<SubscriberHub>,
    offline: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            collections: Mutex::new(BTreeMap::new()),
            hub: SubscriberHub::new(),
            offline: AtomicBool::new(false),
        }
    }

    /// Simulate a connectivity outage: reads degrade, writes fail.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Insert a document under a caller-chosen id. Used for seeding
    /// fixtures where ids matter (branch roots, parents).
    pub fn insert_with_id(&self, collection: &str, id: &str, fields: Value) -> Result<()> {
        self.check_online()?;
        if !fields.is_object() {
            return Err(StoreError::Validation(
                "Document fields must be a JSON object".to_string(),
            ));
        }
        let mut collections = self.collections.lock().expect("store lock");
        let docs = collections.entry(collection.to_string()).or_default();
        if docs.iter().any(|d| d.id == id) {
            return Err(StoreError::Validation(format!(
                "Document {} already exists in {}",
                id, collection
            )));
        }
        docs.push(Document {
            id: id.to_string(),
            fields: fields.clone(),
        });
        drop(collections);
        self.hub
            .publish(collection, vec![ChangeEvent::added(id, fields)]);
        Ok(())
    }

    /// Delete a document, emitting a `removed` event when it existed.
    pub fn remove(&self, collection: &str, id: &str) -> Result<()> {
        self.check_online()?;
        let mut collections = self.collections.lock().expect("store lock");
        let Some(docs) = collections.get_mut(collection) else {
            return Err(StoreError::NotFound(id.to_string()));
        };
        let before = docs.len();
        docs.retain(|d| d.id != id);
        if docs.len() == before {
            return Err(StoreError::NotFound(id.to_string()));
        }
        drop(collections);
        self.hub.publish(collection, vec![ChangeEvent::removed(id)]);
        Ok(())
    }

    /// Emit a raw batch to subscribers without touching stored data.
    /// Tests use this to replay store-shaped event sequences.
    pub fn emit(&self, collection: &str, events: Vec<ChangeEvent>) {
        self.hub.publish(collection, events);
    }

    /// Emit a stream error to subscribers, as a flaky backend would.
    pub fn emit_error(&self, collection: &str, message: &str) {
        self.hub.publish_error(collection, message);
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("store is offline".to_string()))
        } else {
            Ok(())
        }
    }
}

impl RecordStore for MemoryStore {
    fn fetch_all(&self, collection: &str) -> Vec<Document> {
        if self.offline.load(Ordering::SeqCst) {
            log::warn!("fetch_all({}) while store offline, returning empty", collection);
            return Vec::new();
        }
        self.collections
            .lock()
            .expect("store lock")
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    fn fetch_by_id(&self, collection: &str, id: &str) -> Option<Document> {
        if self.offline.load(Ordering::SeqCst) {
            log::warn!("fetch_by_id({}, {}) while store offline", collection, id);
            return None;
        }
        self.collections
            .lock()
            .expect("store lock")
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| d.id == id).cloned())
    }

    fn add(&self, collection: &str, fields: Value) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.insert_with_id(collection, &id, fields)?;
        Ok(id)
    }

    fn update(&self, collection: &str, id: &str, patch: Value) -> Result<()> {
        self.check_online()?;
        let mut collections = self.collections.lock().expect("store lock");
        let doc = collections
            .get_mut(collection)
            .and_then(|docs| docs.iter_mut().find(|d| d.id == id))
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        merge_document_fields(&mut doc.fields, &patch);
        let merged = doc.fields.clone();
        drop(collections);
        self.hub
            .publish(collection, vec![ChangeEvent::modified(id, merged)]);
        Ok(())
    }

    fn subscribe(&self, collection: &str) -> (Subscription, Receiver<StoreEvent>) {
        self.hub.subscribe(collection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ChangeKind;
    use serde_json::json;

    #[test]
    fn test_add_assigns_id_and_emits_added() {
        let store = MemoryStore::new();
        let (_sub, rx) = store.subscribe("prompts");

        let id = store.add("prompts", json!({"title": "One"})).unwrap();
        assert!(!id.is_empty());

        match rx.try_recv().unwrap() {
            StoreEvent::Changes(events) => {
                assert_eq!(events.len(), 1);
                assert_eq!(events[0].kind, ChangeKind::Added);
                assert_eq!(events[0].id, id);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_update_merges_and_emits_full_document() {
        let store = MemoryStore::new();
        store
            .insert_with_id("prompts", "p1", json!({"title": "One", "views": 3}))
            .unwrap();
        let (_sub, rx) = store.subscribe("prompts");

        store.update("prompts", "p1", json!({"title": "Two"})).unwrap();

        match rx.try_recv().unwrap() {
            StoreEvent::Changes(events) => {
                assert_eq!(events[0].kind, ChangeKind::Modified);
                assert_eq!(events[0].data, Some(json!({"title": "Two", "views": 3})));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_update_missing_document_errors() {
        let store = MemoryStore::new();
        let err = store.update("prompts", "ghost", json!({})).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_remove_emits_removed() {
        let store = MemoryStore::new();
        store.insert_with_id("prompts", "p1", json!({})).unwrap();
        let (_sub, rx) = store.subscribe("prompts");

        store.remove("prompts", "p1").unwrap();
        assert!(store.fetch_by_id("prompts", "p1").is_none());

        match rx.try_recv().unwrap() {
            StoreEvent::Changes(events) => assert_eq!(events[0].kind, ChangeKind::Removed),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_offline_reads_degrade_and_writes_fail() {
        let store = MemoryStore::new();
        store.insert_with_id("prompts", "p1", json!({})).unwrap();
        store.set_offline(true);

        assert!(store.fetch_all("prompts").is_empty());
        assert!(store.fetch_by_id("prompts", "p1").is_none());
        assert!(matches!(
            store.add("prompts", json!({})),
            Err(StoreError::Unavailable(_))
        ));

        store.set_offline(false);
        assert_eq!(store.fetch_all("prompts").len(), 1);
    }

    #[test]
    fn test_fields_must_be_an_object() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.add("prompts", json!([1, 2])),
            Err(StoreError::Validation(_))
        ));
    }

    #[test]
    fn test_typed_fetch_helpers() {
        let store = MemoryStore::new();
        store
            .insert_with_id("prompts", "p1", json!({"title": "Typed", "score_total": 4}))
            .unwrap();

        let records = store.fetch_all_records("prompts");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].display_title(), "Typed");
        assert_eq!(records[0].score(), 4.0);

        let record = store.fetch_record("prompts", "p1").unwrap();
        assert_eq!(record.id, "p1");
        assert!(store.fetch_record("prompts", "missing").is_none());
    }
}
