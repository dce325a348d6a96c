//! Record store adapter
//!
//! The document database itself is an external collaborator; this module
//! defines the interface the reconciliation core consumes, plus the
//! subscription plumbing shared by the backends. Two backends ship with
//! the crate: an in-memory store and a SQLite-backed one.
//!
//! Error policy: read paths degrade (empty list / `None`) and log instead
//! of propagating, write paths surface failures. Subscription comm errors
//! arrive as items on the event stream, never as panics.

pub mod memory;
pub mod sqlite;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;

use crate::record::PromptRecord;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Error type for store operations.
#[derive(Debug)]
pub enum StoreError {
    Unavailable(String),
    Backend(String),
    Validation(String),
    NotFound(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Unavailable(msg) => write!(f, "Store unavailable: {}", msg),
            StoreError::Backend(msg) => write!(f, "Store error: {}", msg),
            StoreError::Validation(msg) => write!(f, "{}", msg),
            StoreError::NotFound(id) => write!(f, "Document {} not found", id),
        }
    }
}

impl std::error::Error for StoreError {}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A raw document: store-assigned id plus uninterpreted fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Value,
}

/// What happened to a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// One entry in a change batch. `data` carries the full post-change
/// fields for added/modified and is absent for removed.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub id: String,
    pub data: Option<Value>,
}

impl ChangeEvent {
    pub fn added(id: impl Into<String>, data: Value) -> Self {
        Self {
            kind: ChangeKind::Added,
            id: id.into(),
            data: Some(data),
        }
    }

    pub fn modified(id: impl Into<String>, data: Value) -> Self {
        Self {
            kind: ChangeKind::Modified,
            id: id.into(),
            data: Some(data),
        }
    }

    pub fn removed(id: impl Into<String>) -> Self {
        Self {
            kind: ChangeKind::Removed,
            id: id.into(),
            data: None,
        }
    }
}

/// Items delivered on a subscription stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// An ordered batch of changes. Ordering across different ids follows
    /// the store's native order; only per-id last-event-wins is guaranteed
    /// for duplicates within one batch.
    Changes(Vec<ChangeEvent>),
    /// A communication error; the stream stays open.
    Error(String),
}

/// The interface the reconciliation core consumes.
pub trait RecordStore: Send + Sync {
    /// Snapshot read of a collection. Empty on store failure, never an error.
    fn fetch_all(&self, collection: &str) -> Vec<Document>;

    /// Point lookup. `None` when missing or on store failure.
    fn fetch_by_id(&self, collection: &str, id: &str) -> Option<Document>;

    /// Create a document and return its assigned id.
    fn add(&self, collection: &str, fields: Value) -> Result<String>;

    /// Shallow-merge `patch` into an existing document's fields.
    fn update(&self, collection: &str, id: &str, patch: Value) -> Result<()>;

    /// Register for change batches on a collection. Dropping or cancelling
    /// the returned subscription stops delivery.
    fn subscribe(&self, collection: &str) -> (Subscription, Receiver<StoreEvent>);

    /// Typed convenience over [`fetch_all`](Self::fetch_all).
    fn fetch_all_records(&self, collection: &str) -> Vec<PromptRecord> {
        self.fetch_all(collection)
            .iter()
            .map(|doc| PromptRecord::from_fields(&doc.id, &doc.fields))
            .collect()
    }

    /// Typed convenience over [`fetch_by_id`](Self::fetch_by_id).
    fn fetch_record(&self, collection: &str, id: &str) -> Option<PromptRecord> {
        self.fetch_by_id(collection, id)
            .map(|doc| PromptRecord::from_fields(&doc.id, &doc.fields))
    }
}

// ============================================================================
// Subscription plumbing
// ============================================================================

struct Subscriber {
    collection: String,
    sender: Sender<StoreEvent>,
}

/// Fan-out registry shared by the store backends.
///
/// Senders whose receiver has gone away are pruned on the next publish.
#[derive(Default)]
pub(crate) struct SubscriberHub {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<u64, Subscriber>>,
}

impl SubscriberHub {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn subscribe(
        self: &Arc<Self>,
        collection: &str,
    ) -> (Subscription, Receiver<StoreEvent>) {
        let (tx, rx) = channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().expect("hub lock").insert(
            id,
            Subscriber {
                collection: collection.to_string(),
                sender: tx,
            },
        );
        (
            Subscription {
                id,
                hub: Arc::downgrade(self),
                cancelled: AtomicBool::new(false),
            },
            rx,
        )
    }

    /// Deliver one batch to every live subscriber of `collection`.
    pub(crate) fn publish(&self, collection: &str, events: Vec<ChangeEvent>) {
        if events.is_empty() {
            return;
        }
        self.send(collection, StoreEvent::Changes(events));
    }

    pub(crate) fn publish_error(&self, collection: &str, message: &str) {
        self.send(collection, StoreEvent::Error(message.to_string()));
    }

    /// Collections that currently have at least one subscriber.
    pub(crate) fn active_collections(&self) -> Vec<String> {
        let subs = self.subscribers.lock().expect("hub lock");
        let mut collections: Vec<String> =
            subs.values().map(|s| s.collection.clone()).collect();
        collections.sort();
        collections.dedup();
        collections
    }

    fn send(&self, collection: &str, event: StoreEvent) {
        let mut subs = self.subscribers.lock().expect("hub lock");
        let mut dead: Vec<u64> = Vec::new();
        for (id, sub) in subs.iter() {
            if sub.collection != collection {
                continue;
            }
            if sub.sender.send(event.clone()).is_err() {
                dead.push(*id);
            }
        }
        for id in dead {
            subs.remove(&id);
        }
    }

    fn remove(&self, id: u64) {
        self.subscribers.lock().expect("hub lock").remove(&id);
    }
}

/// Cancellation token for a change subscription.
///
/// `cancel` is an idempotent no-op after the first call and remains safe
/// after the backing store has been dropped. Dropping the subscription
/// cancels it as well.
pub struct Subscription {
    id: u64,
    hub: Weak<SubscriberHub>,
    cancelled: AtomicBool,
}

impl Subscription {
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(self.id);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Shallow-merge a patch object into existing document fields.
///
/// Both backends use this so merge semantics cannot drift between them.
pub(crate) fn merge_document_fields(fields: &mut Value, patch: &Value) {
    let Some(patch_obj) = patch.as_object() else {
        return;
    };
    if !fields.is_object() {
        *fields = Value::Object(serde_json::Map::new());
    }
    let base = fields.as_object_mut().expect("object fields");
    for (key, value) in patch_obj {
        base.insert(key.clone(), value.clone());
    }
}
