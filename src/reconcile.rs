//! Change reconciler
//!
//! Owns the in-memory prompt cache and applies ordered change batches from
//! the record store. External readers only ever get clones; nothing
//! outside this module mutates the cache.
//!
//! Per-event rules:
//! - `added`: duplicate delivery is a no-op. An arrival whose payload
//!   carries `parent_id == "blank"` while a placeholder is cached promotes
//!   the placeholder in place instead of inserting. Otherwise the record
//!   is inserted at the head (most-recent-first).
//! - `modified`: unknown ids are ignored; known ids get a shallow field
//!   merge that preserves fields absent from the payload.
//! - `removed`: delete if present, otherwise a no-op.
//!
//! Malformed events (missing id) are dropped with a logged warning; the
//! reconciler never raises to its caller. Consolidation runs once per
//! batch, after every event in it has been applied.

use serde_json::Value;

use crate::consolidate::consolidate;
use crate::record::{CachedPrompt, PromptRecord, SlotId};
use crate::store::{ChangeEvent, ChangeKind};

/// Emitted when the placeholder slot takes on a persisted identity, so the
/// presentation layer can re-key any open UI state (expanded panel, editor
/// bindings) without losing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Promotion {
    /// The store-assigned id the placeholder slot now carries.
    pub to: String,
}

/// Result of applying one batch: the consolidated view published exactly
/// once per batch, plus any placeholder promotions that happened inside it.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    pub view: Vec<CachedPrompt>,
    pub promotions: Vec<Promotion>,
}

/// The cache owner. One instance per browsing session.
#[derive(Debug, Default)]
pub struct Reconciler {
    cache: Vec<CachedPrompt>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all persisted entries with a fresh snapshot, keeping any
    /// placeholder the user is still composing.
    pub fn seed(&mut self, records: Vec<PromptRecord>) {
        self.cache.retain(|entry| entry.slot.is_placeholder());
        self.cache
            .extend(records.into_iter().map(CachedPrompt::persisted));
    }

    /// Insert the optimistic placeholder row at the head of the cache.
    ///
    /// At most one placeholder may exist; a second insert is refused so the
    /// caller can scroll to the existing one instead.
    pub fn insert_placeholder(&mut self, record: PromptRecord) -> bool {
        if self.has_placeholder() {
            return false;
        }
        self.cache.insert(0, CachedPrompt::placeholder(record));
        true
    }

    /// Drop the placeholder without touching the store (the user abandoned
    /// the draft). Returns whether one existed.
    pub fn discard_placeholder(&mut self) -> bool {
        let before = self.cache.len();
        self.cache.retain(|entry| !entry.slot.is_placeholder());
        self.cache.len() != before
    }

    pub fn has_placeholder(&self) -> bool {
        self.cache.iter().any(|entry| entry.slot.is_placeholder())
    }

    /// Number of raw cache entries (pre-consolidation).
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Clone of the raw cache, unconsolidated.
    pub fn snapshot(&self) -> Vec<CachedPrompt> {
        self.cache.clone()
    }

    /// Consolidated clone of the cache, as the presentation layer sees it.
    pub fn consolidated(&self) -> Vec<CachedPrompt> {
        consolidate(&self.cache)
    }

    /// Apply one ordered batch, then consolidate and publish exactly once.
    pub fn apply_batch(&mut self, events: &[ChangeEvent]) -> BatchOutcome {
        let mut promotions = Vec::new();

        for event in events {
            if event.id.is_empty() {
                log::warn!("dropping change event with missing id: {:?}", event.kind);
                continue;
            }
            match event.kind {
                ChangeKind::Added => {
                    if let Some(promotion) = self.apply_added(&event.id, event.data.as_ref()) {
                        promotions.push(promotion);
                    }
                }
                ChangeKind::Modified => self.apply_modified(&event.id, event.data.as_ref()),
                ChangeKind::Removed => self.apply_removed(&event.id),
            }
        }

        BatchOutcome {
            view: consolidate(&self.cache),
            promotions,
        }
    }

    fn apply_added(&mut self, id: &str, data: Option<&Value>) -> Option<Promotion> {
        if self.find_persisted(id).is_some() {
            // Duplicate delivery.
            return None;
        }

        let completes_placeholder = data
            .and_then(|d| d.get("parent_id"))
            .and_then(|v| v.as_str())
            .map(|parent| parent == SlotId::PLACEHOLDER_PARENT)
            .unwrap_or(false);

        if completes_placeholder && self.has_placeholder() {
            return self.promote_placeholder(id, data);
        }

        let fields = data.cloned().unwrap_or(Value::Null);
        self.cache
            .insert(0, CachedPrompt::persisted(PromptRecord::from_fields(id, &fields)));
        None
    }

    fn apply_modified(&mut self, id: &str, data: Option<&Value>) {
        let Some(entry) = self.find_persisted_mut(id) else {
            return;
        };
        if let Some(patch) = data {
            entry.record.merge_fields(patch);
            // The event id stays authoritative for the slot.
            entry.record.id = id.to_string();
        }
    }

    fn apply_removed(&mut self, id: &str) {
        self.cache
            .retain(|entry| entry.slot.persisted_id() != Some(id));
    }

    /// The explicit promotion operation: the placeholder slot takes on the
    /// persisted id, the server payload is merged over the draft, and any
    /// locally-cached fields the payload does not mention survive.
    fn promote_placeholder(&mut self, id: &str, data: Option<&Value>) -> Option<Promotion> {
        let entry = self
            .cache
            .iter_mut()
            .find(|entry| entry.slot.is_placeholder())?;
        if let Some(patch) = data {
            entry.record.merge_fields(patch);
        }
        entry.record.id = id.to_string();
        entry.slot = SlotId::Persisted(id.to_string());
        Some(Promotion { to: id.to_string() })
    }

    fn find_persisted(&self, id: &str) -> Option<&CachedPrompt> {
        self.cache
            .iter()
            .find(|entry| entry.slot.persisted_id() == Some(id))
    }

    fn find_persisted_mut(&mut self, id: &str) -> Option<&mut CachedPrompt> {
        self.cache
            .iter_mut()
            .find(|entry| entry.slot.persisted_id() == Some(id))
    }
}
