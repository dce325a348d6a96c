//! Browsing session
//!
//! Wires the store adapter, reconciler, and view together behind one
//! explicitly-constructed context. Nothing here reaches for globals: the
//! binary builds a [`GarageContext`] once and hands it to whichever
//! front-end (CLI, TUI, relay) needs it.

use std::sync::mpsc::Receiver;
use std::sync::Arc;

use crate::auth::AuthService;
use crate::config::GarageConfig;
use crate::evaluate::{self, EvaluationRequest, RequestWatch};
use crate::reconcile::{Promotion, Reconciler};
use crate::record::{CachedPrompt, PromptRecord};
use crate::store::{RecordStore, StoreEvent, Subscription};
use crate::view::{self, SortSpec};

/// Everything a front-end needs, built once and passed down.
#[derive(Clone)]
pub struct GarageContext {
    pub store: Arc<dyn RecordStore>,
    pub auth: Arc<AuthService>,
    pub config: GarageConfig,
}

impl GarageContext {
    pub fn new(store: Arc<dyn RecordStore>, auth: Arc<AuthService>, config: GarageConfig) -> Self {
        Self { store, auth, config }
    }
}

/// Aggregate numbers for the landing counter and `garage stats`.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct CollectionStats {
    pub total: usize,
    pub scored: usize,
    pub average_score: f64,
    pub collection: String,
}

/// What a pump pass observed.
#[derive(Debug, Default)]
pub struct PumpResult {
    /// True when at least one batch was applied and the view changed shape.
    pub applied_batches: usize,
    pub promotions: Vec<Promotion>,
    pub stream_errors: Vec<String>,
}

/// One user's browsing state over the prompt list.
pub struct GarageSession {
    ctx: GarageContext,
    reconciler: Reconciler,
    collection: String,
    pub sort: SortSpec,
    pub search: String,
    live: Option<(Subscription, Receiver<StoreEvent>)>,
}

impl GarageSession {
    pub fn new(ctx: GarageContext) -> Self {
        let collection = ctx.config.collections.primary.clone();
        Self {
            ctx,
            reconciler: Reconciler::new(),
            collection,
            sort: SortSpec::default(),
            search: String::new(),
            live: None,
        }
    }

    /// Collection currently backing the list.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn context(&self) -> &GarageContext {
        &self.ctx
    }

    /// Initial load: prefer the primary collection, fall back to the
    /// configured secondary when the primary is empty. Store outages
    /// degrade to an empty list rather than an error.
    pub fn init(&mut self) -> usize {
        let primary = &self.ctx.config.collections.primary;
        let mut records = self.ctx.store.fetch_all_records(primary);
        if records.is_empty() {
            let fallback = &self.ctx.config.collections.fallback;
            records = self.ctx.store.fetch_all_records(fallback);
            self.collection = fallback.clone();
        } else {
            self.collection = primary.clone();
        }
        let count = records.len();
        self.reconciler.seed(records);
        count
    }

    /// Start listening for store changes. Idempotent.
    pub fn start_live_updates(&mut self) {
        if self.live.is_none() {
            self.live = Some(self.ctx.store.subscribe(&self.collection));
        }
    }

    /// Stop listening. Safe to call when not listening or repeatedly.
    pub fn stop_live_updates(&mut self) {
        if let Some((subscription, _)) = self.live.take() {
            subscription.cancel();
        }
    }

    pub fn is_live(&self) -> bool {
        self.live.is_some()
    }

    /// Drain queued store events, applying each batch exactly once.
    pub fn pump(&mut self) -> PumpResult {
        let mut result = PumpResult::default();
        let Some((_, receiver)) = &self.live else {
            return result;
        };

        let mut batches = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            match event {
                StoreEvent::Changes(events) => batches.push(events),
                StoreEvent::Error(message) => {
                    log::warn!("store stream error: {}", message);
                    result.stream_errors.push(message);
                }
            }
        }

        for batch in batches {
            let outcome = self.reconciler.apply_batch(&batch);
            result.promotions.extend(outcome.promotions);
            result.applied_batches += 1;
        }
        result
    }

    /// The consolidated, sorted, filtered list the presentation renders.
    pub fn visible(&self) -> Vec<CachedPrompt> {
        view::view(&self.reconciler.consolidated(), self.sort, &self.search)
    }

    /// Start composing a new prompt. Requires a signed-in user; refuses a
    /// second draft so the caller can focus the existing one instead.
    pub fn begin_draft(&mut self) -> Result<bool, &'static str> {
        if !self.ctx.auth.is_authenticated() {
            return Err("Sign in to create a new branch");
        }
        let draft = PromptRecord {
            title: Some("New prompt — Blank".to_string()),
            ..PromptRecord::default()
        };
        Ok(self.reconciler.insert_placeholder(draft))
    }

    /// Abandon the draft, if any.
    pub fn discard_draft(&mut self) -> bool {
        self.reconciler.discard_placeholder()
    }

    pub fn has_draft(&self) -> bool {
        self.reconciler.has_placeholder()
    }

    /// Queue an evaluation for the given slot and return a watch over the
    /// request's status transitions.
    pub fn request_evaluation(
        &self,
        prompt_text: &str,
        model: &str,
        slot_id: &str,
        branch_name: &str,
    ) -> Result<(String, RequestWatch), evaluate::EvaluateError> {
        let request = EvaluationRequest {
            prompt: prompt_text.to_string(),
            selected_model: model.to_string(),
            prompt_id: slot_id.to_string(),
            source_prompt_id: slot_id.to_string(),
            branch_name: branch_name.to_string(),
            user: self.ctx.auth.current_user().as_ref().map(Into::into),
            ..EvaluationRequest::default()
        };
        let collection = &self.ctx.config.collections.evaluations;
        let id = evaluate::create_request(self.ctx.store.as_ref(), collection, &request)?;
        let watch = RequestWatch::new(self.ctx.store.as_ref(), collection, &id);
        Ok((id, watch))
    }

    /// Aggregates over the consolidated view.
    pub fn stats(&self) -> CollectionStats {
        let entries = self.reconciler.consolidated();
        let persisted: Vec<&CachedPrompt> = entries
            .iter()
            .filter(|e| !e.slot.is_placeholder())
            .collect();
        let total = persisted.len();
        let scored = persisted.iter().filter(|e| e.record.score() > 0.0).count();
        let average_score = if total > 0 {
            let sum: f64 = persisted.iter().map(|e| e.record.score()).sum();
            (sum / total as f64 * 100.0).round() / 100.0
        } else {
            0.0
        };
        CollectionStats {
            total,
            scored,
            average_score,
            collection: self.collection.clone(),
        }
    }
}

impl Drop for GarageSession {
    fn drop(&mut self) {
        self.stop_live_updates();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::User;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn context(store: Arc<MemoryStore>, signed_in: bool) -> GarageContext {
        let auth = if signed_in {
            AuthService::with_user(User {
                uid: "u1".to_string(),
                username: Some("tester".to_string()),
                email: None,
            })
        } else {
            AuthService::new()
        };
        GarageContext::new(store, Arc::new(auth), GarageConfig::default())
    }

    #[test]
    fn test_init_prefers_primary_collection() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_with_id("prompts", "p1", json!({"title": "Primary"}))
            .unwrap();
        store
            .insert_with_id("branches", "b1", json!({"title": "Fallback"}))
            .unwrap();

        let mut session = GarageSession::new(context(store, false));
        assert_eq!(session.init(), 1);
        assert_eq!(session.collection(), "prompts");
    }

    #[test]
    fn test_init_falls_back_when_primary_empty() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_with_id("branches", "b1", json!({"title": "Fallback"}))
            .unwrap();

        let mut session = GarageSession::new(context(store, false));
        assert_eq!(session.init(), 1);
        assert_eq!(session.collection(), "branches");
        assert_eq!(session.visible()[0].record.display_title(), "Fallback");
    }

    #[test]
    fn test_live_updates_flow_into_visible_list() {
        let store = Arc::new(MemoryStore::new());
        let mut session = GarageSession::new(context(store.clone(), false));
        session.init();
        session.start_live_updates();

        store
            .insert_with_id(
                "prompts",
                "a",
                json!({"branch_root_id": "r1", "score_total": 3}),
            )
            .unwrap();
        store
            .insert_with_id(
                "prompts",
                "b",
                json!({"branch_root_id": "r1", "score_total": 7}),
            )
            .unwrap();

        let result = session.pump();
        assert_eq!(result.applied_batches, 2);

        let visible = session.visible();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].record.id, "b");
    }

    #[test]
    fn test_stop_live_updates_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let mut session = GarageSession::new(context(store.clone(), false));
        session.start_live_updates();
        assert!(session.is_live());

        session.stop_live_updates();
        session.stop_live_updates();
        assert!(!session.is_live());

        store.insert_with_id("prompts", "a", json!({})).unwrap();
        let result = session.pump();
        assert_eq!(result.applied_batches, 0);
    }

    #[test]
    fn test_begin_draft_requires_auth() {
        let store = Arc::new(MemoryStore::new());
        let mut session = GarageSession::new(context(store.clone(), false));
        assert!(session.begin_draft().is_err());

        let mut session = GarageSession::new(context(store, true));
        assert_eq!(session.begin_draft(), Ok(true));
        // Second draft is refused, not an error.
        assert_eq!(session.begin_draft(), Ok(false));
        assert!(session.has_draft());
        assert!(session.discard_draft());
    }

    #[test]
    fn test_draft_promotion_through_live_updates() {
        let store = Arc::new(MemoryStore::new());
        let mut session = GarageSession::new(context(store.clone(), true));
        session.init();
        session.start_live_updates();
        session.begin_draft().unwrap();

        store
            .insert_with_id(
                "prompts",
                "real-1",
                json!({"parent_id": "blank", "title": "Persisted"}),
            )
            .unwrap();

        let result = session.pump();
        assert_eq!(result.promotions.len(), 1);
        assert_eq!(result.promotions[0].to, "real-1");
        assert!(!session.has_draft());

        let visible = session.visible();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].record.id, "real-1");
    }

    #[test]
    fn test_stats() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_with_id("prompts", "a", json!({"score_total": 4}))
            .unwrap();
        store
            .insert_with_id("prompts", "b", json!({"score_total": 5}))
            .unwrap();
        store.insert_with_id("prompts", "c", json!({})).unwrap();

        let mut session = GarageSession::new(context(store, false));
        session.init();

        let stats = session.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.scored, 2);
        assert_eq!(stats.average_score, 3.0);
        assert_eq!(stats.collection, "prompts");
    }

    #[test]
    fn test_request_evaluation_uses_session_identity() {
        let store = Arc::new(MemoryStore::new());
        let mut session = GarageSession::new(context(store.clone(), true));
        session.init();

        let (id, _watch) = session
            .request_evaluation("Some prompt", "Auto", "blank", "Draft")
            .unwrap();

        let doc = store.fetch_by_id("evaluation_requests", &id).unwrap();
        assert_eq!(doc.fields["user"]["username"], "tester");
        assert_eq!(doc.fields["status"], "pending");
    }
}
