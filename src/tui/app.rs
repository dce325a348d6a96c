//! Application state for the TUI

use crate::record::{CachedPrompt, SlotId};
use crate::reconcile::Promotion;
use crate::session::GarageSession;

/// Input mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Normal,
    Search,
}

/// Main application state
pub struct App {
    pub session: GarageSession,

    /// Rendered rows, refreshed from the session after every change.
    pub rows: Vec<CachedPrompt>,

    // View state
    pub selected: usize,
    pub scroll_offset: usize,

    /// Slot whose detail panel is open. Keyed by slot identity, not list
    /// position, so promotion and re-sorting keep the panel attached.
    pub expanded: Option<SlotId>,

    pub mode: Mode,
    pub search_input: String,
    pub status: String,
}

impl App {
    pub fn new(session: GarageSession) -> Self {
        let mut app = Self {
            session,
            rows: Vec::new(),
            selected: 0,
            scroll_offset: 0,
            expanded: None,
            mode: Mode::Normal,
            search_input: String::new(),
            status: String::new(),
        };
        app.refresh_rows();
        app
    }

    /// Re-derive the visible rows and clamp the selection.
    pub fn refresh_rows(&mut self) {
        self.rows = self.session.visible();
        if self.selected >= self.rows.len() && !self.rows.is_empty() {
            self.selected = self.rows.len() - 1;
        }
        if self.rows.is_empty() {
            self.selected = 0;
        }
    }

    pub fn selected_entry(&self) -> Option<&CachedPrompt> {
        self.rows.get(self.selected)
    }

    /// The entry whose panel is open, wherever it sorted to.
    pub fn expanded_entry(&self) -> Option<&CachedPrompt> {
        let slot = self.expanded.as_ref()?;
        self.rows.iter().find(|entry| entry.slot == *slot)
    }

    pub fn move_up(&mut self) {
        self.selected = self.selected.saturating_sub(1);
    }

    pub fn move_down(&mut self) {
        if !self.rows.is_empty() {
            self.selected = (self.selected + 1).min(self.rows.len() - 1);
        }
    }

    pub fn jump_to_top(&mut self) {
        self.selected = 0;
    }

    pub fn jump_to_bottom(&mut self) {
        self.selected = self.rows.len().saturating_sub(1);
    }

    /// Expand the selected row, or collapse it if already open. One panel
    /// at a time, like the row accordion it mirrors.
    pub fn toggle_expand(&mut self) {
        let Some(entry) = self.selected_entry() else {
            return;
        };
        let slot = entry.slot.clone();
        if self.expanded.as_ref() == Some(&slot) {
            self.expanded = None;
        } else {
            self.expanded = Some(slot);
        }
    }

    pub fn cycle_sort(&mut self) {
        self.session.sort = self.session.sort.cycle();
        self.refresh_rows();
    }

    pub fn begin_search(&mut self) {
        self.mode = Mode::Search;
        self.search_input = self.session.search.clone();
    }

    pub fn commit_search(&mut self) {
        self.session.search = self.search_input.trim().to_lowercase();
        self.mode = Mode::Normal;
        self.refresh_rows();
    }

    pub fn cancel_search(&mut self) {
        self.mode = Mode::Normal;
        self.search_input.clear();
    }

    pub fn clear_search(&mut self) {
        self.session.search.clear();
        self.refresh_rows();
    }

    /// Start composing a new prompt, focusing the draft row.
    pub fn new_draft(&mut self) {
        match self.session.begin_draft() {
            Ok(true) => {
                self.expanded = Some(SlotId::Placeholder);
                self.status = "Composing a new prompt".to_string();
            }
            Ok(false) => {
                self.status = "A draft is already open".to_string();
            }
            Err(message) => {
                self.status = message.to_string();
            }
        }
        self.refresh_rows();
        // Draft row is pinned to the top.
        if self.session.has_draft() {
            self.selected = 0;
        }
    }

    pub fn discard_draft(&mut self) {
        if self.session.discard_draft() {
            if self.expanded == Some(SlotId::Placeholder) {
                self.expanded = None;
            }
            self.status = "Draft discarded".to_string();
            self.refresh_rows();
        }
    }

    /// Drain live store changes and fold them into the view.
    pub fn pump(&mut self) {
        let result = self.session.pump();
        if let Some(message) = result.stream_errors.last() {
            self.status = format!("Store stream error: {}", message);
        }
        self.apply_promotions(&result.promotions);
        if result.applied_batches > 0 {
            self.refresh_rows();
        }
    }

    /// Re-key open UI state when the draft slot takes a persisted id, so
    /// the panel stays open across the rename.
    pub fn apply_promotions(&mut self, promotions: &[Promotion]) {
        for promotion in promotions {
            if self.expanded == Some(SlotId::Placeholder) {
                self.expanded = Some(SlotId::Persisted(promotion.to.clone()));
            }
            self.status = "Draft saved to the garage".to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthService, User};
    use crate::config::GarageConfig;
    use crate::session::GarageContext;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    fn app_with_store(store: Arc<MemoryStore>) -> App {
        let ctx = GarageContext::new(
            store,
            Arc::new(AuthService::with_user(User {
                uid: "u1".to_string(),
                username: Some("tester".to_string()),
                email: None,
            })),
            GarageConfig::default(),
        );
        let mut session = GarageSession::new(ctx);
        session.init();
        session.start_live_updates();
        App::new(session)
    }

    fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_with_id("prompts", "a", json!({"title": "Alpha", "score_total": 2}))
            .unwrap();
        store
            .insert_with_id("prompts", "b", json!({"title": "Beta", "score_total": 5}))
            .unwrap();
        store
    }

    #[test]
    fn test_selection_clamps_to_rows() {
        let mut app = app_with_store(seeded_store());
        assert_eq!(app.rows.len(), 2);

        app.move_down();
        app.move_down();
        assert_eq!(app.selected, 1);
        app.move_up();
        app.move_up();
        assert_eq!(app.selected, 0);
    }

    #[test]
    fn test_expand_tracks_slot_across_sort_changes() {
        let mut app = app_with_store(seeded_store());
        app.jump_to_bottom();
        app.toggle_expand();
        let expanded_id = app
            .expanded_entry()
            .map(|e| e.record.id.clone())
            .expect("panel open");

        app.cycle_sort();
        assert_eq!(
            app.expanded_entry().map(|e| e.record.id.clone()),
            Some(expanded_id)
        );
    }

    #[test]
    fn test_search_commit_filters_rows() {
        let mut app = app_with_store(seeded_store());
        app.begin_search();
        app.search_input = "beta".to_string();
        app.commit_search();

        assert_eq!(app.rows.len(), 1);
        assert_eq!(app.rows[0].record.display_title(), "Beta");

        app.clear_search();
        assert_eq!(app.rows.len(), 2);
    }

    #[test]
    fn test_draft_promotion_keeps_panel_open() {
        let store = seeded_store();
        let mut app = app_with_store(store.clone());
        app.new_draft();
        assert_eq!(app.expanded, Some(SlotId::Placeholder));
        assert!(app.rows[0].slot.is_placeholder());

        store
            .insert_with_id("prompts", "real-9", json!({"parent_id": "blank", "title": "Saved"}))
            .unwrap();
        app.pump();

        assert_eq!(app.expanded, Some(SlotId::Persisted("real-9".to_string())));
        assert_eq!(
            app.expanded_entry().map(|e| e.record.display_title()),
            Some("Saved")
        );
    }

    #[test]
    fn test_discard_draft_closes_panel() {
        let mut app = app_with_store(seeded_store());
        app.new_draft();
        app.discard_draft();
        assert!(app.expanded.is_none());
        assert!(!app.session.has_draft());
    }
}
