//! Garage - a collaborative prompt garage
//!
//! Author prompt branches, queue AI evaluations, and browse scored
//! submissions. Prompts live in a document-style record store; this crate
//! keeps an in-memory cache reconciled with the store's change stream,
//! consolidates each branch down to its current best member, and serves
//! the result to a terminal browser, a CLI, and a small HTTP relay.
//!
//! # Architecture
//!
//! | Layer | Module | Role |
//! |-------|--------|------|
//! | store | [`store`] | document store adapter + embedded backends |
//! | core  | [`reconcile`] | applies change batches to the cache |
//! | core  | [`consolidate`] | picks the current best per branch |
//! | core  | [`view`] | pure sort/filter over the consolidated list |
//! | glue  | [`session`] | wires store, auth, and cache per front-end |
//! | edges | [`serve`], [`tui`] | HTTP relay and terminal browser |
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use garage::auth::AuthService;
//! use garage::config::GarageConfig;
//! use garage::session::{GarageContext, GarageSession};
//! use garage::store::MemoryStore;
//!
//! let ctx = GarageContext::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(AuthService::new()),
//!     GarageConfig::default(),
//! );
//!
//! let mut session = GarageSession::new(ctx);
//! session.init();
//! session.start_live_updates();
//!
//! for entry in session.visible() {
//!     println!("{}", entry.record.display_title());
//! }
//! ```

pub mod auth;
pub mod config;
pub mod consolidate;
pub mod docs;
pub mod evaluate;
pub mod reconcile;
pub mod record;
pub mod schema;
pub mod serve;
pub mod session;
pub mod store;
pub mod tui;
pub mod view;

pub use auth::{AuthService, AuthState, User};
pub use config::GarageConfig;
pub use consolidate::consolidate;
pub use record::{CachedPrompt, EvaluationResult, PromptRecord, SlotId};
pub use reconcile::{BatchOutcome, Promotion, Reconciler};
pub use session::{CollectionStats, GarageContext, GarageSession};
pub use store::{
    ChangeEvent, ChangeKind, Document, MemoryStore, RecordStore, SqliteStore, StoreError,
    StoreEvent, Subscription,
};
pub use view::{view, Direction, SortSpec};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        // Verify core types are re-exported from crate root
        let _ = SortSpec::default();
        let _ = Reconciler::new();
    }
}
