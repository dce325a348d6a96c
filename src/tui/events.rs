//! Key handling for the TUI
//!
//! Returns `true` from [`handle_key`] to quit. Vim-style movement in
//! normal mode; search mode captures text until Enter or Esc.

use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

use super::app::{App, Mode};

/// Process one key event. Returns true when the app should exit.
pub fn handle_key(app: &mut App, key: KeyEvent) -> bool {
    // Ignore key release events (Windows terminals send both).
    if key.kind == KeyEventKind::Release {
        return false;
    }

    match app.mode {
        Mode::Search => handle_search_key(app, key),
        Mode::Normal => handle_normal_key(app, key),
    }
}

fn handle_normal_key(app: &mut App, key: KeyEvent) -> bool {
    match key.code {
        KeyCode::Char('q') => return true,
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => return true,

        // Navigation
        KeyCode::Char('j') | KeyCode::Down => app.move_down(),
        KeyCode::Char('k') | KeyCode::Up => app.move_up(),
        KeyCode::Char('g') | KeyCode::Home => app.jump_to_top(),
        KeyCode::Char('G') | KeyCode::End => app.jump_to_bottom(),

        // Row expansion
        KeyCode::Enter => app.toggle_expand(),

        // Sort and search
        KeyCode::Char('s') => app.cycle_sort(),
        KeyCode::Char('/') => app.begin_search(),
        KeyCode::Esc => app.clear_search(),

        // Draft lifecycle
        KeyCode::Char('n') => app.new_draft(),
        KeyCode::Char('d') => app.discard_draft(),

        _ => {}
    }
    false
}

fn handle_search_key(app: &mut App, key: KeyEvent) -> bool {
    match key.code {
        KeyCode::Enter => app.commit_search(),
        KeyCode::Esc => app.cancel_search(),
        KeyCode::Backspace => {
            app.search_input.pop();
        }
        KeyCode::Char(c) => app.search_input.push(c),
        _ => {}
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthService;
    use crate::config::GarageConfig;
    use crate::session::{GarageContext, GarageSession};
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn app() -> App {
        let ctx = GarageContext::new(
            Arc::new(MemoryStore::new()),
            Arc::new(AuthService::new()),
            GarageConfig::default(),
        );
        App::new(GarageSession::new(ctx))
    }

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn test_quit_keys() {
        let mut a = app();
        assert!(handle_key(&mut a, press(KeyCode::Char('q'))));
        assert!(handle_key(
            &mut a,
            KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)
        ));
        assert!(!handle_key(&mut a, press(KeyCode::Char('j'))));
    }

    #[test]
    fn test_search_mode_captures_text() {
        let mut a = app();
        handle_key(&mut a, press(KeyCode::Char('/')));
        assert_eq!(a.mode, Mode::Search);

        handle_key(&mut a, press(KeyCode::Char('a')));
        handle_key(&mut a, press(KeyCode::Char('b')));
        handle_key(&mut a, press(KeyCode::Backspace));
        assert_eq!(a.search_input, "a");

        // 'q' is text while searching, not quit.
        assert!(!handle_key(&mut a, press(KeyCode::Char('q'))));
        assert_eq!(a.search_input, "aq");

        handle_key(&mut a, press(KeyCode::Enter));
        assert_eq!(a.mode, Mode::Normal);
        assert_eq!(a.session.search, "aq");
    }

    #[test]
    fn test_search_escape_cancels_without_committing() {
        let mut a = app();
        handle_key(&mut a, press(KeyCode::Char('/')));
        handle_key(&mut a, press(KeyCode::Char('x')));
        handle_key(&mut a, press(KeyCode::Esc));

        assert_eq!(a.mode, Mode::Normal);
        assert_eq!(a.session.search, "");
    }
}
