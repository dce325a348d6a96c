//! Terminal browser for the prompt garage
//!
//! Renders the consolidated prompt list with search, sort cycling, and an
//! expandable detail panel showing the latest evaluation. Live store
//! changes are pumped into the list between input polls; a placeholder
//! draft that gets persisted keeps its open panel across the rename.

pub mod app;
pub mod events;
pub mod ui;

use std::io;
use std::time::{Duration, Instant};

use crossterm::{
    event::{poll, read, Event},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::prelude::*;

use crate::session::GarageSession;
use app::App;
use events::handle_key;

/// Run the TUI over an initialized session.
pub fn run(session: GarageSession) -> Result<(), Box<dyn std::error::Error>> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Run the app, ensuring cleanup happens even on error
    let result = run_event_loop(&mut terminal, session);

    // Restore terminal - this MUST run even if app fails
    let _ = disable_raw_mode();
    let _ = execute!(terminal.backend_mut(), LeaveAlternateScreen);
    let _ = terminal.show_cursor();

    result
}

fn run_event_loop<B: Backend>(
    terminal: &mut Terminal<B>,
    mut session: GarageSession,
) -> Result<(), Box<dyn std::error::Error>> {
    session.init();
    session.start_live_updates();

    let mut app = App::new(session);
    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();

    loop {
        terminal.draw(|f| ui::draw(f, &mut app))?;

        let timeout = tick_rate.saturating_sub(last_tick.elapsed());
        if poll(timeout)? {
            if let Event::Key(key) = read()? {
                if handle_key(&mut app, key) {
                    return Ok(());
                }
            }
        }

        if last_tick.elapsed() >= tick_rate {
            // Drain store changes between input polls.
            app.pump();
            last_tick = Instant::now();
        }
    }
}
