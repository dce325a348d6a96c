//! Rendering for the TUI

use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState, Wrap},
    Frame,
};

use crate::record::{CachedPrompt, EvaluationResult};
use crate::view::{format_score, rank_cell};

use super::app::{App, Mode};

pub fn draw(f: &mut Frame, app: &mut App) {
    let detail_height = if app.expanded_entry().is_some() { 12 } else { 0 };
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(3),
            Constraint::Length(detail_height),
            Constraint::Length(1),
        ])
        .split(f.area());

    draw_header(f, app, chunks[0]);
    draw_list(f, app, chunks[1]);
    if detail_height > 0 {
        draw_detail(f, app, chunks[2]);
    }
    draw_status(f, app, chunks[3]);
}

fn draw_header(f: &mut Frame, app: &App, area: Rect) {
    let search = match app.mode {
        Mode::Search => format!("  /{}_", app.search_input),
        Mode::Normal if !app.session.search.is_empty() => {
            format!("  /{}", app.session.search)
        }
        Mode::Normal => String::new(),
    };
    let header = Line::from(vec![
        Span::styled(
            " Prompt Garage ",
            Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
        ),
        Span::raw(format!(
            "[{}] sort: {}{}",
            app.session.collection(),
            app.session.sort.header_label(),
            search
        )),
    ]);
    f.render_widget(Paragraph::new(header), area);
}

fn draw_list(f: &mut Frame, app: &mut App, area: Rect) {
    let rows: Vec<Row> = app
        .rows
        .iter()
        .enumerate()
        .map(|(index, entry)| row_for(entry, app, index))
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(8),
            Constraint::Min(24),
            Constraint::Length(16),
        ],
    )
    .header(
        Row::new(vec![app.session.sort.header_label(), "Title", "Owner"])
            .style(Style::default().add_modifier(Modifier::UNDERLINED)),
    )
    .row_highlight_style(Style::default().bg(Color::DarkGray))
    .block(Block::default().borders(Borders::NONE));

    let mut state = TableState::default();
    state.select(if app.rows.is_empty() {
        None
    } else {
        Some(app.selected)
    });
    *state.offset_mut() = app.scroll_offset;
    f.render_stateful_widget(table, area, &mut state);
    app.scroll_offset = state.offset();
}

fn row_for<'a>(entry: &'a CachedPrompt, app: &App, index: usize) -> Row<'a> {
    if entry.slot.is_placeholder() {
        return Row::new(vec![
            Cell::from("New"),
            Cell::from(entry.record.display_title().to_string()),
            Cell::from("—"),
        ])
        .style(Style::default().fg(Color::Yellow));
    }

    let rank = rank_cell(&entry.record, app.session.sort, index + 1);
    let owner = entry
        .record
        .username
        .clone()
        .unwrap_or_else(|| "—".to_string());
    let mut row = Row::new(vec![
        Cell::from(rank),
        Cell::from(truncate_title(entry.record.display_title())),
        Cell::from(owner),
    ]);
    if app.expanded.as_ref() == Some(&entry.slot) {
        row = row.style(Style::default().add_modifier(Modifier::BOLD));
    }
    row
}

fn draw_detail(f: &mut Frame, app: &App, area: Rect) {
    let Some(entry) = app.expanded_entry() else {
        return;
    };

    let lines = match &entry.record.latest_evaluation {
        Some(eval) => format_summary(eval),
        None if entry.slot.is_placeholder() => vec![Line::from(
            "Draft prompt. Press 'd' to discard, or evaluate it from the CLI.",
        )],
        None => vec![Line::from("No evaluation yet.")],
    };

    let panel = Paragraph::new(lines)
        .wrap(Wrap { trim: true })
        .block(
            Block::default()
                .borders(Borders::TOP)
                .title(format!(" {} ", entry.record.display_title())),
        );
    f.render_widget(panel, area);
}

fn draw_status(f: &mut Frame, app: &App, area: Rect) {
    let keys = match app.mode {
        Mode::Search => "enter confirm  esc cancel",
        Mode::Normal => "j/k move  enter expand  s sort  / search  n new  d discard  q quit",
    };
    let status = if app.status.is_empty() {
        Line::from(Span::styled(keys, Style::default().fg(Color::DarkGray)))
    } else {
        Line::from(vec![
            Span::styled(app.status.clone(), Style::default().fg(Color::Yellow)),
            Span::styled(
                format!("  ·  {}", keys),
                Style::default().fg(Color::DarkGray),
            ),
        ])
    };
    f.render_widget(Paragraph::new(status), area);
}

/// Evaluation summary lines: total first, then each dimension with its
/// rationale, then weaknesses and suggestions.
fn format_summary(eval: &EvaluationResult) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    lines.push(Line::from(Span::styled(
        format!("Total: {}", metric(eval.score_total)),
        Style::default().add_modifier(Modifier::BOLD),
    )));

    lines.push(Line::from(format!("Accuracy — ({})", metric(eval.accuracy))));
    if let Some(text) = eval.accuracy_rationale() {
        lines.push(Line::from(text.to_string()));
    }
    lines.push(Line::from(format!("Complexity — ({})", metric(eval.complexity))));
    if let Some(text) = eval.complexity_rationale() {
        lines.push(Line::from(text.to_string()));
    }
    lines.push(Line::from(format!("Reliability — ({})", metric(eval.reliability))));
    if let Some(text) = eval.reliability_rationale() {
        lines.push(Line::from(text.to_string()));
    }

    if let Some(weaknesses) = eval.weaknesses.as_deref().filter(|s| !s.trim().is_empty()) {
        lines.push(Line::from(Span::styled(
            "Weaknesses",
            Style::default().add_modifier(Modifier::BOLD),
        )));
        lines.push(Line::from(weaknesses.to_string()));
    }
    if let Some(suggestions) = eval.suggestions.as_deref().filter(|s| !s.trim().is_empty()) {
        lines.push(Line::from(Span::styled(
            "Suggestions",
            Style::default().add_modifier(Modifier::BOLD),
        )));
        lines.push(Line::from(suggestions.to_string()));
    }
    lines
}

fn metric(value: Option<f64>) -> String {
    match value {
        Some(v) => format_score(v),
        None => "N/A".to_string(),
    }
}

fn truncate_title(title: &str) -> String {
    const MAX: usize = 45;
    if title.chars().count() <= MAX {
        title.to_string()
    } else {
        let head: String = title.chars().take(MAX - 3).collect();
        format!("{}...", head)
    }
}
