//! Sort and filter for the visible prompt list (functional core)
//!
//! Pure transformations from (entries, sort spec, search term) to an
//! ordered view. No mutation, stable sorts, and a couple of label helpers
//! shared by the CLI table and the TUI rank column.

use crate::record::{CachedPrompt, PromptRecord};

/// Sort direction for the date ordering. Votes and score are always
/// highest-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// Active sort order for the prompt list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortSpec {
    Date(Direction),
    Votes,
    Score,
}

impl Default for SortSpec {
    fn default() -> Self {
        SortSpec::Date(Direction::Descending)
    }
}

impl SortSpec {
    /// Cycle order used by the TUI sort key: newest, oldest, votes, score.
    pub fn cycle(self) -> Self {
        match self {
            SortSpec::Date(Direction::Descending) => SortSpec::Date(Direction::Ascending),
            SortSpec::Date(Direction::Ascending) => SortSpec::Votes,
            SortSpec::Votes => SortSpec::Score,
            SortSpec::Score => SortSpec::Date(Direction::Descending),
        }
    }

    /// Column-header label for the rank cell.
    pub fn header_label(&self) -> &'static str {
        match self {
            SortSpec::Date(_) => "Date",
            SortSpec::Votes => "Votes",
            SortSpec::Score => "Score",
        }
    }

    /// Parse CLI/query-string values; `dir` only applies to `date`.
    pub fn parse(kind: &str, dir: Option<&str>) -> Option<Self> {
        match kind {
            "date" => {
                let direction = match dir {
                    Some("asc") => Direction::Ascending,
                    Some("desc") | None => Direction::Descending,
                    Some(_) => return None,
                };
                Some(SortSpec::Date(direction))
            }
            "votes" => Some(SortSpec::Votes),
            "score" => Some(SortSpec::Score),
            _ => None,
        }
    }
}

/// Filter then sort the consolidated entries for display.
///
/// Filtering is a case-insensitive substring match of `search` against the
/// record's title and name; the empty term matches everything. Sorting is
/// stable, so equal keys keep their relative input order. The placeholder
/// row, when present, is always shown and pinned to the top.
pub fn view(entries: &[CachedPrompt], sort: SortSpec, search: &str) -> Vec<CachedPrompt> {
    let mut placeholders: Vec<CachedPrompt> = Vec::new();
    let mut persisted: Vec<CachedPrompt> = Vec::new();

    for entry in entries {
        if entry.slot.is_placeholder() {
            placeholders.push(entry.clone());
        } else if matches_search(&entry.record, search) {
            persisted.push(entry.clone());
        }
    }

    match sort {
        SortSpec::Date(Direction::Ascending) => {
            persisted.sort_by_key(|e| e.record.sort_timestamp());
        }
        SortSpec::Date(Direction::Descending) => {
            persisted.sort_by_key(|e| std::cmp::Reverse(e.record.sort_timestamp()));
        }
        SortSpec::Votes => {
            persisted.sort_by_key(|e| std::cmp::Reverse(e.record.votes()));
        }
        SortSpec::Score => {
            // Scores are floats; total_cmp gives a total order and the
            // stable sort keeps ties in input order.
            persisted.sort_by(|a, b| b.record.score().total_cmp(&a.record.score()));
        }
    }

    placeholders.extend(persisted);
    placeholders
}

/// True when `search` matches the record's title or name.
pub fn matches_search(record: &PromptRecord, search: &str) -> bool {
    let term = search.trim().to_lowercase();
    if term.is_empty() {
        return true;
    }
    let title_hit = record
        .title
        .as_deref()
        .is_some_and(|t| t.to_lowercase().contains(&term));
    let name_hit = record
        .name
        .as_deref()
        .is_some_and(|n| n.to_lowercase().contains(&term));
    title_hit || name_hit
}

/// Rank-cell text for one row under the active sort: a short date, a vote
/// count, or a score, falling back to the positional index.
pub fn rank_cell(record: &PromptRecord, sort: SortSpec, fallback_index: usize) -> String {
    match sort {
        SortSpec::Date(_) => {
            let formatted = format_date_short(record.created_at.as_deref().unwrap_or(""));
            if formatted.is_empty() {
                format!("#{}", fallback_index)
            } else {
                formatted
            }
        }
        SortSpec::Votes => record.votes().to_string(),
        SortSpec::Score => format_score(record.score()),
    }
}

/// Day-month rendering for the date rank cell; empty on unparseable input.
pub fn format_date_short(raw: &str) -> String {
    match chrono::DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => dt.format("%d-%m").to_string(),
        Err(_) => String::new(),
    }
}

/// Render a score without a trailing `.0` for whole numbers.
pub fn format_score(score: f64) -> String {
    if score.fract() == 0.0 {
        (score as i64).to_string()
    } else {
        format!("{:.1}", score)
    }
}
