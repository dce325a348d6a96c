//! Current-best-per-branch consolidation (functional core)
//!
//! Everything here is a pure function: immutable inputs, new values out,
//! no I/O. The selection rule used to be duplicated across UI paths with
//! drifting fallbacks; this module is the single authority.
//!
//! Selection rule per branch group:
//! 1. The first record (in input order) flagged `is_current_best` wins.
//! 2. Otherwise the highest resolved score wins; ties keep the first
//!    encountered member, so the result is stable for a fixed input order.
//!
//! Placeholder entries are never grouped: they are preserved verbatim and
//! prepended to the result.

use std::collections::HashMap;

use crate::record::CachedPrompt;

/// Reduce a flat cache to one visible record per branch root.
///
/// Output order is placeholders first, then branch representatives in the
/// order their branch was first encountered. Deterministic for a fixed
/// input order; the presentation layer re-sorts anyway.
pub fn consolidate(entries: &[CachedPrompt]) -> Vec<CachedPrompt> {
    let mut placeholders: Vec<&CachedPrompt> = Vec::new();
    let mut group_order: Vec<&str> = Vec::new();
    let mut groups: HashMap<&str, Vec<&CachedPrompt>> = HashMap::new();

    for entry in entries {
        if entry.slot.is_placeholder() {
            placeholders.push(entry);
            continue;
        }
        let root = entry.record.branch_root();
        let group = groups.entry(root).or_insert_with(|| {
            group_order.push(root);
            Vec::new()
        });
        group.push(entry);
    }

    let mut result: Vec<CachedPrompt> = placeholders.into_iter().cloned().collect();
    for root in group_order {
        if let Some(chosen) = pick_representative(&groups[root]) {
            result.push(chosen.clone());
        }
    }
    result
}

/// Select the representative for one branch group.
///
/// Returns `None` only for an empty group.
fn pick_representative<'a>(group: &[&'a CachedPrompt]) -> Option<&'a CachedPrompt> {
    if let Some(flagged) = group
        .iter()
        .copied()
        .find(|entry| entry.record.is_current_best == Some(true))
    {
        return Some(flagged);
    }

    let mut best: Option<&CachedPrompt> = None;
    let mut best_score = f64::NEG_INFINITY;
    for entry in group.iter().copied() {
        let score = entry.record.score();
        // Strict comparison keeps the first encountered member on ties.
        if score > best_score {
            best = Some(entry);
            best_score = score;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{CachedPrompt, PromptRecord};

    fn persisted(id: &str, root: Option<&str>, score: f64, best: Option<bool>) -> CachedPrompt {
        CachedPrompt::persisted(PromptRecord {
            id: id.to_string(),
            branch_root_id: root.map(str::to_string),
            score_total: Some(score),
            is_current_best: best,
            ..PromptRecord::default()
        })
    }

    fn placeholder() -> CachedPrompt {
        CachedPrompt::placeholder(PromptRecord {
            title: Some("New prompt".to_string()),
            ..PromptRecord::default()
        })
    }

    fn ids(entries: &[CachedPrompt]) -> Vec<&str> {
        entries.iter().map(|e| e.record.id.as_str()).collect()
    }

    #[test]
    fn test_one_representative_per_branch() {
        let entries = vec![
            persisted("a", Some("r1"), 3.0, None),
            persisted("b", Some("r1"), 7.0, None),
            persisted("c", Some("r2"), 1.0, None),
        ];

        let out = consolidate(&entries);
        assert_eq!(ids(&out), vec!["b", "c"]);
    }

    #[test]
    fn test_explicit_best_beats_higher_score() {
        let entries = vec![
            persisted("low-flagged", Some("r1"), 2.0, Some(true)),
            persisted("high", Some("r1"), 9.0, None),
        ];

        let out = consolidate(&entries);
        assert_eq!(ids(&out), vec!["low-flagged"]);
    }

    #[test]
    fn test_first_flagged_wins_among_several() {
        let entries = vec![
            persisted("first", Some("r1"), 1.0, Some(true)),
            persisted("second", Some("r1"), 5.0, Some(true)),
        ];

        let out = consolidate(&entries);
        assert_eq!(ids(&out), vec!["first"]);
    }

    #[test]
    fn test_score_ties_keep_input_order() {
        let entries = vec![
            persisted("a", Some("r1"), 4.0, None),
            persisted("b", Some("r1"), 4.0, None),
        ];

        let out = consolidate(&entries);
        assert_eq!(ids(&out), vec!["a"]);
    }

    #[test]
    fn test_missing_root_means_own_branch() {
        let entries = vec![
            persisted("a", None, 1.0, None),
            persisted("b", None, 9.0, None),
        ];

        let out = consolidate(&entries);
        assert_eq!(ids(&out), vec!["a", "b"]);
    }

    #[test]
    fn test_placeholder_is_preserved_and_prepended() {
        let entries = vec![
            persisted("a", Some("r1"), 3.0, None),
            placeholder(),
            persisted("b", Some("r1"), 7.0, None),
        ];

        let out = consolidate(&entries);
        assert_eq!(out.len(), 2);
        assert!(out[0].slot.is_placeholder());
        assert_eq!(out[1].record.id, "b");
    }

    #[test]
    fn test_input_is_not_mutated_and_idempotent() {
        let entries = vec![
            persisted("a", Some("r1"), 3.0, None),
            persisted("b", Some("r1"), 7.0, None),
            placeholder(),
        ];
        let snapshot = entries.clone();

        let once = consolidate(&entries);
        assert_eq!(entries, snapshot);

        let twice = consolidate(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_empty_input() {
        assert!(consolidate(&[]).is_empty());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;
        use std::collections::HashSet;

        fn arb_entry() -> impl Strategy<Value = CachedPrompt> {
            (
                0usize..12,
                proptest::option::of(0usize..4),
                0u32..10,
                proptest::option::of(any::<bool>()),
            )
                .prop_map(|(id, root, score, best)| {
                    persisted(
                        &format!("p{}", id),
                        root.map(|r| format!("r{}", r)).as_deref(),
                        f64::from(score),
                        best,
                    )
                })
        }

        proptest! {
            #[test]
            fn consolidate_is_idempotent(entries in proptest::collection::vec(arb_entry(), 0..24)) {
                let once = consolidate(&entries);
                let twice = consolidate(&once);
                prop_assert_eq!(once, twice);
            }

            #[test]
            fn at_most_one_per_branch(entries in proptest::collection::vec(arb_entry(), 0..24)) {
                let out = consolidate(&entries);
                let mut seen = HashSet::new();
                for entry in &out {
                    prop_assert!(seen.insert(entry.record.branch_root().to_string()));
                }
            }

            #[test]
            fn representatives_come_from_their_group(entries in proptest::collection::vec(arb_entry(), 0..24)) {
                let out = consolidate(&entries);
                for entry in &out {
                    prop_assert!(entries.contains(entry));
                }
            }
        }
    }
}
