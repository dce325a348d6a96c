//! Prompt record data model
//!
//! Records live in a schemaless document store, so every field is optional
//! on the wire and unknown fields are carried through merges untouched.
//! The accessors here centralize the fallback rules (score resolution,
//! display title, branch-root identity, sortable timestamp) that the rest
//! of the crate relies on.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Scoring result attached to a prompt after an evaluation run.
///
/// Older pipeline versions wrote flat `rationale_*` fields instead of the
/// nested `rationales` object; both shapes are accepted and the nested one
/// wins when present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub score_total: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub reliability: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub complexity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationales: Option<Rationales>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale_accuracy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale_reliability: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale_complexity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weaknesses: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// Per-dimension explanation text for an evaluation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rationales {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reliability: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complexity: Option<String>,
}

impl EvaluationResult {
    /// Accuracy rationale, preferring the nested object over the flat field.
    pub fn accuracy_rationale(&self) -> Option<&str> {
        self.rationales
            .as_ref()
            .and_then(|r| r.accuracy.as_deref())
            .or_else(|| self.rationale_accuracy.as_deref())
            .filter(|s| !s.trim().is_empty())
    }

    /// Reliability rationale, preferring the nested object over the flat field.
    pub fn reliability_rationale(&self) -> Option<&str> {
        self.rationales
            .as_ref()
            .and_then(|r| r.reliability.as_deref())
            .or_else(|| self.rationale_reliability.as_deref())
            .filter(|s| !s.trim().is_empty())
    }

    /// Complexity rationale, preferring the nested object over the flat field.
    pub fn complexity_rationale(&self) -> Option<&str> {
        self.rationales
            .as_ref()
            .and_then(|r| r.complexity.as_deref())
            .or_else(|| self.rationale_complexity.as_deref())
            .filter(|s| !s.trim().is_empty())
    }

    /// True if any rationale, weakness, or suggestion text is present.
    pub fn has_rationales(&self) -> bool {
        self.accuracy_rationale().is_some()
            || self.reliability_rationale().is_some()
            || self.complexity_rationale().is_some()
            || self.weaknesses.as_deref().is_some_and(|s| !s.trim().is_empty())
            || self.suggestions.as_deref().is_some_and(|s| !s.trim().is_empty())
    }
}

/// A single submitted or generated prompt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptRecord {
    /// Store-assigned document id. Empty only while a payload is in flight.
    #[serde(default)]
    pub id: String,
    /// Lineage identity; a record without one is its own branch root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_root_id: Option<String>,
    /// The record this one improves upon; absent for root submissions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_main: bool,
    /// When true this record is authoritative for its branch regardless of score.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_current_best: Option<bool>,
    #[serde(default, deserialize_with = "lenient_number", skip_serializing_if = "Option::is_none")]
    pub score_total: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_evaluation: Option<EvaluationResult>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub views: i64,
    /// Reaction-kind to count; summed into the single "votes" metric.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub reaction_counts: BTreeMap<String, i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    /// Fields this crate does not interpret, preserved across merges.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PromptRecord {
    /// Parse a record out of raw document fields, falling back to the
    /// document id when the payload does not carry one.
    pub fn from_fields(doc_id: &str, fields: &Value) -> Self {
        let mut record: PromptRecord =
            serde_json::from_value(fields.clone()).unwrap_or_else(|e| {
                log::warn!("unparseable record payload for {}: {}", doc_id, e);
                PromptRecord::default()
            });
        if record.id.is_empty() {
            record.id = doc_id.to_string();
        }
        record
    }

    /// Resolved branch identity: `branch_root_id`, else the record's own id.
    pub fn branch_root(&self) -> &str {
        self.branch_root_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.id)
    }

    /// Display label: title, else name, else "Main" / "(untitled)".
    pub fn display_title(&self) -> &str {
        if let Some(title) = self.title.as_deref().filter(|s| !s.is_empty()) {
            return title;
        }
        if let Some(name) = self.name.as_deref().filter(|s| !s.is_empty()) {
            return name;
        }
        if self.is_main {
            "Main"
        } else {
            "(untitled)"
        }
    }

    /// Numeric score: nested evaluation total first, flat field second,
    /// 0 when absent or non-finite.
    pub fn score(&self) -> f64 {
        let raw = self
            .latest_evaluation
            .as_ref()
            .and_then(|e| e.score_total)
            .or(self.score_total)
            .unwrap_or(0.0);
        if raw.is_finite() {
            raw
        } else {
            0.0
        }
    }

    /// Sum of all reaction counters.
    pub fn votes(&self) -> i64 {
        self.reaction_counts.values().sum()
    }

    /// Millisecond timestamp for chronological sorting.
    ///
    /// Resolution order is `created_at`, `updated_at`, then the latest
    /// evaluation's timestamp; anything missing or unparseable sorts as
    /// epoch 0.
    pub fn sort_timestamp(&self) -> i64 {
        self.created_at
            .as_deref()
            .or_else(|| self.updated_at.as_deref())
            .or_else(|| {
                self.latest_evaluation
                    .as_ref()
                    .and_then(|e| e.created_at.as_deref())
            })
            .map(parse_timestamp_millis)
            .unwrap_or(0)
    }

    /// Shallow-merge raw document fields into this record.
    ///
    /// Keys present in `patch` overwrite; keys absent from `patch` are
    /// preserved, including fields this crate does not interpret. A patch
    /// that is not a JSON object is ignored.
    pub fn merge_fields(&mut self, patch: &Value) {
        let Some(patch_obj) = patch.as_object() else {
            log::warn!("ignoring non-object record patch for {}", self.id);
            return;
        };
        let mut base = match serde_json::to_value(&*self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        for (key, value) in patch_obj {
            base.insert(key.clone(), value.clone());
        }
        let id = self.id.clone();
        match serde_json::from_value(Value::Object(base)) {
            Ok(merged) => *self = merged,
            Err(e) => log::warn!("record merge produced unparseable payload for {}: {}", id, e),
        }
        if self.id.is_empty() {
            self.id = id;
        }
    }
}

/// Slot identity for a cached prompt: either the single optimistic
/// placeholder the user is composing, or a store-persisted document.
///
/// The wire format still signals placeholder completion with
/// `parent_id == "blank"`; inside the cache the identity is this tagged
/// type, so promotion is an explicit operation rather than a string
/// comparison.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SlotId {
    Placeholder,
    Persisted(String),
}

impl SlotId {
    /// The sentinel id used on the wire for not-yet-persisted records.
    pub const PLACEHOLDER_PARENT: &'static str = "blank";

    pub fn is_placeholder(&self) -> bool {
        matches!(self, SlotId::Placeholder)
    }

    /// Persisted id, if any.
    pub fn persisted_id(&self) -> Option<&str> {
        match self {
            SlotId::Placeholder => None,
            SlotId::Persisted(id) => Some(id),
        }
    }
}

/// A cache entry: slot identity plus the record it currently holds.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedPrompt {
    pub slot: SlotId,
    pub record: PromptRecord,
}

impl CachedPrompt {
    pub fn persisted(record: PromptRecord) -> Self {
        Self {
            slot: SlotId::Persisted(record.id.clone()),
            record,
        }
    }

    pub fn placeholder(record: PromptRecord) -> Self {
        Self {
            slot: SlotId::Placeholder,
            record,
        }
    }
}

/// Parse an RFC-3339 timestamp into epoch milliseconds; 0 on failure.
pub fn parse_timestamp_millis(raw: &str) -> i64 {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.timestamp_millis())
        .unwrap_or(0)
}

fn is_zero(n: &i64) -> bool {
    *n == 0
}

/// Accept numbers, numeric strings, or garbage; garbage becomes `None`.
fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record_from(fields: Value) -> PromptRecord {
        PromptRecord::from_fields("doc-1", &fields)
    }

    #[test]
    fn test_from_fields_uses_doc_id_when_absent() {
        let record = record_from(json!({"title": "Hello"}));
        assert_eq!(record.id, "doc-1");
        assert_eq!(record.display_title(), "Hello");
    }

    #[test]
    fn test_payload_id_wins_over_doc_id() {
        let record = record_from(json!({"id": "explicit"}));
        assert_eq!(record.id, "explicit");
    }

    #[test]
    fn test_branch_root_falls_back_to_id() {
        let record = record_from(json!({}));
        assert_eq!(record.branch_root(), "doc-1");

        let record = record_from(json!({"branch_root_id": "r1"}));
        assert_eq!(record.branch_root(), "r1");
    }

    #[test]
    fn test_display_title_fallbacks() {
        assert_eq!(record_from(json!({})).display_title(), "(untitled)");
        assert_eq!(record_from(json!({"is_main": true})).display_title(), "Main");
        assert_eq!(record_from(json!({"name": "By name"})).display_title(), "By name");
        assert_eq!(
            record_from(json!({"name": "n", "title": "Title wins"})).display_title(),
            "Title wins"
        );
    }

    #[test]
    fn test_score_prefers_nested_evaluation() {
        let record = record_from(json!({
            "score_total": 3,
            "latest_evaluation": {"score_total": 7}
        }));
        assert_eq!(record.score(), 7.0);

        let record = record_from(json!({"score_total": 3}));
        assert_eq!(record.score(), 3.0);

        assert_eq!(record_from(json!({})).score(), 0.0);
    }

    #[test]
    fn test_score_coerces_garbage_to_zero() {
        let record = record_from(json!({"score_total": "not a number"}));
        assert_eq!(record.score(), 0.0);

        let record = record_from(json!({"score_total": "4.5"}));
        assert_eq!(record.score(), 4.5);
    }

    #[test]
    fn test_votes_sums_reaction_counts() {
        let record = record_from(json!({"reaction_counts": {"fire": 2, "rocket": 3}}));
        assert_eq!(record.votes(), 5);
        assert_eq!(record_from(json!({})).votes(), 0);
    }

    #[test]
    fn test_sort_timestamp_resolution_order() {
        let record = record_from(json!({
            "created_at": "2024-06-01T00:00:00Z",
            "updated_at": "2024-07-01T00:00:00Z"
        }));
        let created = parse_timestamp_millis("2024-06-01T00:00:00Z");
        assert_eq!(record.sort_timestamp(), created);

        let record = record_from(json!({"updated_at": "2024-07-01T00:00:00Z"}));
        assert!(record.sort_timestamp() > 0);

        let record = record_from(json!({
            "latest_evaluation": {"created_at": "2024-05-01T00:00:00Z"}
        }));
        assert!(record.sort_timestamp() > 0);

        assert_eq!(record_from(json!({})).sort_timestamp(), 0);
        assert_eq!(record_from(json!({"created_at": "garbage"})).sort_timestamp(), 0);
    }

    #[test]
    fn test_merge_overwrites_present_and_preserves_absent() {
        let mut record = record_from(json!({
            "title": "Old",
            "views": 5,
            "custom_field": "kept"
        }));
        record.merge_fields(&json!({"title": "New", "score_total": 9}));

        assert_eq!(record.display_title(), "New");
        assert_eq!(record.views, 5);
        assert_eq!(record.score(), 9.0);
        assert_eq!(record.extra.get("custom_field"), Some(&json!("kept")));
    }

    #[test]
    fn test_merge_ignores_non_object_patch() {
        let mut record = record_from(json!({"title": "Old"}));
        record.merge_fields(&json!("scalar"));
        assert_eq!(record.display_title(), "Old");
    }

    #[test]
    fn test_rationale_fallback_to_flat_fields() {
        let eval: EvaluationResult = serde_json::from_value(json!({
            "rationale_accuracy": "flat accuracy",
            "rationales": {"reliability": "nested reliability"}
        }))
        .unwrap();

        assert_eq!(eval.accuracy_rationale(), Some("flat accuracy"));
        assert_eq!(eval.reliability_rationale(), Some("nested reliability"));
        assert_eq!(eval.complexity_rationale(), None);
        assert!(eval.has_rationales());
        assert!(!EvaluationResult::default().has_rationales());
    }
}
