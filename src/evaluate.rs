//! Evaluation request flow
//!
//! Submitting a prompt for scoring means writing a request document to the
//! evaluation queue collection and watching that document's `status` walk
//! `pending -> processing -> done | error`. The pipeline that does the
//! actual scoring is an external collaborator; it writes the transitions
//! and, on `done`, the result payload.
//!
//! Failures reported through `status == "error"` are classified by
//! scanning the error text for known markers, so the UI can tell a
//! blocked/low-quality submission apart from an infrastructure failure.

use std::sync::mpsc::Receiver;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::auth::User;
use crate::record::EvaluationResult;
use crate::store::{ChangeKind, RecordStore, StoreError, StoreEvent, Subscription};

lazy_static! {
    /// Markers the pipeline embeds in error text for content it refused to
    /// evaluate.
    static ref BLOCKED_MARKERS: Regex =
        Regex::new(r"(?i)unrelated|validation|blocked|low-quality|nonsensical").expect("marker regex");
    /// Markers that point at a rejected improvement rather than a rejected
    /// new prompt.
    static ref IMPROVEMENT_MARKERS: Regex = Regex::new(r"(?i)unrelated|parent").expect("marker regex");
}

/// Error type for evaluation submission.
#[derive(Debug)]
pub enum EvaluateError {
    /// Required fields were empty; nothing was written to the store.
    MissingFields(Vec<&'static str>),
    Store(StoreError),
}

impl std::fmt::Display for EvaluateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvaluateError::MissingFields(fields) => {
                write!(f, "Missing required fields: {}", fields.join(", "))
            }
            EvaluateError::Store(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for EvaluateError {}

impl From<StoreError> for EvaluateError {
    fn from(e: StoreError) -> Self {
        EvaluateError::Store(e)
    }
}

pub type Result<T> = std::result::Result<T, EvaluateError>;

/// User identity attached to a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfo {
    pub uid: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl From<&User> for UserInfo {
    fn from(user: &User) -> Self {
        Self {
            uid: user.uid.clone(),
            username: user.display_name().to_string(),
            email: user.email.clone(),
        }
    }
}

/// A submission destined for the evaluation queue.
#[derive(Debug, Clone, Default)]
pub struct EvaluationRequest {
    pub prompt: String,
    pub selected_model: String,
    /// Slot the request was raised from; `"blank"` for a draft.
    pub prompt_id: String,
    /// The branch member being improved; equals `prompt_id` for drafts.
    pub source_prompt_id: String,
    pub branch_name: String,
    pub new_files: Vec<Value>,
    pub exclude_file_ids: Vec<String>,
    pub user: Option<UserInfo>,
}

impl EvaluationRequest {
    /// Every field the pipeline refuses to work without.
    fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.prompt.trim().is_empty() {
            missing.push("prompt");
        }
        if self.selected_model.trim().is_empty() {
            missing.push("selected_model");
        }
        if self.prompt_id.trim().is_empty() {
            missing.push("prompt_id");
        }
        if self.source_prompt_id.trim().is_empty() {
            missing.push("source_prompt_id");
        }
        if self.branch_name.trim().is_empty() {
            missing.push("branch_name");
        }
        missing
    }

    fn to_fields(&self) -> Value {
        json!({
            "prompt": self.prompt,
            "status": "pending",
            "created_at": chrono::Utc::now().to_rfc3339(),
            "selected_model": self.selected_model,
            "prompt_id": self.prompt_id,
            "source_prompt_id": self.source_prompt_id,
            "new_files": self.new_files,
            "exclude_file_ids": self.exclude_file_ids,
            "branch_name": self.branch_name,
            "user": self.user.as_ref().map(|u| serde_json::to_value(u).unwrap_or(Value::Null)),
        })
    }
}

/// Validate and enqueue a request; returns the request document id.
///
/// Validation failures abort before anything is written.
pub fn create_request(
    store: &dyn RecordStore,
    collection: &str,
    request: &EvaluationRequest,
) -> Result<String> {
    let missing = request.missing_fields();
    if !missing.is_empty() {
        return Err(EvaluateError::MissingFields(missing));
    }
    Ok(store.add(collection, request.to_fields())?)
}

/// How a watched request failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvaluationFailure {
    /// The pipeline refused the content itself.
    Blocked { improvement: bool, reason: String },
    /// Anything else: infrastructure, model errors, timeouts.
    Other(String),
}

impl EvaluationFailure {
    /// One-line user-facing message.
    pub fn message(&self) -> String {
        match self {
            EvaluationFailure::Blocked { improvement, reason } => {
                let kind = if *improvement { "improvement" } else { "prompt" };
                format!("Your {} was not evaluated because {}.", kind, reason)
            }
            EvaluationFailure::Other(msg) => msg.clone(),
        }
    }
}

/// Classify pipeline error text into blocked-content vs generic failure.
pub fn classify_failure(message: &str) -> EvaluationFailure {
    if BLOCKED_MARKERS.is_match(message) {
        EvaluationFailure::Blocked {
            improvement: IMPROVEMENT_MARKERS.is_match(message),
            reason: "it seems to contain low-quality content".to_string(),
        }
    } else {
        EvaluationFailure::Other(message.to_string())
    }
}

/// Status transition observed on a watched request.
#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationUpdate {
    Processing,
    Done {
        result: EvaluationResult,
        /// Id of the prompt the result belongs to; on an improvement this
        /// is the newly created branch member.
        prompt_id: Option<String>,
        source_prompt_id: Option<String>,
        is_improvement: bool,
    },
    Failed(EvaluationFailure),
    /// The subscription stream reported a comm error; the watch stays up.
    StreamError(String),
}

/// Point-watch over a single request document.
///
/// Holds the collection subscription and filters it down to the one id,
/// de-duplicating repeated deliveries of the same status.
pub struct RequestWatch {
    _subscription: Subscription,
    receiver: Receiver<StoreEvent>,
    request_id: String,
    last_status: String,
}

impl RequestWatch {
    pub fn new(store: &dyn RecordStore, collection: &str, request_id: &str) -> Self {
        let (subscription, receiver) = store.subscribe(collection);
        Self {
            _subscription: subscription,
            receiver,
            request_id: request_id.to_string(),
            last_status: "pending".to_string(),
        }
    }

    /// Drain pending store events into status transitions. Non-blocking.
    pub fn poll(&mut self) -> Vec<EvaluationUpdate> {
        let mut updates = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            match event {
                StoreEvent::Changes(events) => {
                    for change in events {
                        if change.id != self.request_id || change.kind == ChangeKind::Removed {
                            continue;
                        }
                        if let Some(update) = self.transition(change.data.as_ref()) {
                            updates.push(update);
                        }
                    }
                }
                StoreEvent::Error(message) => {
                    updates.push(EvaluationUpdate::StreamError(message));
                }
            }
        }
        updates
    }

    fn transition(&mut self, data: Option<&Value>) -> Option<EvaluationUpdate> {
        let data = data?;
        let status = data.get("status").and_then(|v| v.as_str()).unwrap_or("unknown");
        if status == self.last_status {
            return None;
        }
        self.last_status = status.to_string();

        match status {
            "processing" => Some(EvaluationUpdate::Processing),
            "done" => {
                let result = data
                    .get("result")
                    .and_then(|r| serde_json::from_value(r.clone()).ok())
                    .unwrap_or_default();
                let prompt_id = string_field(data, "prompt_id");
                let source_prompt_id = string_field(data, "source_prompt_id");
                let is_improvement = match (&prompt_id, &source_prompt_id) {
                    (Some(p), Some(s)) => p != s,
                    _ => false,
                };
                Some(EvaluationUpdate::Done {
                    result,
                    prompt_id,
                    source_prompt_id,
                    is_improvement,
                })
            }
            "error" => {
                let message = data
                    .get("error")
                    .and_then(|v| v.as_str())
                    .unwrap_or("(unknown error)");
                Some(EvaluationUpdate::Failed(classify_failure(message)))
            }
            _ => None,
        }
    }
}

fn string_field(data: &Value, key: &str) -> Option<String> {
    data.get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn request() -> EvaluationRequest {
        EvaluationRequest {
            prompt: "Write a haiku about borrow checking".to_string(),
            selected_model: "Auto".to_string(),
            prompt_id: "blank".to_string(),
            source_prompt_id: "blank".to_string(),
            branch_name: "Haiku".to_string(),
            ..EvaluationRequest::default()
        }
    }

    #[test]
    fn test_create_request_writes_pending_document() {
        let store = MemoryStore::new();
        let id = create_request(&store, "evaluation_requests", &request()).unwrap();

        let doc = store.fetch_by_id("evaluation_requests", &id).unwrap();
        assert_eq!(doc.fields["status"], "pending");
        assert_eq!(doc.fields["branch_name"], "Haiku");
        assert!(doc.fields["created_at"].as_str().is_some());
    }

    #[test]
    fn test_validation_reports_all_missing_fields_before_write() {
        let store = MemoryStore::new();
        let bad = EvaluationRequest {
            prompt: "  ".to_string(),
            ..request()
        };
        let err = create_request(&store, "evaluation_requests", &bad).unwrap_err();
        match err {
            EvaluateError::MissingFields(fields) => assert_eq!(fields, vec!["prompt"]),
            other => panic!("unexpected error: {}", other),
        }
        assert!(store.fetch_all("evaluation_requests").is_empty());

        let err = create_request(
            &store,
            "evaluation_requests",
            &EvaluationRequest::default(),
        )
        .unwrap_err();
        match err {
            EvaluateError::MissingFields(fields) => assert_eq!(fields.len(), 5),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_watch_follows_status_transitions() {
        let store = MemoryStore::new();
        let id = create_request(&store, "evaluation_requests", &request()).unwrap();
        let mut watch = RequestWatch::new(&store, "evaluation_requests", &id);

        store
            .update("evaluation_requests", &id, json!({"status": "processing"}))
            .unwrap();
        assert_eq!(watch.poll(), vec![EvaluationUpdate::Processing]);

        store
            .update(
                "evaluation_requests",
                &id,
                json!({"status": "done", "result": {"score_total": 8}}),
            )
            .unwrap();
        let updates = watch.poll();
        assert_eq!(updates.len(), 1);
        match &updates[0] {
            EvaluationUpdate::Done {
                result,
                is_improvement,
                ..
            } => {
                assert_eq!(result.score_total, Some(8.0));
                assert!(!is_improvement);
            }
            other => panic!("unexpected update: {:?}", other),
        }
    }

    #[test]
    fn test_watch_ignores_other_requests_and_repeats() {
        let store = MemoryStore::new();
        let id = create_request(&store, "evaluation_requests", &request()).unwrap();
        let other = create_request(&store, "evaluation_requests", &request()).unwrap();
        let mut watch = RequestWatch::new(&store, "evaluation_requests", &id);

        store
            .update("evaluation_requests", &other, json!({"status": "processing"}))
            .unwrap();
        assert!(watch.poll().is_empty());

        store
            .update("evaluation_requests", &id, json!({"status": "processing"}))
            .unwrap();
        store
            .update("evaluation_requests", &id, json!({"status": "processing"}))
            .unwrap();
        assert_eq!(watch.poll(), vec![EvaluationUpdate::Processing]);
    }

    #[test]
    fn test_improvement_detection() {
        let store = MemoryStore::new();
        let mut req = request();
        req.prompt_id = "existing".to_string();
        req.source_prompt_id = "existing".to_string();
        let id = create_request(&store, "evaluation_requests", &req).unwrap();
        let mut watch = RequestWatch::new(&store, "evaluation_requests", &id);

        // The pipeline created a new branch member and rewrote prompt_id.
        store
            .update(
                "evaluation_requests",
                &id,
                json!({"status": "done", "result": {}, "prompt_id": "improved"}),
            )
            .unwrap();

        let updates = watch.poll();
        match &updates[0] {
            EvaluationUpdate::Done {
                prompt_id,
                source_prompt_id,
                is_improvement,
                ..
            } => {
                assert_eq!(prompt_id.as_deref(), Some("improved"));
                assert_eq!(source_prompt_id.as_deref(), Some("existing"));
                assert!(is_improvement);
            }
            other => panic!("unexpected update: {:?}", other),
        }
    }

    #[test]
    fn test_stream_errors_surface_without_closing_watch() {
        let store = MemoryStore::new();
        let id = create_request(&store, "evaluation_requests", &request()).unwrap();
        let mut watch = RequestWatch::new(&store, "evaluation_requests", &id);

        store.emit_error("evaluation_requests", "connection reset");
        assert_eq!(
            watch.poll(),
            vec![EvaluationUpdate::StreamError("connection reset".to_string())]
        );

        store
            .update("evaluation_requests", &id, json!({"status": "processing"}))
            .unwrap();
        assert_eq!(watch.poll(), vec![EvaluationUpdate::Processing]);
    }

    #[test]
    fn test_classify_failure_markers() {
        assert!(matches!(
            classify_failure("prompt appears to be nonsensical"),
            EvaluationFailure::Blocked { improvement: false, .. }
        ));
        assert!(matches!(
            classify_failure("improvement is unrelated to its parent"),
            EvaluationFailure::Blocked { improvement: true, .. }
        ));
        assert!(matches!(
            classify_failure("model endpoint timed out"),
            EvaluationFailure::Other(_)
        ));
    }
}
