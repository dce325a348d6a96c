//! HTTP relay for the prompt garage
//!
//! `garage serve` → landing page with the live submission counter, a
//! read-only prompts API, and the document-creation endpoint that glues
//! the docs provider, the record store mirror, and the chat webhook
//! together.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tiny_http::{Header, Method, Request, Response, Server};

use crate::consolidate::consolidate;
use crate::docs::{DocProvider, Notifier};
use crate::record::CachedPrompt;
use crate::session::{CollectionStats, GarageContext};
use crate::view::{self, SortSpec};

#[derive(Serialize)]
struct ApiResponse<T> {
    ok: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    fn failure(message: String) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message),
        }
    }
}

// Embedded landing page with the live submission counter
const LANDING_HTML: &str = include_str!("landing.html");

/// Everything the request handlers need.
pub struct RelayState {
    pub ctx: GarageContext,
    pub provider: DocProvider,
    pub notifier: Notifier,
}

impl RelayState {
    pub fn new(ctx: GarageContext) -> Self {
        let provider = DocProvider::new(ctx.config.relay.doc_provider_url.clone());
        let notifier = Notifier::new(ctx.config.relay.webhook_url.clone());
        Self {
            ctx,
            provider,
            notifier,
        }
    }
}

/// A bound relay that has not started serving yet. Split from [`run`]
/// so tests can bind port 0 and learn the real address first.
pub struct Relay {
    server: Server,
    state: Arc<RelayState>,
}

impl Relay {
    pub fn bind(state: RelayState, addr: &str) -> std::io::Result<Self> {
        let server = Server::http(addr)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        Ok(Self {
            server,
            state: Arc::new(state),
        })
    }

    /// The bound socket address; `None` for non-IP listeners.
    pub fn addr(&self) -> Option<std::net::SocketAddr> {
        self.server.server_addr().to_ip()
    }

    /// Serve forever.
    pub fn run(self) {
        for request in self.server.incoming_requests() {
            if let Err(e) = handle_request(&self.state, request) {
                log::warn!("request handling failed: {}", e);
            }
        }
    }
}

/// Start the relay on the configured port and serve forever.
pub fn start_relay(state: RelayState, port: u16) -> std::io::Result<()> {
    let relay = Relay::bind(state, &format!("0.0.0.0:{}", port))?;

    eprintln!("\n\x1b[1;32m🔧 Garage\x1b[0m");
    eprintln!("   Landing page: http://localhost:{}", port);
    eprintln!("   Press Ctrl+C to stop\n");

    relay.run();
    Ok(())
}

fn handle_request(state: &RelayState, request: Request) -> std::io::Result<()> {
    let url = request.url().to_string();
    let (path, query) = match url.split_once('?') {
        Some((p, q)) => (p, q),
        None => (url.as_str(), ""),
    };
    let method = request.method().clone();

    match (&method, path) {
        // Landing page with the submission counter
        (&Method::Get, "/") => {
            let response = Response::from_string(LANDING_HTML)
                .with_header(Header::from_bytes(&b"Content-Type"[..], &b"text/html"[..]).unwrap());
            request.respond(response)
        }

        // API: submission counter
        (&Method::Get, "/api/stats") => {
            let stats = collection_stats(state);
            respond_json(request, 200, &ApiResponse::success(stats))
        }

        // API: consolidated prompt list
        (&Method::Get, "/api/prompts") => handle_prompts(state, request, query),

        // Document creation: provider call, store mirror, webhook
        (&Method::Post, "/create_doc") => handle_create_doc(state, request),

        // 404
        _ => {
            let response = Response::from_string("Not found").with_status_code(404);
            request.respond(response)
        }
    }
}

fn respond_json<T: Serialize>(
    request: Request,
    status: u16,
    body: &T,
) -> std::io::Result<()> {
    let json = serde_json::to_string(body)?;
    let response = Response::from_string(json)
        .with_status_code(status)
        .with_header(
            Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]).unwrap(),
        );
    request.respond(response)
}

// ============================================================================
// GET /api/stats and /api/prompts
// ============================================================================

fn collection_stats(state: &RelayState) -> CollectionStats {
    let (collection, entries) = load_consolidated(state);
    let total = entries.len();
    let scored = entries.iter().filter(|e| e.record.score() > 0.0).count();
    let average_score = if total > 0 {
        let sum: f64 = entries.iter().map(|e| e.record.score()).sum();
        (sum / total as f64 * 100.0).round() / 100.0
    } else {
        0.0
    };
    CollectionStats {
        total,
        scored,
        average_score,
        collection,
    }
}

fn load_consolidated(state: &RelayState) -> (String, Vec<CachedPrompt>) {
    let collections = &state.ctx.config.collections;
    let mut collection = collections.primary.clone();
    let mut records = state.ctx.store.fetch_all_records(&collection);
    if records.is_empty() {
        collection = collections.fallback.clone();
        records = state.ctx.store.fetch_all_records(&collection);
    }
    let entries: Vec<CachedPrompt> = records.into_iter().map(CachedPrompt::persisted).collect();
    (collection, consolidate(&entries))
}

#[derive(Deserialize, Default)]
struct PromptsQuery {
    #[serde(default)]
    sort: Option<String>,
    #[serde(default)]
    dir: Option<String>,
    #[serde(default)]
    q: Option<String>,
}

#[derive(Serialize)]
struct PromptRow {
    id: String,
    title: String,
    score: f64,
    votes: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<String>,
}

fn handle_prompts(state: &RelayState, request: Request, query: &str) -> std::io::Result<()> {
    let params: PromptsQuery = serde_urlencoded::from_str(query).unwrap_or_default();
    let sort = match params.sort.as_deref() {
        None => SortSpec::default(),
        Some(kind) => match SortSpec::parse(kind, params.dir.as_deref()) {
            Some(sort) => sort,
            None => {
                return respond_json(
                    request,
                    400,
                    &ApiResponse::<()>::failure(format!("Unknown sort: {}", kind)),
                );
            }
        },
    };

    let (_, entries) = load_consolidated(state);
    let rows: Vec<PromptRow> = view::view(&entries, sort, params.q.as_deref().unwrap_or(""))
        .into_iter()
        .map(|entry| PromptRow {
            id: entry.record.id.clone(),
            title: entry.record.display_title().to_string(),
            score: entry.record.score(),
            votes: entry.record.votes(),
            created_at: entry.record.created_at.clone(),
            username: entry.record.username.clone(),
        })
        .collect();

    respond_json(request, 200, &ApiResponse::success(rows))
}

// ============================================================================
// POST /create_doc
// ============================================================================

#[derive(Deserialize)]
struct CreateDocRequest {
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
}

#[derive(Serialize)]
struct CreateDocResponse {
    success: bool,
    #[serde(rename = "docId", skip_serializing_if = "Option::is_none")]
    doc_id: Option<String>,
    #[serde(rename = "editUrl", skip_serializing_if = "Option::is_none")]
    edit_url: Option<String>,
    #[serde(rename = "viewUrl", skip_serializing_if = "Option::is_none")]
    view_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl CreateDocResponse {
    fn failure(message: String) -> Self {
        Self {
            success: false,
            doc_id: None,
            edit_url: None,
            view_url: None,
            error: Some(message),
        }
    }
}

fn handle_create_doc(state: &RelayState, mut request: Request) -> std::io::Result<()> {
    let mut body = String::new();
    if let Err(e) = request.as_reader().read_to_string(&mut body) {
        return respond_json(
            request,
            400,
            &CreateDocResponse::failure(format!("Failed to read body: {}", e)),
        );
    }

    let parsed: CreateDocRequest = match serde_json::from_str(&body) {
        Ok(r) => r,
        Err(e) => {
            return respond_json(
                request,
                400,
                &CreateDocResponse::failure(format!("Invalid JSON: {}", e)),
            );
        }
    };

    if parsed.title.trim().is_empty() || parsed.content.trim().is_empty() {
        return respond_json(
            request,
            400,
            &CreateDocResponse::failure("title and content are required".to_string()),
        );
    }

    let created = match state.provider.create_document(&parsed.title, &parsed.content) {
        Ok(doc) => doc,
        Err(e) => {
            return respond_json(request, 502, &CreateDocResponse::failure(e.to_string()));
        }
    };

    // Mirror metadata into the store. A mirror failure is logged but does
    // not undo the already-created document.
    let mirror = serde_json::json!({
        "title": parsed.title,
        "content": parsed.content,
        "doc_id": created.doc_id,
        "edit_url": created.edit_url,
        "view_url": created.view_url,
        "created_at": chrono::Utc::now().to_rfc3339(),
        "views": 0,
    });
    let documents = &state.ctx.config.collections.documents;
    if let Err(e) = state.ctx.store.add(documents, mirror) {
        log::warn!("failed to mirror document {}: {}", created.doc_id, e);
    }

    // Fire-and-forget; Notifier swallows failures.
    state.notifier.notify(&format!(
        "New document created: {}\nEdit URL: {}",
        parsed.title, created.edit_url
    ));

    respond_json(
        request,
        200,
        &CreateDocResponse {
            success: true,
            doc_id: Some(created.doc_id),
            edit_url: Some(created.edit_url),
            view_url: Some(created.view_url),
            error: None,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    // === ApiResponse Tests ===

    #[test]
    fn test_api_response_success() {
        let response: ApiResponse<String> = ApiResponse::success("hello".to_string());
        assert!(response.ok);
        assert_eq!(response.data, Some("hello".to_string()));
        assert!(response.error.is_none());
    }

    #[test]
    fn test_api_response_serializes_to_json() {
        let response: ApiResponse<String> = ApiResponse::success("test".to_string());
        let json = serde_json::to_string(&response).unwrap();

        assert!(json.contains("\"ok\":true"));
        assert!(json.contains("\"data\":\"test\""));
        assert!(json.contains("\"error\":null"));
    }

    #[test]
    fn test_api_response_failure() {
        let response = ApiResponse::<()>::failure("boom".to_string());
        assert!(!response.ok);
        assert_eq!(response.error.as_deref(), Some("boom"));
    }

    // === Wire format tests ===

    #[test]
    fn test_create_doc_response_failure_shape() {
        let response = CreateDocResponse::failure("provider down".to_string());
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"success\":false"));
        assert!(json.contains("\"error\":\"provider down\""));
        assert!(!json.contains("docId"));
    }

    #[test]
    fn test_create_doc_response_success_uses_wire_names() {
        let response = CreateDocResponse {
            success: true,
            doc_id: Some("d1".to_string()),
            edit_url: Some("http://e".to_string()),
            view_url: Some("http://v".to_string()),
            error: None,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"docId\":\"d1\""));
        assert!(json.contains("\"editUrl\""));
        assert!(json.contains("\"viewUrl\""));
        assert!(!json.contains("error"));
    }

    #[test]
    fn test_prompts_query_parsing() {
        let params: PromptsQuery = serde_urlencoded::from_str("sort=score&q=login").unwrap();
        assert_eq!(params.sort.as_deref(), Some("score"));
        assert_eq!(params.q.as_deref(), Some("login"));
        assert!(params.dir.is_none());

        let empty: PromptsQuery = serde_urlencoded::from_str("").unwrap();
        assert!(empty.sort.is_none());
    }

    // === Landing page tests ===

    #[test]
    fn test_landing_html_is_valid() {
        assert!(LANDING_HTML.contains("<!DOCTYPE html>"));
        assert!(LANDING_HTML.contains("</html>"));
    }

    #[test]
    fn test_landing_html_polls_stats() {
        assert!(LANDING_HTML.contains("/api/stats"));
    }
}
