//! Docs-provider client and chat notifier
//!
//! The relay does not talk to any document platform directly; it posts to
//! a configured provider endpoint that owns the vendor API. The notifier
//! is strictly fire-and-forget: a webhook outage must never fail the
//! operation that triggered it.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Error type for docs-provider calls.
#[derive(Debug)]
pub enum DocError {
    /// No provider endpoint configured.
    Unconfigured,
    /// Transport-level failure reaching the provider.
    Http(String),
    /// The provider answered with a failure payload.
    Provider(String),
    /// The provider answered 2xx with a body we could not interpret.
    InvalidResponse(String),
}

impl std::fmt::Display for DocError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocError::Unconfigured => {
                write!(f, "No docs provider configured (set relay.doc_provider_url)")
            }
            DocError::Http(msg) => write!(f, "Docs provider unreachable: {}", msg),
            DocError::Provider(msg) => write!(f, "Docs provider error: {}", msg),
            DocError::InvalidResponse(msg) => write!(f, "Unexpected provider response: {}", msg),
        }
    }
}

impl std::error::Error for DocError {}

/// A successfully created document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedDoc {
    #[serde(rename = "docId")]
    pub doc_id: String,
    #[serde(rename = "editUrl")]
    pub edit_url: String,
    #[serde(rename = "viewUrl")]
    pub view_url: String,
}

#[derive(Serialize)]
struct ProviderRequest<'a> {
    title: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ProviderResponse {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    error: Option<String>,
    #[serde(rename = "docId", default)]
    doc_id: Option<String>,
    #[serde(rename = "editUrl", default)]
    edit_url: Option<String>,
    #[serde(rename = "viewUrl", default)]
    view_url: Option<String>,
}

/// Client for the external document-creation endpoint.
pub struct DocProvider {
    client: reqwest::blocking::Client,
    endpoint: Option<String>,
}

impl DocProvider {
    pub fn new(endpoint: Option<String>) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { client, endpoint }
    }

    pub fn is_configured(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Create a document with the given title and content.
    pub fn create_document(&self, title: &str, content: &str) -> Result<CreatedDoc, DocError> {
        let endpoint = self.endpoint.as_deref().ok_or(DocError::Unconfigured)?;

        let response = self
            .client
            .post(endpoint)
            .json(&ProviderRequest { title, content })
            .send()
            .map_err(|e| DocError::Http(e.to_string()))?;

        let status = response.status();
        let body: ProviderResponse = response
            .json()
            .map_err(|e| DocError::InvalidResponse(e.to_string()))?;

        if !status.is_success() || body.success == Some(false) {
            let message = body
                .error
                .unwrap_or_else(|| format!("provider returned {}", status));
            return Err(DocError::Provider(message));
        }

        match (body.doc_id, body.edit_url, body.view_url) {
            (Some(doc_id), Some(edit_url), Some(view_url)) => Ok(CreatedDoc {
                doc_id,
                edit_url,
                view_url,
            }),
            _ => Err(DocError::InvalidResponse(
                "response missing docId/editUrl/viewUrl".to_string(),
            )),
        }
    }
}

/// Fire-and-forget chat webhook.
pub struct Notifier {
    client: reqwest::blocking::Client,
    webhook_url: Option<String>,
}

impl Notifier {
    pub fn new(webhook_url: Option<String>) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { client, webhook_url }
    }

    /// Post a message. Failures are logged and swallowed; callers must not
    /// see them.
    pub fn notify(&self, message: &str) {
        let Some(url) = self.webhook_url.as_deref() else {
            return;
        };
        let payload = serde_json::json!({ "content": message });
        match self.client.post(url).json(&payload).send() {
            Ok(response) if !response.status().is_success() => {
                log::warn!("webhook returned {}", response.status());
            }
            Ok(_) => {}
            Err(e) => log::warn!("webhook delivery failed: {}", e),
        }
    }
}
