//! Configuration file support for garage
//!
//! Reads from .garage/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration structure
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct GarageConfig {
    /// Embedded store settings
    #[serde(default)]
    pub store: StoreConfig,

    /// Relay server settings
    #[serde(default)]
    pub relay: RelayConfig,

    /// Collection names the garage reads and writes
    #[serde(default)]
    pub collections: CollectionsConfig,
}

/// Embedded store settings
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct StoreConfig {
    /// Database path override. The GARAGE_DB_PATH env var wins over this,
    /// and both win over the .garage/ walk-up default.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Relay server settings
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RelayConfig {
    /// Port the relay listens on
    #[serde(default = "default_port")]
    pub port: u16,

    /// External docs-provider endpoint the relay calls for /create_doc.
    /// When unset, /create_doc reports the relay as unconfigured.
    #[serde(default)]
    pub doc_provider_url: Option<String>,

    /// Chat webhook notified after successful document creation.
    #[serde(default)]
    pub webhook_url: Option<String>,
}

fn default_port() -> u16 {
    8080
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            doc_provider_url: None,
            webhook_url: None,
        }
    }
}

/// Collection names the garage reads and writes
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CollectionsConfig {
    /// Preferred prompt collection
    #[serde(default = "default_primary")]
    pub primary: String,

    /// Fallback collection used when the primary is empty
    #[serde(default = "default_fallback")]
    pub fallback: String,

    /// Evaluation request queue
    #[serde(default = "default_evaluations")]
    pub evaluations: String,

    /// Mirrored document metadata written by the relay
    #[serde(default = "default_documents")]
    pub documents: String,
}

fn default_primary() -> String {
    "prompts".to_string()
}

fn default_fallback() -> String {
    "branches".to_string()
}

fn default_evaluations() -> String {
    "evaluation_requests".to_string()
}

fn default_documents() -> String {
    "documents".to_string()
}

impl Default for CollectionsConfig {
    fn default() -> Self {
        Self {
            primary: default_primary(),
            fallback: default_fallback(),
            evaluations: default_evaluations(),
            documents: default_documents(),
        }
    }
}

impl GarageConfig {
    /// Load config from .garage/config.toml
    /// Returns default config if file doesn't exist
    pub fn load() -> Self {
        if let Some(path) = Self::find_config_path() {
            if let Ok(contents) = std::fs::read_to_string(&path) {
                if let Ok(config) = toml::from_str(&contents) {
                    return config;
                }
            }
        }
        Self::default()
    }

    /// Find config.toml by walking up directory tree
    fn find_config_path() -> Option<PathBuf> {
        let current_dir = std::env::current_dir().ok()?;
        let mut dir = current_dir.as_path();

        loop {
            let config_path = dir.join(".garage").join("config.toml");
            if config_path.exists() {
                return Some(config_path);
            }

            match dir.parent() {
                Some(parent) => dir = parent,
                None => break,
            }
        }
        None
    }
}
