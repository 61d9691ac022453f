//! Crate-wide error taxonomy.

use std::path::PathBuf;
use thiserror::Error;

/// The result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, LinterError>;

/// Every way this program can fail, grouped by the taxonomy in the design notes:
/// configuration, network, rate-limit, parse, and file-I/O-timeout errors.
#[derive(Error, Debug)]
pub enum LinterError {
    #[error("missing required configuration: {0}")]
    Config(String),

    #[error("could not locate executable for {tool} (version spec {version:?})")]
    ToolNotFound { tool: String, version: String },

    #[error("network request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("rate limit exceeded, resets at unix time {reset}")]
    RateLimited { reset: u64 },

    #[error("failed to parse {what}: {reason}")]
    Parse { what: String, reason: String },

    #[error("timed out waiting for exclusive access to {path} after {elapsed_ms}ms")]
    FileIoTimeout { path: PathBuf, elapsed_ms: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Git(#[from] git2::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Xml(#[from] serde_xml_rs::Error),
}

impl From<reqwest::Error> for LinterError {
    fn from(source: reqwest::Error) -> Self {
        let url = source
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        LinterError::Network { url, source }
    }
}
