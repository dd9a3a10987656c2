//! Error types for the sidekick engine.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, SidekickError>;

/// Default message when a non-success response carries no usable body.
pub const DEFAULT_REQUEST_FAILURE: &str = "API request failed";

/// Main error type for the engine.
///
/// Cancellation is deliberately absent: a stopped stream ends in
/// [`crate::accumulator::StreamOutcome::Stopped`], not in an error.
#[derive(Debug, Error)]
pub enum SidekickError {
    // Transport errors
    #[error("Connection failed to {endpoint}: {message}")]
    Transport { endpoint: String, message: String },

    #[error("{message}")]
    Network { status: u16, message: String },

    // Stream errors
    #[error("{0}")]
    Protocol(String),

    // Settings errors
    #[error("Configuration required: {0}")]
    Configuration(String),

    #[error("Extension context invalidated")]
    HostInvalidated,

    #[error("Storage error: {0}")]
    Storage(String),

    // Host document errors
    #[error("Host document error: {0}")]
    Host(String),

    // Config file errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SidekickError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a protocol error from a server-reported stream error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Create a host document error.
    pub fn host(message: impl Into<String>) -> Self {
        Self::Host(message.into())
    }

    /// Create a config-file error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Convert a reqwest failure that happened before or during the body read.
    pub fn from_reqwest(e: reqwest::Error, endpoint: &str) -> Self {
        Self::Transport {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        }
    }

    /// Whether the failure came from the network layer (no response,
    /// connection reset, or a non-success status).
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Network { .. })
    }

    /// Whether retrying inside the current page can ever succeed.
    pub fn requires_reload(&self) -> bool {
        matches!(self, Self::HostInvalidated)
    }

    /// Text shown inline in the injected container.
    pub fn user_message(&self) -> String {
        match self {
            Self::Configuration(_) => {
                "Please configure the API URL and select a token in the extension settings first."
                    .to_string()
            }
            Self::HostInvalidated => {
                "The extension context was invalidated. Please reload the page or restart the browser."
                    .to_string()
            }
            other => format!("Error: {other}"),
        }
    }
}
