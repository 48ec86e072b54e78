//! Error types for Queue Tabber.

use thiserror::Error;

/// Top-level error type for the orchestrator.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Tab error: {0}")]
    Substrate(#[from] SubstrateError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Unknown settings key: {0}")]
    UnknownKey(String),
}

/// Failures talking to the remote task site.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    #[error("Unexpected status {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Unexpected content type {content_type:?} from {url}")]
    ContentType {
        url: String,
        content_type: Option<String>,
    },

    #[error("Could not decode response from {url}: {reason}")]
    Decode { url: String, reason: String },
}

/// Failures reported by the tab substrate.
#[derive(Debug, Error)]
pub enum SubstrateError {
    #[error("Tab {0} not found")]
    TabNotFound(u64),

    #[error("Tab operation {op} failed: {reason}")]
    OperationFailed { op: String, reason: String },

    #[error("Tab substrate disconnected")]
    Disconnected,
}

/// Native-messaging bridge errors.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Message of {length} bytes exceeds the {max} byte limit")]
    MessageTooLarge { length: usize, max: usize },
}

/// Result type alias for the orchestrator.
pub type Result<T> = std::result::Result<T, Error>;
