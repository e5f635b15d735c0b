//! Error types for the modshim runtime.

use thiserror::Error;

/// Errors that can occur while reading plugin data.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Failed to parse or validate a plugin manifest.
    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    /// The plugin binary could not be parsed or is structurally invalid.
    #[error("Unreadable binary: {0}")]
    Unreadable(String),

    /// A symbol string could not be parsed.
    #[error("Invalid symbol '{text}': {reason}")]
    InvalidSymbol { text: String, reason: String },

    /// A version string could not be parsed.
    #[error("Invalid version '{0}'")]
    InvalidVersion(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;
