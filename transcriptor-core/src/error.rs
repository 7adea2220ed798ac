//! Error types for transcriptor-core

use thiserror::Error;

/// Main error type for the transcriptor-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (missing or out-of-range settings)
    #[error("configuration error: {0}")]
    Config(String),

    /// All authentication steps exhausted without a usable token
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// A value failed format validation before use in a query or filename
    #[error("validation error: {0}")]
    Validation(String),

    /// A computed output path resolved outside the output directory
    #[error("path traversal blocked: {0}")]
    PathTraversal(String),

    /// Dataverse Web API returned a non-success status
    #[error("Dataverse API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for transcriptor-core
pub type Result<T> = std::result::Result<T, Error>;
