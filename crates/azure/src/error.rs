//! Error types for the Azure DevOps client.

use thiserror::Error;

/// Main error type for work-item operations.
#[derive(Error, Debug)]
pub enum AzureError {
    /// Configuration errors (invalid base URL, empty identity fields).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Caller-side validation errors (empty title). Never sent over the wire.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Non-success responses from the Azure DevOps API.
    #[error("Azure DevOps API request failed with status {status}: {body}")]
    Api { status: u16, body: String },

    /// Transport errors (connection refused, TLS, timeouts from the stack).
    #[error("HTTP transport error: {0}")]
    Transport(String),

    /// Responses that violate the documented API shape (e.g. missing `id`).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// JSON serialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for work-item operations.
pub type Result<T> = std::result::Result<T, AzureError>;
