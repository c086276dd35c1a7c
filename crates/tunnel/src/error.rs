//! Error types for tunnel provisioning.

use thiserror::Error;

/// Main error type for tunnel operations.
#[derive(Error, Debug)]
pub enum TunnelError {
    /// Configuration errors (invalid executable path, bad options).
    #[error("Tunnel configuration error: {0}")]
    Config(String),

    /// Failures establishing or tearing down the tunnel, wrapping the
    /// underlying cause (spawn errors, permission errors, agent crashes).
    #[error("Failed to create ngrok tunnel: {0}")]
    Connect(String),
}

/// Result type alias for tunnel operations.
pub type Result<T> = std::result::Result<T, TunnelError>;
