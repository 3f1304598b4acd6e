//! Error types for the sentry.

use std::io;

use thiserror::Error;

/// Errors that can occur in the sentry.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or incomplete configuration.
    #[error("config error: {0}")]
    Config(String),

    /// Upstream Ethereum RPC failed.
    #[error("RPC error: {0}")]
    Rpc(#[from] crate::rpc::RpcError),

    /// Ledger store failure.
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// Failed to parse JSON.
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// URL parsing failed.
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// I/O error (artifacts, input files).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
