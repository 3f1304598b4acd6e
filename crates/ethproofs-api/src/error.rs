//! Error types for the EthProofs API client.

use thiserror::Error;

/// Errors that can occur when talking to the EthProofs API.
#[derive(Debug, Error)]
pub enum EthProofsError {
    /// URL parsing failed.
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// HTTP request failed (transport, timeout).
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    /// The API returned a non-success status code.
    #[error("API error (status: {status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body as returned by the server.
        message: String,
    },

    /// The API answered 200 but the body carried an application error.
    #[error("API rejected request: {0}")]
    Rejected(String),

    /// Failed to parse the response body.
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, EthProofsError>;
