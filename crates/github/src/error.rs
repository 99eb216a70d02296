//! Errors raised by the adapter itself, before a port call can be answered.
//!
//! Port methods report [`backport::HostError`]; these errors cover client
//! construction and token issuance, and are folded into
//! `HostError::Transport` when they happen in the middle of a call.

use thiserror::Error;

use backport::HostError;

#[derive(Debug, Error)]
pub enum GithubError {
    /// The HTTP client could not be built or the request never completed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// GitHub answered a token request with an error status.
    #[error("GitHub returned {status}: {message}")]
    Status { status: u16, message: String },

    /// The response body did not have the expected shape.
    #[error("could not decode GitHub response: {0}")]
    Decode(#[from] serde_json::Error),

    /// The app private key could not be read or used for signing.
    #[error("GitHub App key error: {0}")]
    Key(#[from] jsonwebtoken::errors::Error),

    /// Invalid adapter configuration (for example a malformed API URL).
    #[error("invalid GitHub client configuration: {0}")]
    Config(String),
}

impl From<GithubError> for HostError {
    fn from(err: GithubError) -> Self {
        match err {
            GithubError::Status { status, message } => HostError::Api { status, message },
            GithubError::Decode(e) => HostError::Decode(e.to_string()),
            other => HostError::Transport(other.to_string()),
        }
    }
}
