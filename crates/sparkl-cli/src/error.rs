//! CLI error types.

use sparkl_duplex::SessionError;
use thiserror::Error;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    /// Node connection failed.
    #[error("connection error: {0}")]
    Connection(String),
    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
    /// Output formatting error.
    #[error("format error: {0}")]
    Format(String),
    /// Invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// No connection is stored under the alias.
    #[error("no connection {0}")]
    NoConnection(String),
    /// Local state could not be read or written.
    #[error("state error: {0}")]
    State(String),
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// Duplex session error.
    #[error("session error: {0}")]
    Session(#[from] SessionError),
}

impl CliError {
    /// Map a session open failure, reporting connect faults as
    /// [`CliError::Connection`].
    #[must_use]
    pub fn from_open(err: SessionError) -> Self {
        match err {
            SessionError::Connection(e) => Self::Connection(e.to_string()),
            SessionError::InvalidUrl(url) => Self::Config(format!("invalid node URL {url}")),
            other => Self::Session(other),
        }
    }
}
