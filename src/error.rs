//! Error types for the synchronization core.

use thiserror::Error;

/// Errors that can occur while syncing conversations with the remote source.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// HTTP request failed before a response was received.
    #[error("HTTP request failed: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// The remote answered with a non-success status.
    #[error("remote returned HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body (truncated).
        body: String,
    },

    /// JSON encoding or decoding error.
    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Local cache storage error.
    #[error("storage error: {0}")]
    Storage(#[from] tokio_rusqlite::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Outbound messaging is switched off for the conversation.
    #[error("sending is disabled for conversation {0}")]
    SendingDisabled(String),

    /// The selected conversation's history has not been loaded yet.
    #[error("history of conversation {0} is not loaded yet")]
    HistoryNotLoaded(String),

    /// An operation needed a selected conversation.
    #[error("no conversation is selected")]
    NoActiveConversation,
}

impl TrackerError {
    /// Whether the failure is expected to clear up on the next poll tick.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::HttpRequest(_) | Self::JsonParse(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// Convenience result alias for tracker operations.
pub type TrackerResult<T> = Result<T, TrackerError>;
