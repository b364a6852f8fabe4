//! Error types for the request dispatcher
//!
//! Every failure a transport can observe is folded into this single hierarchy
//! with the `thiserror` crate. The dispatcher never inspects variants beyond
//! the outcome's `is_error` flag; classification detail lives in the
//! transport's terminal state.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for operations that can fail with a dispatcher error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the request dispatcher.
#[derive(Debug, Error)]
pub enum Error {
    /// Network or connection error before a usable response arrived.
    ///
    /// The display is the raw message so that the normalized
    /// "Unable to connect" text reaches callers unchanged.
    #[error("{0}")]
    Connection(String),

    /// The exchange exceeded its configured timeout.
    #[error("Request timeout")]
    Timeout {
        /// The timeout that was configured, when one was set per request.
        after: Option<Duration>,
    },

    /// The caller cancelled the request.
    #[error("Request aborted")]
    Aborted,

    /// A response arrived but its status code is outside the success set.
    #[error("The request failed with status code: {status}")]
    HttpFailure {
        /// HTTP status code of the failed response.
        status: u16,
    },

    /// The response body could not be decoded per the negotiated kind.
    #[error("Could not parse response. {0}")]
    ResponseParse(String),

    /// Invalid URL provided.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Invalid HTTP method provided.
    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    /// A request with the same identifier is already in flight.
    #[error("A request with id '{0}' is already in flight")]
    DuplicateRequestId(String),

    /// HTTP client configuration or initialization error.
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other errors not covered by specific variants.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Replace a connection error that carries no message with a
    /// human-readable one. Other errors pass through unchanged.
    pub(crate) fn normalized(self) -> Self {
        match self {
            Error::Connection(message) if message.trim().is_empty() => {
                Error::Connection("Unable to connect".to_string())
            }
            other => other,
        }
    }

    /// True when this error came from caller-issued cancellation.
    pub fn is_abort(&self) -> bool {
        matches!(self, Error::Aborted)
    }

    /// True when this error is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }
}
