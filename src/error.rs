//! # Client Error Types
//!
//! Unified error handling for the external task client. Every failure a caller
//! can observe is classified into one of these kinds; transport details stay
//! inside the engine API layer.

use thiserror::Error;

/// Client operation result type
pub type ClientResult<T> = Result<T, ClientError>;

/// Error taxonomy for external task client operations
///
/// The kinds mirror how the engine reports failures over its REST API plus the
/// purely client-side conditions (configuration mistakes, variable mapping
/// failures). Retry timing is never handled where these are raised: fetch-level
/// errors flow into the poll loop's backoff strategy and report-level errors are
/// surfaced to the application untouched.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClientError {
    /// The engine failed while processing an otherwise valid request
    /// (e.g. a persistence exception). Transient, worth retrying.
    #[error("engine execution failed: {0}")]
    Engine(String),

    /// The request was structurally or semantically invalid (unknown task id,
    /// malformed payload). Not retryable without client-side correction.
    #[error("invalid request: {0}")]
    BadRequest(String),

    /// The transport could not reach the engine or the connection dropped
    /// mid-request. Transient, worth retrying.
    #[error("connection to the engine lost: {0}")]
    ConnectionLost(String),

    /// The engine answered with a status code this client does not recognize.
    /// Treated conservatively as non-retryable.
    #[error("unexpected HTTP status {status}: {message}")]
    UnknownHttpStatus { status: u16, message: String },

    /// A variable could not be (de)serialized: unsupported native type,
    /// unknown wire type name, or a declared serialization format this
    /// client does not support.
    #[error("variable mapping failed: {0}")]
    DataFormat(String),

    /// An outcome report referenced a task whose lock already expired or was
    /// reassigned to another worker.
    #[error("task lease no longer held: {0}")]
    LeaseLost(String),

    /// A client-side configuration mistake, detected before any network
    /// activity (duplicate topic subscription, invalid base URL, duplicate
    /// terminal outcome report).
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ClientError {
    /// Create a data format error
    pub fn data_format(message: impl Into<String>) -> Self {
        Self::DataFormat(message.into())
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Check if the error is transient and worth retrying on a later cycle
    ///
    /// Error-aware backoff strategies use this to distinguish connectivity
    /// trouble from permanent request defects.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Engine(_) | ClientError::ConnectionLost(_))
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(error: reqwest::Error) -> Self {
        ClientError::ConnectionLost(error.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(error: serde_json::Error) -> Self {
        ClientError::DataFormat(format!("JSON serialization error: {error}"))
    }
}
