//! Error types for op-catalog
//!
//! Every failure in the catalog engine maps onto one [`ErrorKind`]. Upstream
//! logic only ever matches on the kind; the variant payload is a message for
//! humans and logs.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed taxonomy of failure kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connection refused, DNS failure, reset
    Network,
    /// Request exceeded its deadline
    Timeout,
    /// 404 or unknown id
    NotFound,
    /// 429 from upstream
    RateLimit,
    /// Malformed input, bad path, oversized or undersized content
    Validation,
    /// 401/403 from upstream
    Auth,
    /// 5xx from upstream
    Server,
    /// Corruption or serialization failure inside the cache
    Cache,
    /// Queued work rejected before it started
    Cancelled,
    /// Anything else (local I/O and friends)
    Internal,
}

impl ErrorKind {
    /// Whether a caller may reasonably try the same request again later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Network | ErrorKind::Timeout | ErrorKind::RateLimit | ErrorKind::Server
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::NotFound => "not_found",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Validation => "validation",
            ErrorKind::Auth => "auth",
            ErrorKind::Server => "server",
            ErrorKind::Cache => "cache",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Main error type for catalog operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limited: {0}")]
    RateLimit(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Upstream server error: {0}")]
    Server(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Classify this error into the closed taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Network(_) => ErrorKind::Network,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::RateLimit(_) => ErrorKind::RateLimit,
            Error::Validation(_) => ErrorKind::Validation,
            Error::Auth(_) => ErrorKind::Auth,
            Error::Server(_) => ErrorKind::Server,
            Error::Cache(_) => ErrorKind::Cache,
            Error::Cancelled(_) => ErrorKind::Cancelled,
            Error::Serialization(_) => ErrorKind::Validation,
            Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            Error::Io(_) | Error::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Create a network error
    pub fn network(msg: impl Into<String>) -> Self {
        Error::Network(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Validation(format!("YAML: {}", err))
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(Error::network("refused").is_retryable());
        assert!(Error::Timeout("30s".into()).is_retryable());
        assert!(Error::RateLimit("429".into()).is_retryable());
        assert!(Error::Server("502".into()).is_retryable());

        assert!(!Error::not_found("x").is_retryable());
        assert!(!Error::validation("x").is_retryable());
        assert!(!Error::Auth("403".into()).is_retryable());
    }

    #[test]
    fn test_io_not_found_maps_to_not_found() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err: Error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no").into();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
