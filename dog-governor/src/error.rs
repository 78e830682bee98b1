use std::time::Duration;

use thiserror::Error;

use crate::types::QueueKey;

/// Result type for governor operations
pub type GovernorResult<T> = Result<T, GovernorError>;

/// Errors surfaced to callers of the governor
#[derive(Error, Debug, Clone)]
pub enum GovernorError {
    /// Admission rejected; the key's queue is at capacity
    #[error("Queue full for {key} (capacity: {capacity})")]
    QueueFull { key: QueueKey, capacity: usize },

    /// Item was discarded by an explicit clear operation
    #[error("Queue cleared for {key}")]
    Cleared { key: QueueKey },

    /// Item waited in the queue past its deadline
    #[error("Timed out after waiting {waited_ms}ms in queue {key}")]
    Timeout { key: QueueKey, waited_ms: u64 },

    /// Fatal provider error, never retried
    #[error("Provider error: {0}")]
    Provider(ProviderError),

    /// Retryable provider error that kept failing until the attempt budget ran out
    #[error("Operation failed after {attempts} attempts: {source}")]
    ExhaustedRetries {
        attempts: u32,
        #[source]
        source: ProviderError,
    },

    /// A page fetch failed; accumulated rows were discarded
    #[error("Pagination failed after {pages_fetched} pages: {source}")]
    Pagination {
        pages_fetched: u32,
        #[source]
        source: Box<GovernorError>,
    },

    #[error("Invalid priority: {0} (expected 0..=10)")]
    InvalidPriority(i64),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GovernorError {
    pub fn is_queue_full(&self) -> bool {
        matches!(self, Self::QueueFull { .. })
    }

    pub fn is_cleared(&self) -> bool {
        matches!(self, Self::Cleared { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Whether retrying the whole operation later could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::QueueFull { .. } | Self::Timeout { .. } | Self::ExhaustedRetries { .. } => true,
            Self::Provider(e) => e.class() == ErrorClass::Retryable,
            Self::Pagination { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// The provider error at the root of this failure, if any
    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            Self::Provider(e) | Self::ExhaustedRetries { source: e, .. } => Some(e),
            Self::Pagination { source, .. } => source.provider_error(),
            _ => None,
        }
    }
}

impl From<ProviderError> for GovernorError {
    fn from(err: ProviderError) -> Self {
        Self::Provider(err)
    }
}

#[cfg(feature = "json")]
impl From<serde_json::Error> for GovernorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// Retry classification of a failed call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient - likely to succeed if retried after a delay
    Retryable,

    /// Permanent - will fail again unchanged
    Fatal,
}

/// Failure reported by the external control-plane API
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// Non-success HTTP status from the provider
    #[error("HTTP {status}: {message}")]
    Http {
        status: u16,
        message: String,
        retry_after: Option<Duration>,
    },

    /// Connection-level failure (reset, DNS, TLS)
    #[error("Network error: {0}")]
    Network(String),

    /// Provider did not answer in time
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Credentials rejected or missing
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Request could not be understood by the provider
    #[error("Malformed request: {0}")]
    Malformed(String),
}

impl ProviderError {
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
            retry_after: None,
        }
    }

    /// HTTP 429 with an optional Retry-After hint
    pub fn rate_limited(retry_after: Option<Duration>) -> Self {
        Self::Http {
            status: 429,
            message: "Too Many Requests".to_string(),
            retry_after,
        }
    }

    /// HTTP 503
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::http(503, message)
    }

    /// HTTP 401
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::http(401, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    /// HTTP status code, when the failure came from an HTTP response
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Provider-supplied hint for how long to wait before retrying
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Http { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Default classification: throttling, unavailability and transport
    /// failures are transient; everything else is permanent.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Http { status, .. } => match status {
                408 | 429 | 500 | 502 | 503 | 504 => ErrorClass::Retryable,
                _ => ErrorClass::Fatal,
            },
            Self::Network(_) | Self::Timeout(_) => ErrorClass::Retryable,
            Self::Auth(_) | Self::Malformed(_) => ErrorClass::Fatal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_classification() {
        assert_eq!(ProviderError::rate_limited(None).class(), ErrorClass::Retryable);
        assert_eq!(ProviderError::unavailable("down").class(), ErrorClass::Retryable);
        assert_eq!(ProviderError::network("reset").class(), ErrorClass::Retryable);
        assert_eq!(ProviderError::Timeout("slow".into()).class(), ErrorClass::Retryable);

        assert_eq!(ProviderError::unauthorized("bad token").class(), ErrorClass::Fatal);
        assert_eq!(ProviderError::http(400, "bad query").class(), ErrorClass::Fatal);
        assert_eq!(ProviderError::http(403, "forbidden").class(), ErrorClass::Fatal);
        assert_eq!(ProviderError::Malformed("syntax".into()).class(), ErrorClass::Fatal);
    }

    #[test]
    fn test_provider_error_root_is_reachable_through_wrappers() {
        let root = ProviderError::unavailable("maintenance");
        let err = GovernorError::Pagination {
            pages_fetched: 2,
            source: Box::new(GovernorError::ExhaustedRetries {
                attempts: 3,
                source: root.clone(),
            }),
        };

        assert_eq!(err.provider_error(), Some(&root));
        assert!(err.is_retryable());
        assert!(!GovernorError::Provider(ProviderError::unauthorized("x")).is_retryable());
    }

    #[test]
    fn test_exhausted_retries_message() {
        let err = GovernorError::ExhaustedRetries {
            attempts: 3,
            source: ProviderError::rate_limited(None),
        };
        assert_eq!(
            err.to_string(),
            "Operation failed after 3 attempts: HTTP 429: Too Many Requests"
        );
    }
}
