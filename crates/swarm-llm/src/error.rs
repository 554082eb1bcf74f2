//! Error types for the LLM crate.

use std::time::Duration;

use swarm_types::ErrorKind;
use thiserror::Error;

/// Result type alias using the LLM error type.
pub type Result<T> = std::result::Result<T, LlmError>;

/// Information about a rate limit error.
#[derive(Debug, Clone)]
pub struct RateLimitInfo {
    pub message: String,
    /// How long to wait before retrying, if the provider said.
    pub retry_after: Option<Duration>,
}

impl RateLimitInfo {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retry_after: None,
        }
    }

    /// Parse the `Retry-After` header (seconds form).
    pub fn from_header(message: impl Into<String>, retry_after: Option<&str>) -> Self {
        Self {
            message: message.into(),
            retry_after: retry_after
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs),
        }
    }
}

impl std::fmt::Display for RateLimitInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(retry_after) = self.retry_after {
            write!(f, " (retry after {:.2}s)", retry_after.as_secs_f64())?;
        }
        Ok(())
    }
}

/// Error type for LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Provider returned an error response.
    #[error("Backend error: {0}")]
    Backend(String),

    /// Network/connectivity error (retryable).
    #[error("Network error: {0}")]
    Network(String),

    /// Missing model, base URL or key.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Rate limit exceeded (retryable with backoff).
    #[error("Rate limit exceeded: {0}")]
    RateLimit(RateLimitInfo),

    #[error("Authentication error: {0}")]
    Auth(String),

    /// Unknown provider or an operation the provider does not offer.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LlmError {
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Map a non-success HTTP status to an error.
    pub fn from_status(status: u16, body: &str, retry_after: Option<&str>) -> Self {
        match status {
            401 | 403 => Self::Auth(body.to_string()),
            429 => Self::RateLimit(RateLimitInfo::from_header(body, retry_after)),
            400 | 404 | 422 => Self::InvalidRequest(format!("HTTP {status}: {body}")),
            500..=599 => Self::Network(format!("HTTP {status}: {body}")),
            _ => Self::Backend(format!("HTTP {status}: {body}")),
        }
    }

    /// Get the retry-after duration if this is a rate limit error.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimit(info) => info.retry_after,
            _ => None,
        }
    }

    /// Network errors and rate limits are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::RateLimit(_))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            LlmError::Auth(_) => ErrorKind::Unauthorized,
            LlmError::Unsupported(_) => ErrorKind::Unsupported,
            LlmError::InvalidRequest(_) | LlmError::Config(_) => ErrorKind::BadRequest,
            LlmError::Backend(_)
            | LlmError::Network(_)
            | LlmError::Serialization(_)
            | LlmError::RateLimit(_)
            | LlmError::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Network(format!("Request timed out: {err}"))
        } else if err.is_connect() {
            LlmError::Network(format!("Connection failed: {err}"))
        } else if err.is_decode() {
            LlmError::Serialization(err.to_string())
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        LlmError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_retryable() {
        assert!(LlmError::Network("timeout".into()).is_retryable());
        assert!(LlmError::RateLimit(RateLimitInfo::new("slow down")).is_retryable());
        assert!(!LlmError::Config("bad".into()).is_retryable());
        assert!(!LlmError::Auth("no".into()).is_retryable());
    }

    #[test]
    fn test_from_status() {
        assert!(matches!(LlmError::from_status(401, "x", None), LlmError::Auth(_)));
        let err = LlmError::from_status(429, "limited", Some("7"));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
        assert_eq!(LlmError::from_status(503, "down", None).kind(), ErrorKind::Internal);
        assert!(LlmError::from_status(503, "down", None).is_retryable());
    }

    #[test]
    fn test_kind() {
        assert_eq!(LlmError::unsupported("x").kind(), ErrorKind::Unsupported);
        assert_eq!(LlmError::Auth("x".into()).kind(), ErrorKind::Unauthorized);
    }
}
