//! Error taxonomy shared by every swarm crate.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using the swarm error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of a failure.
///
/// Every crate error maps onto one of these kinds so the orchestrator and the
/// CLI can decide how to surface a failure without knowing which layer raised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing agent, tool, model, asset or message ID.
    NotFound,
    /// Malformed YAML, unknown flow type, invalid action syntax.
    BadRequest,
    /// Secret lookup failure.
    Unauthorized,
    /// Unknown provider, adapter, script language or MIME type.
    Unsupported,
    /// I/O, template evaluation, JSON decoding, subprocess spawn failures.
    Internal,
    /// Deadline exceeded.
    Timeout,
    /// Inference exceeded its turn budget.
    MaxTurns,
}

impl ErrorKind {
    /// Short lowercase name, used in logs and JSON output.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::Internal => "internal",
            ErrorKind::Timeout => "timeout",
            ErrorKind::MaxTurns => "max_turns",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for the shared data model.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Max turns exceeded: {0}")]
    MaxTurns(u32),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::BadRequest(_) => ErrorKind::BadRequest,
            Error::Unauthorized(_) => ErrorKind::Unauthorized,
            Error::Unsupported(_) => ErrorKind::Unsupported,
            Error::Internal(_) | Error::Json(_) => ErrorKind::Internal,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::MaxTurns(_) => ErrorKind::MaxTurns,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(Error::not_found("x").kind(), ErrorKind::NotFound);
        assert_eq!(Error::bad_request("x").kind(), ErrorKind::BadRequest);
        assert_eq!(Error::MaxTurns(3).kind(), ErrorKind::MaxTurns);

        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(Error::from(json_err).kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_display() {
        assert_eq!(Error::not_found("agent foo").to_string(), "Not found: agent foo");
        assert_eq!(ErrorKind::BadRequest.to_string(), "bad_request");
    }
}
