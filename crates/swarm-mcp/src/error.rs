//! Error types for MCP operations.

use swarm_types::ErrorKind;
use thiserror::Error;

use crate::protocol::{INVALID_PARAMS, METHOD_NOT_FOUND};

/// Result type for MCP operations.
pub type Result<T> = std::result::Result<T, McpError>;

#[derive(Debug, Error)]
pub enum McpError {
    /// Failed to reach the server or read its reply.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server rejected the bearer token.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// JSON-RPC framing problem.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Server returned an error response.
    #[error("server error {code}: {message}")]
    ServerError {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// Tool reported `isError`.
    #[error("tool error: {0}")]
    ToolError(String),

    #[error("tool not found: {0}")]
    ToolNotFound(String),
}

impl McpError {
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn server_error(
        code: i64,
        message: impl Into<String>,
        data: Option<serde_json::Value>,
    ) -> Self {
        Self::ServerError {
            code,
            message: message.into(),
            data,
        }
    }

    pub fn tool_error(msg: impl Into<String>) -> Self {
        Self::ToolError(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            McpError::Unauthorized(_) => ErrorKind::Unauthorized,
            McpError::ToolNotFound(_) => ErrorKind::NotFound,
            McpError::ServerError { code, .. } if *code == METHOD_NOT_FOUND => ErrorKind::NotFound,
            McpError::ServerError { code, .. } if *code == INVALID_PARAMS => ErrorKind::BadRequest,
            _ => ErrorKind::Internal,
        }
    }
}

impl From<reqwest::Error> for McpError {
    fn from(err: reqwest::Error) -> Self {
        McpError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = McpError::server_error(-32600, "Invalid Request", None);
        assert!(err.to_string().contains("-32600"));
        assert!(err.to_string().contains("Invalid Request"));
    }

    #[test]
    fn test_kind() {
        assert_eq!(
            McpError::server_error(-32601, "no method", None).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(McpError::Unauthorized("x".into()).kind(), ErrorKind::Unauthorized);
        assert_eq!(McpError::tool_error("boom").kind(), ErrorKind::Internal);
    }
}
