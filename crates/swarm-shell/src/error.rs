//! Error types for the virtual shell.

use std::time::Duration;

use swarm_types::ErrorKind;
use thiserror::Error;

/// Result type alias for shell operations.
pub type Result<T> = std::result::Result<T, ShellError>;

#[derive(Debug, Error)]
pub enum ShellError {
    /// Script could not be parsed.
    #[error("syntax error: {0}")]
    Parse(String),

    /// Command or builtin not permitted in the virtual shell.
    #[error("{0}")]
    Disallowed(String),

    /// `set -u` and an unset variable was expanded.
    #[error("{0}: unbound variable")]
    UnboundVariable(String),

    /// `${name:?message}` on an unset parameter.
    #[error("{name}: {message}")]
    ParameterNotSet { name: String, message: String },

    /// Path resolves outside the workspace root or through a symlink.
    #[error("access denied: {0}")]
    PathDenied(String),

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    /// External command could not be started.
    #[error("failed to start '{command}': {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    /// Guard refused to run a command.
    #[error("permission denied: {0}")]
    Denied(String),

    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    #[error("cancelled")]
    Cancelled,

    /// Rerouted action failed.
    #[error("{0}")]
    Action(String),

    #[error("HTTP error: {0}")]
    Http(String),
}

impl ShellError {
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn io(path: impl std::fmt::Display, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_string(),
            source,
        }
    }

    pub fn action(msg: impl Into<String>) -> Self {
        Self::Action(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ShellError::Parse(_)
            | ShellError::Disallowed(_)
            | ShellError::UnboundVariable(_)
            | ShellError::ParameterNotSet { .. }
            | ShellError::PathDenied(_) => ErrorKind::BadRequest,
            ShellError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound => {
                ErrorKind::NotFound
            }
            ShellError::Denied(_) => ErrorKind::Unauthorized,
            ShellError::Timeout(_) | ShellError::Cancelled => ErrorKind::Timeout,
            _ => ErrorKind::Internal,
        }
    }
}

impl From<reqwest::Error> for ShellError {
    fn from(err: reqwest::Error) -> Self {
        ShellError::Http(err.to_string())
    }
}
