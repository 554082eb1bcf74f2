//! Error types for the agent crate.

use swarm_types::ErrorKind;
use thiserror::Error;

/// Result type alias using the agent error type.
pub type Result<T> = std::result::Result<T, AgentError>;

/// Error type for agent resolution and request execution.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Pack, config or asset error.
    #[error(transparent)]
    Config(#[from] swarm_config::ConfigError),

    /// LLM backend error.
    #[error("LLM error: {0}")]
    Llm(#[from] swarm_llm::LlmError),

    /// MCP connector error.
    #[error("MCP error: {0}")]
    Mcp(#[from] swarm_mcp::McpError),

    /// History or blob store error.
    #[error(transparent)]
    Memory(#[from] swarm_memory::MemoryError),

    /// Virtual shell error.
    #[error(transparent)]
    Shell(#[from] swarm_shell::ShellError),

    /// Error from the shared data model (action parsing and friends).
    #[error(transparent)]
    Types(#[from] swarm_types::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Tool execution failed.
    #[error("tool error: {0}")]
    Tool(String),

    /// Template parse or evaluation failed.
    #[error("template error: {0}")]
    Template(String),

    /// HTTP request made by a toolkit failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Deadline exceeded.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Request was cancelled by the caller.
    #[error("request cancelled")]
    Cancelled,

    /// Inference exceeded its turn budget.
    #[error("maximum turns exceeded: {0}")]
    MaxTurns(i64),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgentError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    pub fn tool(msg: impl Into<String>) -> Self {
        Self::Tool(msg.into())
    }

    pub fn template(msg: impl Into<String>) -> Self {
        Self::Template(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::Config(e) => e.kind(),
            AgentError::Llm(e) => e.kind(),
            AgentError::Mcp(e) => e.kind(),
            AgentError::Memory(e) => e.kind(),
            AgentError::Shell(e) => e.kind(),
            AgentError::Types(e) => e.kind(),
            AgentError::NotFound(_) => ErrorKind::NotFound,
            AgentError::BadRequest(_) => ErrorKind::BadRequest,
            AgentError::Unauthorized(_) => ErrorKind::Unauthorized,
            AgentError::Unsupported(_) => ErrorKind::Unsupported,
            AgentError::Timeout(_) | AgentError::Cancelled => ErrorKind::Timeout,
            AgentError::MaxTurns(_) => ErrorKind::MaxTurns,
            AgentError::Tool(_)
            | AgentError::Template(_)
            | AgentError::Http(_)
            | AgentError::Serialization(_)
            | AgentError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether this error stems from pack configuration or action syntax
    /// rather than execution.
    pub fn is_config(&self) -> bool {
        matches!(self, AgentError::Config(_) | AgentError::Types(_))
    }
}
