//! MCP (Model Context Protocol) client for remote tool servers.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  McpClient                                                  │
//! │  - initialize, tools/list (paged), tools/call               │
//! └─────────────────────────────────────────────────────────────┘
//!                           │
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  HttpTransport                                              │
//! │  - JSON-RPC 2.0 over streamable HTTP                        │
//! │  - bearer token, Mcp-Session-Id, SSE or JSON replies        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use swarm_mcp::{McpClient, McpServerConfig};
//!
//! let config = McpServerConfig::new("github", "https://api.githubcopilot.com/mcp/")
//!     .with_token(token);
//! let client = McpClient::connect(config).await?;
//! for tool in client.list_tools().await? {
//!     println!("{}: {:?}", tool.name, tool.description);
//! }
//! let result = client.call_tool("search_repositories", Some(json!({"query": "rust"}))).await?;
//! println!("{}", result.text());
//! ```

pub mod client;
pub mod error;
pub mod protocol;
pub mod transport;

pub use client::{McpClient, McpServerConfig};
pub use error::{McpError, Result};
pub use protocol::{CallToolResult, ServerInfo, ToolContent, ToolInfo};
pub use transport::{HttpTransport, HttpTransportConfig};
