//! MCP client for a single remote server.

use std::time::Duration;

use serde_json::Value;

use crate::error::{McpError, Result};
use crate::protocol::{
    self, CallToolResult, InitializeResult, METHOD_NOT_FOUND, ServerInfo, ToolInfo, ToolPage,
};
use crate::transport::{HttpTransport, HttpTransportConfig};

/// Upper bound on `tools/list` pages followed before giving up.
const MAX_LIST_PAGES: usize = 64;

/// Connection settings for one server, usually built from a toolkit's
/// connector block.
#[derive(Debug, Clone)]
pub struct McpServerConfig {
    /// Name the server's tools are surfaced under.
    pub name: String,
    pub url: String,
    pub token: Option<String>,
    pub timeout: Option<Duration>,
    pub headers: Vec<(String, String)>,
}

impl McpServerConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            token: None,
            timeout: None,
            headers: Vec::new(),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.token = (!token.is_empty()).then_some(token);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }
}

#[derive(Debug)]
pub struct McpClient {
    name: String,
    transport: HttpTransport,
    server_info: ServerInfo,
}

impl McpClient {
    /// Connect and run the initialize handshake.
    pub async fn connect(config: McpServerConfig) -> Result<Self> {
        let mut http = HttpTransportConfig::new(&config.url);
        if let Some(token) = &config.token {
            http = http.with_token(token);
        }
        if let Some(timeout) = config.timeout {
            http = http.with_timeout(timeout);
        }
        for (k, v) in &config.headers {
            http = http.with_header(k, v);
        }
        let transport = HttpTransport::connect(http)?;

        let result = call(&transport, "initialize", Some(protocol::initialize_params())).await?;
        let init: InitializeResult = serde_json::from_value(result)?;
        transport.notify("notifications/initialized", None).await?;

        tracing::info!(
            server = %config.name,
            url = %config.url,
            remote = %init.server_info.name,
            protocol = %init.protocol_version,
            "MCP server initialized"
        );

        Ok(Self {
            name: config.name,
            transport,
            server_info: init.server_info,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    pub fn session_id(&self) -> Option<String> {
        self.transport.session_id()
    }

    /// List every tool, following `nextCursor` pages.
    pub async fn list_tools(&self) -> Result<Vec<ToolInfo>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_LIST_PAGES {
            let params = protocol::list_params(cursor.as_deref());
            let result = call(&self.transport, "tools/list", params).await?;
            let page: ToolPage = serde_json::from_value(result)?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        tracing::debug!(server = %self.name, tool_count = tools.len(), "listed MCP tools");
        Ok(tools)
    }

    /// Call a tool. A result flagged `isError` comes back as
    /// [`McpError::ToolError`] carrying its text.
    pub async fn call_tool(&self, name: &str, arguments: Option<Value>) -> Result<CallToolResult> {
        let params = protocol::call_params(name, arguments);
        let result = call(&self.transport, "tools/call", Some(params))
            .await
            .map_err(|e| match e {
                McpError::ServerError { code, .. } if code == METHOD_NOT_FOUND => {
                    McpError::ToolNotFound(name.to_string())
                }
                other => other,
            })?;
        let result: CallToolResult = serde_json::from_value(result)?;
        if result.is_error() {
            tracing::warn!(server = %self.name, tool = %name, "tool call returned error");
            return Err(McpError::tool_error(result.text()));
        }
        tracing::debug!(server = %self.name, tool = %name, "tool call succeeded");
        Ok(result)
    }
}

async fn call(transport: &HttpTransport, method: &str, params: Option<Value>) -> Result<Value> {
    transport
        .request(method, params)
        .await?
        .into_result()
        .map_err(|e| McpError::server_error(e.code, e.message, e.data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_builder() {
        let config = McpServerConfig::new("github", "https://example.com/mcp")
            .with_token("")
            .with_timeout(Duration::from_secs(5))
            .with_header("X-Trace", "1");
        assert!(config.token.is_none());
        assert_eq!(config.timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.headers.len(), 1);
    }
}
