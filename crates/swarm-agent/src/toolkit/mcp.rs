//! MCP tools, proxied to a remote server over streamable HTTP.

use std::sync::Arc;

use async_trait::async_trait;
use swarm_cache::{CacheConfig, TOOLKIT_TTL, TtlCache};
use swarm_config::ToolFunc;
use swarm_mcp::{McpClient, McpServerConfig};
use swarm_types::{ActionResult, ArgMap, Blob};
use tracing::{debug, info};

use super::{ToolKit, ToolOutput};
use crate::error::{AgentError, Result};
use crate::runner::Runner;

/// Connected MCP clients keyed by server URL and token.
///
/// Shared between the resolver (tool discovery) and the kit (calls).
#[derive(Clone)]
pub struct McpPool {
    clients: TtlCache<(String, String), Arc<McpClient>>,
}

impl std::fmt::Debug for McpPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpPool").finish_non_exhaustive()
    }
}

impl Default for McpPool {
    fn default() -> Self {
        Self::new()
    }
}

impl McpPool {
    pub fn new() -> Self {
        Self {
            clients: TtlCache::new(CacheConfig::new().with_ttl(TOOLKIT_TTL)),
        }
    }

    /// A connected client for `url`, reusing a cached session when possible.
    pub async fn client(&self, url: &str, token: &str) -> Result<Arc<McpClient>> {
        let key = (url.to_string(), token.to_string());
        self.clients
            .get_or_try_insert_with(key, || async {
                info!(url = %url, "Connecting to MCP server");
                let mut config = McpServerConfig::new(url, url);
                if !token.is_empty() {
                    config = config.with_token(token);
                }
                let client = McpClient::connect(config).await?;
                Ok::<_, AgentError>(Arc::new(client))
            })
            .await
    }

    /// Forget the session for `url`, e.g. after a transport failure.
    pub async fn evict(&self, url: &str, token: &str) {
        self.clients.remove(&(url.to_string(), token.to_string())).await;
    }
}

/// Server URL of an MCP tool: the kit's connector, else the tool itself.
pub fn server_url(tool: &ToolFunc) -> &str {
    tool.config
        .as_ref()
        .and_then(|c| c.connector.as_ref())
        .map(|c| c.base_url.as_str())
        .filter(|u| !u.is_empty())
        .unwrap_or(&tool.base_url)
}

#[derive(Debug, Clone)]
pub struct McpKit {
    pool: McpPool,
}

impl McpKit {
    pub fn new(pool: McpPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ToolKit for McpKit {
    fn name(&self) -> &str {
        "mcp"
    }

    async fn call(&self, runner: &Arc<Runner>, tool: &ToolFunc, args: &ArgMap) -> Result<ToolOutput> {
        let url = server_url(tool);
        if url.is_empty() {
            return Err(AgentError::bad_request(format!("{}: no MCP server url", tool.reference())));
        }
        let token = runner.token(tool).await?;
        let client = self.pool.client(url, &token).await?;
        debug!(tool = %tool.reference(), url = %url, "Calling MCP tool");

        let arguments = serde_json::Value::Object(args.clone());
        let result = match client.call_tool(&tool.name, Some(arguments)).await {
            Ok(r) => r,
            Err(e) => {
                self.pool.evict(url, &token).await;
                return Err(e.into());
            }
        };
        if result.is_error() {
            return Err(AgentError::tool(format!("{}: {}", tool.reference(), result.text())));
        }
        if let Some((mime, data)) = result.media() {
            let blob = Blob::from_base64(mime, data)?;
            return Ok(ToolOutput::Result(ActionResult::blob(blob.mime_type, blob.content)));
        }
        Ok(ToolOutput::Text(result.text()))
    }
}
