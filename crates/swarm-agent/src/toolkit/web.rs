//! Web tools: fetch a URL as text or download it as a blob.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use swarm_config::ToolFunc;
use swarm_types::{ActionResult, ArgMap, ArgMapExt};
use tracing::debug;

use super::{ToolKit, ToolOutput};
use crate::error::{AgentError, Result};
use crate::runner::Runner;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!("swarm/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct WebKit {
    client: Client,
}

impl Default for WebKit {
    fn default() -> Self {
        Self::new()
    }
}

impl WebKit {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client }
    }

    async fn get(&self, runner: &Runner, tool: &ToolFunc, url: &str) -> Result<reqwest::Response> {
        let mut request = self.client.get(url);
        let token = runner.token(tool).await?;
        if !token.is_empty() {
            request = request.bearer_auth(token);
        }
        let response = tokio::select! {
            _ = runner.vars().cancel.cancelled() => return Err(AgentError::Cancelled),
            r = request.send() => r?,
        };
        let status = response.status();
        if !status.is_success() {
            return Err(AgentError::tool(format!("GET {url}: HTTP {status}")));
        }
        Ok(response)
    }
}

#[async_trait]
impl ToolKit for WebKit {
    fn name(&self) -> &str {
        "web"
    }

    async fn call(&self, runner: &Arc<Runner>, tool: &ToolFunc, args: &ArgMap) -> Result<ToolOutput> {
        let url = args
            .get_string("url")
            .filter(|u| !u.is_empty())
            .ok_or_else(|| AgentError::bad_request("missing required argument: url"))?;
        debug!(tool = %tool.reference(), url = %url, "Fetching");

        match tool.name.as_str() {
            "fetch_content" => {
                let response = self.get(runner, tool, &url).await?;
                Ok(ToolOutput::Text(response.text().await?))
            }
            "download_content" => {
                let response = self.get(runner, tool, &url).await?;
                let mime = response
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.split(';').next())
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
                    .unwrap_or_else(|| "application/octet-stream".to_string());
                let bytes = response.bytes().await?;
                Ok(ToolOutput::Result(ActionResult::blob(mime, bytes.to_vec())))
            }
            other => Err(AgentError::not_found(format!("web tool {}:{other}", tool.kit))),
        }
    }
}
