//! Function-as-a-service tools: the body is posted to a remote executor.
//!
//! Request: `{"url": ..., "code": ..., "args": {...}}` with
//! `Authorization: Basic <token>`. Response: `{"statusCode": n, "body": ...}`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use swarm_config::ToolFunc;
use swarm_types::ArgMap;
use tracing::debug;

use super::{ToolKit, ToolOutput};
use crate::error::{AgentError, Result};
use crate::runner::Runner;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Serialize)]
struct FaasRequest<'a> {
    url: &'a str,
    code: &'a str,
    args: &'a ArgMap,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FaasResponse {
    #[serde(default)]
    status_code: u16,
    #[serde(default)]
    body: Value,
}

#[derive(Debug, Clone)]
pub struct FaasKit {
    client: Client,
}

impl Default for FaasKit {
    fn default() -> Self {
        Self::new()
    }
}

impl FaasKit {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client }
    }
}

#[async_trait]
impl ToolKit for FaasKit {
    fn name(&self) -> &str {
        "faas"
    }

    async fn call(&self, runner: &Arc<Runner>, tool: &ToolFunc, args: &ArgMap) -> Result<ToolOutput> {
        if tool.base_url.is_empty() {
            return Err(AgentError::bad_request(format!("{}: no faas endpoint", tool.reference())));
        }
        let (url, code) = tool
            .body
            .as_ref()
            .map(|b| (b.url.as_str(), b.code.as_str()))
            .unwrap_or(("", ""));
        let payload = FaasRequest { url, code, args };

        let mut request = self.client.post(&tool.base_url).json(&payload);
        let token = runner.token(tool).await?;
        if !token.is_empty() {
            request = request.header(reqwest::header::AUTHORIZATION, format!("Basic {token}"));
        }
        debug!(tool = %tool.reference(), endpoint = %tool.base_url, "Calling faas");

        let response = tokio::select! {
            _ = runner.vars().cancel.cancelled() => return Err(AgentError::Cancelled),
            r = request.send() => r?,
        };
        let http_status = response.status();
        let text = response.text().await?;
        if !http_status.is_success() {
            return Err(AgentError::tool(format!("{}: HTTP {http_status}: {text}", tool.reference())));
        }
        let reply: FaasResponse = serde_json::from_str(&text)?;
        let body = match reply.body {
            Value::String(s) => s,
            Value::Null => String::new(),
            other => other.to_string(),
        };
        if reply.status_code >= 400 {
            return Err(AgentError::tool(format!(
                "{}: status {}: {body}",
                tool.reference(),
                reply.status_code
            )));
        }
        Ok(ToolOutput::Text(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_shapes() {
        let r: FaasResponse = serde_json::from_str(r#"{"statusCode": 200, "body": "ok"}"#).unwrap();
        assert_eq!(r.status_code, 200);
        assert_eq!(r.body, Value::String("ok".into()));

        let r: FaasResponse = serde_json::from_str(r#"{"body": {"a": 1}}"#).unwrap();
        assert_eq!(r.status_code, 0);
    }
}
