//! Streamable HTTP transport.
//!
//! Every JSON-RPC message is POSTed to a single endpoint. The server answers
//! with either `application/json` or a `text/event-stream` whose `data:`
//! lines carry JSON-RPC messages. A session ID handed out on initialize is
//! echoed on every later request.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::header;
use tracing::trace;

use crate::error::{McpError, Result};
use crate::protocol::{Envelope, Reply};

/// Header carrying the server-assigned session.
pub const SESSION_HEADER: &str = "Mcp-Session-Id";

#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    pub url: String,
    pub timeout: Duration,
    /// Bearer token; sent as `Authorization: Bearer <token>`.
    pub token: Option<String>,
    pub headers: Vec<(String, String)>,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout: Duration::from_secs(30),
            token: None,
            headers: Vec::new(),
        }
    }
}

impl HttpTransportConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.token = if token.is_empty() { None } else { Some(token) };
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }
}

#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    config: HttpTransportConfig,
    session: Mutex<Option<String>>,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub fn connect(config: HttpTransportConfig) -> Result<Self> {
        url::Url::parse(&config.url)
            .map_err(|e| McpError::transport(format!("invalid URL {}: {e}", config.url)))?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| McpError::transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            config,
            session: Mutex::new(None),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    pub fn session_id(&self) -> Option<String> {
        self.session.lock().clone()
    }

    fn post(&self, body: String) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .post(&self.config.url)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, "application/json, text/event-stream")
            .body(body);
        if let Some(token) = &self.config.token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(session) = self.session.lock().clone() {
            req = req.header(SESSION_HEADER, session);
        }
        for (k, v) in &self.config.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        req
    }

    async fn send(&self, body: String) -> Result<reqwest::Response> {
        trace!(url = %self.config.url, json = %body, "sending MCP message");
        let resp = self.post(body).send().await?;
        if let Some(session) = resp
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session.lock() = Some(session.to_string());
        }
        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(McpError::Unauthorized(format!("HTTP {status}")));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(McpError::transport(format!("HTTP error {status}: {body}")));
        }
        Ok(resp)
    }

    /// Send a request and wait for the response with the same ID.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<Reply> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = serde_json::to_string(&Envelope::request(id, method, params))?;
        let resp = self.send(body).await?;

        let is_stream = resp
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));
        let text = resp.text().await?;
        trace!(json = %text, "received MCP response");

        if is_stream {
            parse_event_stream(&text, id)
        } else {
            Ok(serde_json::from_str(&text)?)
        }
    }

    /// Fire a notification; the server answers 202 with no body.
    pub async fn notify(&self, method: &str, params: Option<serde_json::Value>) -> Result<()> {
        let body = serde_json::to_string(&Envelope::notification(method, params))?;
        self.send(body).await?;
        Ok(())
    }
}

/// Find the response for `id` among the `data:` events of an SSE body.
pub fn parse_event_stream(text: &str, id: u64) -> Result<Reply> {
    let mut data = String::new();
    let mut events = Vec::new();
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(rest.trim_start());
        } else if line.trim().is_empty() && !data.is_empty() {
            events.push(std::mem::take(&mut data));
        }
    }
    if !data.is_empty() {
        events.push(data);
    }

    for event in events {
        let Ok(msg) = serde_json::from_str::<Reply>(&event) else {
            continue;
        };
        if msg.id == Some(id) {
            return Ok(msg);
        }
    }
    Err(McpError::protocol(format!(
        "event stream ended without a response to request {id}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_url() {
        assert!(HttpTransport::connect(HttpTransportConfig::new("not a url")).is_err());
    }

    #[test]
    fn test_parse_event_stream_skips_notifications() {
        let body = "event: message\n\
data: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/progress\",\"params\":{}}\n\
\n\
event: message\n\
data: {\"jsonrpc\":\"2.0\",\"id\":7,\"result\":{\"ok\":true}}\n\
\n";
        let resp = parse_event_stream(body, 7).unwrap();
        assert_eq!(resp.result.unwrap()["ok"], true);
        assert!(parse_event_stream(body, 8).is_err());
    }
}
