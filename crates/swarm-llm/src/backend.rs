//! LLM backend trait, shared configuration and retry logic.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{LlmError, Result};
use crate::types::{
    CompletionRequest, CompletionResponse, ImageRequest, ImageResponse, SpeechRequest,
    SpeechResponse,
};

/// Default timeout for provider requests.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Connection settings for one provider endpoint.
#[derive(Clone)]
pub struct BackendConfig {
    /// Endpoint base; empty selects the provider default.
    pub base_url: String,
    /// Resolved secret, not the key name.
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_retries: 3,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

impl BackendConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.api_key = if key.is_empty() { None } else { Some(key) };
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Base URL with the provider default applied and no trailing slash.
    pub fn base_or(&self, default: &str) -> String {
        let base = if self.base_url.is_empty() {
            default
        } else {
            self.base_url.as_str()
        };
        base.trim_end_matches('/').to_string()
    }

    pub(crate) fn http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| LlmError::Internal(format!("Failed to create HTTP client: {e}")))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared Retry Logic
// ─────────────────────────────────────────────────────────────────────────────

/// Execute an async operation with exponential backoff retry.
///
/// Only network failures and rate limits are retried; a provider supplied
/// `Retry-After` replaces the computed backoff for that attempt.
pub async fn with_retry<F, Fut, T>(
    max_retries: u32,
    initial_backoff: Duration,
    backend_name: &str,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut backoff = initial_backoff;
    let mut attempt = 0;

    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_retryable() || attempt >= max_retries => return Err(e),
            Err(e) => {
                let wait = e.retry_after().unwrap_or(backoff);
                attempt += 1;
                tracing::warn!(
                    backend = backend_name,
                    attempt,
                    max_retries,
                    backoff_ms = wait.as_millis() as u64,
                    error = %e,
                    "Request failed, retrying"
                );
                tokio::time::sleep(wait).await;
                backoff *= 2;
            }
        }
    }
}

/// Turn a non-success HTTP response into an error.
pub(crate) async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let retry_after = resp
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = resp.text().await.unwrap_or_default();
    Err(LlmError::from_status(
        status.as_u16(),
        &body,
        retry_after.as_deref(),
    ))
}

// ─────────────────────────────────────────────────────────────────────────────
// LLM Backend Trait
// ─────────────────────────────────────────────────────────────────────────────

/// A provider endpoint.
///
/// `complete` performs exactly one model turn. Image generation and speech
/// are optional; providers that lack them return `Unsupported`.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Provider name, e.g. `openai`.
    fn name(&self) -> &str;

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;

    async fn generate_image(&self, _request: ImageRequest) -> Result<ImageResponse> {
        Err(LlmError::unsupported(format!(
            "image generation with {}",
            self.name()
        )))
    }

    async fn speech(&self, _request: SpeechRequest) -> Result<SpeechResponse> {
        Err(LlmError::unsupported(format!("speech with {}", self.name())))
    }
}

/// A backend that can be shared across threads.
pub type SharedBackend = Arc<dyn LlmBackend>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retry_recovers_from_network_error() {
        let calls = AtomicU32::new(0);
        let out = with_retry(3, Duration::from_millis(1), "test", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(LlmError::Network("flaky".into()))
            } else {
                Ok(42)
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_stops_on_fatal_error() {
        let calls = AtomicU32::new(0);
        let err = with_retry(3, Duration::from_millis(1), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(LlmError::Auth("bad key".into()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, LlmError::Auth(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_gives_up() {
        let calls = AtomicU32::new(0);
        let err = with_retry(2, Duration::from_millis(1), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(LlmError::Network("down".into()))
        })
        .await
        .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_config_base_and_debug() {
        let cfg = BackendConfig::new().with_api_key("sk-secret");
        assert_eq!(cfg.base_or("https://x/v1/"), "https://x/v1");
        assert!(!format!("{cfg:?}").contains("sk-secret"));
        assert!(BackendConfig::new().with_api_key("").api_key.is_none());
    }
}
