//! Provider registry: provider name → backend factory.
//!
//! Providers are registered at startup; nothing in the agent core names a
//! provider directly.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::anthropic::AnthropicBackend;
use crate::backend::{BackendConfig, SharedBackend};
use crate::error::{LlmError, Result};
use crate::gemini::GeminiBackend;
use crate::openai::OpenAiBackend;

/// Builds a backend for one endpoint.
pub type BackendFactory = Arc<dyn Fn(BackendConfig) -> Result<SharedBackend> + Send + Sync>;

#[derive(Clone, Default)]
pub struct ProviderRegistry {
    factories: BTreeMap<String, BackendFactory>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers())
            .finish()
    }
}

impl ProviderRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `openai`, `anthropic` and `gemini`.
    pub fn standard() -> Self {
        Self::new()
            .with_provider("openai", |cfg| Ok(Arc::new(OpenAiBackend::new(cfg)?) as SharedBackend))
            .with_provider("anthropic", |cfg| {
                Ok(Arc::new(AnthropicBackend::new(cfg)?) as SharedBackend)
            })
            .with_provider("gemini", |cfg| Ok(Arc::new(GeminiBackend::new(cfg)?) as SharedBackend))
    }

    pub fn with_provider<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(BackendConfig) -> Result<SharedBackend> + Send + Sync + 'static,
    {
        self.register(name, factory);
        self
    }

    /// Add or replace a provider.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(BackendConfig) -> Result<SharedBackend> + Send + Sync + 'static,
    {
        self.factories
            .insert(name.into().to_lowercase(), Arc::new(factory));
    }

    /// Route every provider name to a single backend.
    pub fn with_fallback(mut self, names: &[&str], backend: SharedBackend) -> Self {
        for name in names {
            let b = backend.clone();
            self.register(*name, move |_| Ok(b.clone()));
        }
        self
    }

    pub fn contains(&self, provider: &str) -> bool {
        self.factories.contains_key(&provider.to_lowercase())
    }

    pub fn providers(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Build a backend; unknown providers are `Unsupported`.
    pub fn create(&self, provider: &str, config: BackendConfig) -> Result<SharedBackend> {
        let factory = self
            .factories
            .get(&provider.to_lowercase())
            .ok_or_else(|| LlmError::unsupported(format!("unknown provider: {provider}")))?;
        factory(config)
    }
}
