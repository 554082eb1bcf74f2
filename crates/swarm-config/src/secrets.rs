//! Secret lookup: API keys and tokens referenced by name from packs.
//!
//! Resolution order when chained:
//! 1. System keyring (if `keyring` feature enabled)
//! 2. Environment variable (`openai_api_key` → `OPENAI_API_KEY`)
//! 3. Explicit values from the application config
//!
//! Keyring entries are stored as service="swarm", user="<owner>:<key>".

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{ConfigError, Result};

/// Keyring service name.
pub const SERVICE_NAME: &str = "swarm";

/// Where a secret was resolved from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretSource {
    Keyring,
    EnvVar(String),
    ConfigFile,
}

impl std::fmt::Display for SecretSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecretSource::Keyring => write!(f, "system keyring"),
            SecretSource::EnvVar(var) => write!(f, "env var {var}"),
            SecretSource::ConfigFile => write!(f, "config file (plaintext)"),
        }
    }
}

/// A secret value with its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSecret {
    pub value: String,
    pub source: SecretSource,
}

/// Key → secret lookup scoped by owner.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn resolve(&self, owner: &str, key: &str) -> Result<ResolvedSecret>;

    /// The secret value; missing secrets are `SecretNotFound`.
    async fn get(&self, owner: &str, key: &str) -> Result<String> {
        Ok(self.resolve(owner, key).await?.value)
    }
}

pub type SharedSecretStore = Arc<dyn SecretStore>;

fn not_found(owner: &str, key: &str) -> ConfigError {
    ConfigError::SecretNotFound {
        owner: owner.to_string(),
        key: key.to_string(),
    }
}

/// Environment variable name for a secret key.
pub fn env_var_name(key: &str) -> String {
    key.trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Environment
// ─────────────────────────────────────────────────────────────────────────────

/// Secrets from process environment variables.
#[derive(Debug, Clone, Default)]
pub struct EnvSecretStore;

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn resolve(&self, owner: &str, key: &str) -> Result<ResolvedSecret> {
        let var = env_var_name(key);
        match std::env::var(&var) {
            Ok(value) if !value.is_empty() => Ok(ResolvedSecret {
                value,
                source: SecretSource::EnvVar(var),
            }),
            _ => Err(not_found(owner, key)),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Static map
// ─────────────────────────────────────────────────────────────────────────────

/// Secrets held in memory, typically from the application config.
#[derive(Debug, Clone, Default)]
pub struct MapSecretStore {
    secrets: HashMap<String, String>,
}

impl MapSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(key.into(), value.into());
        self
    }
}

impl FromIterator<(String, String)> for MapSecretStore {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            secrets: iter.into_iter().collect(),
        }
    }
}

#[async_trait]
impl SecretStore for MapSecretStore {
    async fn resolve(&self, owner: &str, key: &str) -> Result<ResolvedSecret> {
        self.secrets
            .get(key)
            .filter(|v| !v.is_empty())
            .map(|value| ResolvedSecret {
                value: value.clone(),
                source: SecretSource::ConfigFile,
            })
            .ok_or_else(|| not_found(owner, key))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Keyring
// ─────────────────────────────────────────────────────────────────────────────

/// Secrets from the OS keyring.
#[derive(Debug, Clone, Default)]
pub struct KeyringSecretStore;

#[async_trait]
impl SecretStore for KeyringSecretStore {
    async fn resolve(&self, owner: &str, key: &str) -> Result<ResolvedSecret> {
        get_from_keyring(owner, key)
            .map(|value| ResolvedSecret {
                value,
                source: SecretSource::Keyring,
            })
            .ok_or_else(|| not_found(owner, key))
    }
}

#[cfg(feature = "keyring")]
fn get_from_keyring(owner: &str, key: &str) -> Option<String> {
    // keep tests isolated from local machine state
    if cfg!(test) {
        return None;
    }
    let entry = keyring::Entry::new(SERVICE_NAME, &format!("{owner}:{key}")).ok()?;
    entry.get_password().ok().filter(|v| !v.is_empty())
}

#[cfg(not(feature = "keyring"))]
fn get_from_keyring(_owner: &str, _key: &str) -> Option<String> {
    None
}

// ─────────────────────────────────────────────────────────────────────────────
// Chain
// ─────────────────────────────────────────────────────────────────────────────

/// Try each store in order; the first hit wins.
#[derive(Clone, Default)]
pub struct ChainSecretStore {
    stores: Vec<SharedSecretStore>,
}

impl ChainSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keyring, then environment, then `config` values.
    pub fn standard(config: MapSecretStore) -> Self {
        Self::new()
            .with_store(Arc::new(KeyringSecretStore))
            .with_store(Arc::new(EnvSecretStore))
            .with_store(Arc::new(config))
    }

    pub fn with_store(mut self, store: SharedSecretStore) -> Self {
        self.stores.push(store);
        self
    }
}

#[async_trait]
impl SecretStore for ChainSecretStore {
    async fn resolve(&self, owner: &str, key: &str) -> Result<ResolvedSecret> {
        for store in &self.stores {
            match store.resolve(owner, key).await {
                Ok(secret) => {
                    debug!(key = %key, source = %secret.source, "Resolved secret");
                    return Ok(secret);
                }
                Err(ConfigError::SecretNotFound { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(not_found(owner, key))
    }
}
