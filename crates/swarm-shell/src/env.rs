//! Request-scoped environment.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

/// Process variables an agent run may see; everything else is dropped.
pub const ENV_WHITELIST: &[&str] = &["PATH", "PWD", "HOME", "USER", "SHELL", "GOPATH"];

/// Environment shared by the shell, templates and tools of one request.
///
/// Cloning shares the underlying map. Use [`Environment::snapshot`] for an
/// independent copy.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    vars: Arc<RwLock<BTreeMap<String, String>>>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture the whitelisted subset of the process environment.
    pub fn from_process() -> Self {
        let env = Self::new();
        for key in ENV_WHITELIST {
            if let Ok(v) = std::env::var(key) {
                env.set(*key, v);
            }
        }
        env
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.vars.read().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars.read().contains_key(key)
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.write().insert(key.into(), value.into());
    }

    pub fn unset(&self, key: &str) {
        self.vars.write().remove(key);
    }

    pub fn extend<I, K, V>(&self, iter: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut vars = self.vars.write();
        for (k, v) in iter {
            vars.insert(k.into(), v.into());
        }
    }

    /// Copy of every variable, sorted by name.
    pub fn all(&self) -> BTreeMap<String, String> {
        self.vars.read().clone()
    }

    /// `K=V` lines sorted by key.
    pub fn lines(&self) -> String {
        self.vars
            .read()
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Independent copy that no longer shares state with `self`.
    pub fn snapshot(&self) -> Self {
        Self {
            vars: Arc::new(RwLock::new(self.all())),
        }
    }

    /// `true` when `key` is set to a truthy value.
    pub fn is_true(&self, key: &str) -> bool {
        self.get(key)
            .is_some_and(|v| matches!(v.as_str(), "true" | "1" | "yes"))
    }
}
