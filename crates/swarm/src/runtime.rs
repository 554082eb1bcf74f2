//! Wiring of stores, secrets and the swarm from the application config.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use swarm_agent::{Confirm, Deny, Limits, Swarm, Vars};
use swarm_config::{AppConfig, Assets, ChainSecretStore, FileStore, MapSecretStore, StandardStore};
use swarm_memory::{FileBlobStore, FileMemStore};
use swarm_shell::{Environment, Workspace};
use tracing::{debug, info};

use crate::commands::Context;
use crate::confirm::TerminalConfirm;

/// Caller identity: the configured user, else the login name.
pub fn user(config: &AppConfig) -> String {
    if !config.user.trim().is_empty() {
        return config.user.trim().to_string();
    }
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "me".to_string())
}

/// Everything one invocation needs.
pub struct Runtime {
    pub swarm: Swarm,
    pub vars: Arc<Vars>,
}

impl Runtime {
    pub fn new(ctx: &Context) -> Result<Self> {
        let config = &ctx.config;
        let base = config.base_dir();
        let assets = Assets::new()
            .with_store(Arc::new(FileStore::new(&base)))
            .with_store(Arc::new(StandardStore::new()));
        let plain: MapSecretStore = config
            .secrets
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let secrets = ChainSecretStore::standard(plain);

        let confirm: Arc<dyn Confirm> = if config.unattended || !console::user_attended_stderr() {
            Arc::new(Deny)
        } else {
            Arc::new(TerminalConfirm::new())
        };

        let mut builder = Swarm::builder(assets, Arc::new(secrets))
            .with_memory(Arc::new(FileMemStore::new(config.history_dir())))
            .with_blobs(Arc::new(FileBlobStore::new(config.blobs_dir())))
            .with_confirm(confirm)
            .with_limits(Limits {
                max_turns: config.max_turns,
                max_time: config.max_time,
                max_history: config.max_history,
                max_span: config.max_span,
            })
            .with_unsafe(config.unsafe_mode);
        if !config.model.trim().is_empty() {
            builder = builder.with_default_model(config.model.trim());
        }
        let swarm = builder.build();

        let workspace_dir = config.workspace_dir();
        let workspace = Workspace::new(&workspace_dir)
            .with_context(|| format!("cannot open workspace {}", workspace_dir.display()))?;
        let env = Environment::from_process();
        for (key, value) in &config.environment {
            env.set(key.clone(), value.clone());
        }
        let vars = Arc::new(Vars::new(ctx.user.clone(), env, Arc::new(workspace)));

        let cancel = vars.cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, cancelling request");
                cancel.cancel();
            }
        });

        debug!(
            base = %base.display(),
            workspace = %workspace_dir.display(),
            user = %ctx.user,
            unsafe_mode = config.unsafe_mode,
            "Runtime ready"
        );
        Ok(Self { swarm, vars })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_user_wins() {
        let config = AppConfig {
            user: " ada@example.com ".into(),
            ..Default::default()
        };
        assert_eq!(user(&config), "ada@example.com");
        assert!(!user(&AppConfig::default()).is_empty());
    }
}
