//! Pack configuration for the swarm agent runtime.
//!
//! Provides:
//! - Asset stores (filesystem, web, built-in standard store) with typed
//!   lookups for agent, tool and model packs
//! - YAML loading with deep merge and slice append across documents
//! - Secret resolution (keyring → env var → config file)
//! - TOML application config with layered discovery

pub mod app;
pub mod assets;
pub mod error;
pub mod loader;
pub mod secrets;
pub mod store;
pub mod types;

pub use app::{AppConfig, ConfigSource, LoadedConfig, default_base_dir, load_config, load_config_file};
pub use assets::{Assets, DISPATCH_AGENT, StandardStore, env_default_models};
pub use error::{ConfigError, Result};
pub use loader::{
    load_agents_data, load_models_data, load_tools_data, merge_documents, merge_yaml,
    normalize_agent_names, resolve_content,
};
pub use secrets::{
    ChainSecretStore, EnvSecretStore, KeyringSecretStore, MapSecretStore, ResolvedSecret,
    SecretSource, SecretStore, SharedSecretStore,
};
pub use store::{AssetStore, DirEntry, FileStore, StoreKind, TypedAssetStore, WebStore, join_clean};
pub use types::*;
