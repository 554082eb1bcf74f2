//! Pack lookup across an ordered list of asset stores.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{ConfigError, Result};
use crate::loader::{load_agents_data, load_models_data, load_tools_data, normalize_agent_names};
use crate::store::{AssetStore, DirEntry, StoreKind, TypedAssetStore};
use crate::types::{AgentsConfig, AssetSource, ModelConfig, ModelsConfig, ToolsConfig};

/// Name of the built-in dispatch agent used when a reference has no pack.
pub const DISPATCH_AGENT: &str = "agent";

fn is_yaml(name: &str) -> bool {
    name.ends_with(".yaml") || name.ends_with(".yml")
}

async fn read_yaml_dir(store: &dyn AssetStore, dir: &str) -> Result<Option<Vec<Vec<u8>>>> {
    let entries = match store.read_dir(dir).await {
        Ok(entries) => entries,
        Err(ConfigError::NotFound(_)) => return Ok(None),
        Err(e) => return Err(e),
    };
    let mut docs = Vec::new();
    for entry in entries.iter().filter(|e| !e.is_dir && is_yaml(&e.name)) {
        docs.push(store.read_file(&format!("{dir}/{}", entry.name)).await?);
    }
    if docs.is_empty() {
        return Ok(None);
    }
    Ok(Some(docs))
}

// ─────────────────────────────────────────────────────────────────────────────
// Standard store
// ─────────────────────────────────────────────────────────────────────────────

const STANDARD_FILES: &[(&str, &str)] = &[
    (
        "agents/agent/agent.yaml",
        include_str!("../resource/agents/agent/agent.yaml"),
    ),
    ("tools/sh/sh.yaml", include_str!("../resource/tools/sh.yaml")),
    ("tools/fs/fs.yaml", include_str!("../resource/tools/fs.yaml")),
    ("tools/web/web.yaml", include_str!("../resource/tools/web.yaml")),
];

/// Well-known providers and their environment fallbacks.
const ENV_MODELS: &[(&str, &str, &str)] = &[
    ("openai", "OPENAI_API_KEY", "gpt-5-nano"),
    ("gemini", "GEMINI_API_KEY", "gemini-2.0-flash-lite"),
    ("anthropic", "ANTHROPIC_API_KEY", "claude-3-5-haiku-latest"),
];

/// Model set for the first provider whose API key is in the environment.
///
/// The set is named `default` and maps every level to the same model. The
/// `api_key` is the lower-cased variable name, which the environment secret
/// store maps back.
pub fn env_default_models() -> Option<ModelsConfig> {
    ENV_MODELS.iter().find_map(|(provider, var, model)| {
        std::env::var(var).ok().filter(|v| !v.is_empty())?;
        let config = ModelConfig {
            model: model.to_string(),
            provider: provider.to_string(),
            base_url: String::new(),
            api_key: var.to_lowercase(),
        };
        let models = crate::types::MODEL_LEVELS
            .iter()
            .map(|l| (l.to_string(), config.clone()))
            .collect();
        Some(ModelsConfig {
            set: "default".into(),
            provider: provider.to_string(),
            base_url: String::new(),
            api_key: var.to_lowercase(),
            models,
        })
    })
}

/// Built-in packs compiled into the binary: the dispatch agent, the system
/// toolkits and the environment-derived `default` model set.
#[derive(Debug, Default, Clone)]
pub struct StandardStore;

impl StandardStore {
    pub fn new() -> Self {
        Self
    }

    fn file(name: &str) -> Option<&'static str> {
        STANDARD_FILES
            .iter()
            .find(|(path, _)| *path == name)
            .map(|(_, content)| *content)
    }

    fn docs(prefix: &str) -> Vec<&'static str> {
        STANDARD_FILES
            .iter()
            .filter(|(path, _)| path.starts_with(prefix))
            .map(|(_, content)| *content)
            .collect()
    }
}

#[async_trait]
impl AssetStore for StandardStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Typed
    }

    async fn read_dir(&self, name: &str) -> Result<Vec<DirEntry>> {
        let prefix = format!("{}/", name.trim_end_matches('/'));
        let mut entries: Vec<DirEntry> = Vec::new();
        for (path, _) in STANDARD_FILES {
            let Some(rest) = path.strip_prefix(&prefix) else {
                continue;
            };
            let (name, is_dir) = match rest.split_once('/') {
                Some((dir, _)) => (dir, true),
                None => (rest, false),
            };
            if !entries.iter().any(|e| e.name == name) {
                entries.push(DirEntry {
                    name: name.to_string(),
                    is_dir,
                });
            }
        }
        if entries.is_empty() {
            return Err(ConfigError::not_found(name.to_string()));
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        Self::file(name.trim_start_matches('/'))
            .map(|s| s.as_bytes().to_vec())
            .ok_or_else(|| ConfigError::not_found(name.to_string()))
    }

    fn as_typed(&self) -> Option<&dyn TypedAssetStore> {
        Some(self)
    }
}

#[async_trait]
impl TypedAssetStore for StandardStore {
    async fn retrieve_agent(&self, _owner: &str, pack: &str) -> Result<Option<AgentsConfig>> {
        let docs = Self::docs(&format!("agents/{pack}/"));
        if docs.is_empty() {
            return Ok(None);
        }
        let mut config = load_agents_data(&docs)?;
        normalize_agent_names(&mut config, pack);
        Ok(Some(config))
    }

    async fn list_agents(&self, owner: &str) -> Result<Vec<AgentsConfig>> {
        let mut packs = Vec::new();
        for entry in self.read_dir("agents").await? {
            if let Some(config) = self.retrieve_agent(owner, &entry.name).await? {
                packs.push(config);
            }
        }
        Ok(packs)
    }

    async fn retrieve_tool(&self, _owner: &str, kit: &str) -> Result<Option<ToolsConfig>> {
        let docs = Self::docs(&format!("tools/{kit}/"));
        if docs.is_empty() {
            return Ok(None);
        }
        load_tools_data(&docs).map(Some)
    }

    async fn retrieve_model(&self, _owner: &str, set: &str) -> Result<Option<ModelsConfig>> {
        if set == "default" {
            return Ok(env_default_models());
        }
        Ok(None)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Assets
// ─────────────────────────────────────────────────────────────────────────────

/// Ordered collection of asset stores; the first store holding a pack wins.
#[derive(Clone, Default)]
pub struct Assets {
    stores: Vec<Arc<dyn AssetStore>>,
}

impl std::fmt::Debug for Assets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds: Vec<StoreKind> = self.stores.iter().map(|s| s.kind()).collect();
        f.debug_struct("Assets").field("stores", &kinds).finish()
    }
}

impl Assets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assets backed by the built-in standard store only.
    pub fn standard() -> Self {
        Self::new().with_store(Arc::new(StandardStore::new()))
    }

    pub fn with_store(mut self, store: Arc<dyn AssetStore>) -> Self {
        self.stores.push(store);
        self
    }

    pub fn stores(&self) -> &[Arc<dyn AssetStore>] {
        &self.stores
    }

    /// Find and load the agent pack `pack` for `owner`.
    pub async fn search_agent(&self, owner: &str, pack: &str) -> Result<Option<AgentsConfig>> {
        let pack = pack.to_lowercase();
        for store in &self.stores {
            let dir = format!("agents/{pack}");
            let found = match store.as_typed() {
                Some(typed) => typed.retrieve_agent(owner, &pack).await?,
                None => match read_yaml_dir(store.as_ref(), &dir).await? {
                    Some(docs) => {
                        let mut config = load_agents_data(&docs)?;
                        normalize_agent_names(&mut config, &pack);
                        Some(config)
                    }
                    None => None,
                },
            };
            if let Some(mut config) = found {
                if config.source.is_none() {
                    config.source = Some(AssetSource::new(Arc::clone(store), dir));
                }
                debug!(pack = %pack, store = ?store.kind(), "Found agent pack");
                return Ok(Some(config));
            }
        }
        Ok(None)
    }

    /// Every agent pack visible to `owner`, keyed by pack name. Earlier
    /// stores shadow later ones.
    pub async fn list_agents(&self, owner: &str) -> Result<BTreeMap<String, AgentsConfig>> {
        let mut packs = BTreeMap::new();
        for store in self.stores.iter().rev() {
            let found = match store.as_typed() {
                Some(typed) => typed.list_agents(owner).await?,
                None => {
                    let entries = match store.read_dir("agents").await {
                        Ok(entries) => entries,
                        Err(ConfigError::NotFound(_)) => continue,
                        Err(e) => return Err(e),
                    };
                    let mut found = Vec::new();
                    for entry in entries.into_iter().filter(|e| e.is_dir) {
                        let dir = format!("agents/{}", entry.name);
                        let docs = match read_yaml_dir(store.as_ref(), &dir).await {
                            Ok(Some(docs)) => docs,
                            Ok(None) => continue,
                            Err(e) => {
                                warn!(pack = %entry.name, error = %e, "Skipping unreadable pack");
                                continue;
                            }
                        };
                        match load_agents_data(&docs) {
                            Ok(mut config) => {
                                normalize_agent_names(&mut config, &entry.name);
                                config.source = Some(AssetSource::new(Arc::clone(store), dir));
                                found.push(config);
                            }
                            Err(e) => {
                                warn!(pack = %entry.name, error = %e, "Skipping invalid pack")
                            }
                        }
                    }
                    found
                }
            };
            for config in found {
                packs.insert(config.name.clone(), config);
            }
        }
        Ok(packs)
    }

    /// Find and load the toolkit `kit`.
    pub async fn search_tool(&self, owner: &str, kit: &str) -> Result<Option<ToolsConfig>> {
        for store in &self.stores {
            let dir = format!("tools/{kit}");
            let found = match store.as_typed() {
                Some(typed) => typed.retrieve_tool(owner, kit).await?,
                None => match read_yaml_dir(store.as_ref(), &dir).await? {
                    Some(docs) => Some(load_tools_data(&docs)?),
                    None => None,
                },
            };
            if let Some(mut config) = found {
                if config.kit.is_empty() {
                    config.kit = kit.to_string();
                    for tool in &mut config.tools {
                        if tool.kit.is_empty() {
                            tool.kit = kit.to_string();
                        }
                    }
                }
                if config.source.is_none() {
                    config.source = Some(AssetSource::new(Arc::clone(store), dir));
                }
                return Ok(Some(config));
            }
        }
        Ok(None)
    }

    /// Names of every toolkit visible to `owner`, across all stores.
    pub async fn list_kits(&self, owner: &str) -> Result<BTreeSet<String>> {
        let mut kits = BTreeSet::new();
        for store in &self.stores {
            let entries = match store.read_dir("tools").await {
                Ok(entries) => entries,
                Err(ConfigError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            kits.extend(entries.into_iter().filter(|e| e.is_dir).map(|e| e.name));
        }
        debug!(owner = %owner, kits = kits.len(), "Listed toolkits");
        Ok(kits)
    }

    /// Find and load the model set `set`.
    pub async fn search_models(&self, owner: &str, set: &str) -> Result<Option<ModelsConfig>> {
        for store in &self.stores {
            let found = match store.as_typed() {
                Some(typed) => typed.retrieve_model(owner, set).await?,
                None => match read_yaml_dir(store.as_ref(), &format!("models/{set}")).await? {
                    Some(docs) => Some(load_models_data(&docs)?),
                    None => None,
                },
            };
            if let Some(mut config) = found {
                if config.set.is_empty() {
                    config.set = set.to_string();
                }
                return Ok(Some(config));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FileStore;
    use serial_test::serial;

    fn write(root: &std::path::Path, path: &str, content: &str) {
        let p = root.join(path);
        std::fs::create_dir_all(p.parent().unwrap()).unwrap();
        std::fs::write(p, content).unwrap();
    }

    #[tokio::test]
    async fn test_standard_store_dispatch_agent() {
        let assets = Assets::standard();
        let pack = assets.search_agent("me", DISPATCH_AGENT).await.unwrap().unwrap();
        assert_eq!(pack.name, "agent");
        assert!(pack.agent("agent").is_some());

        let sh = assets.search_tool("me", "sh").await.unwrap().unwrap();
        assert!(sh.tools.iter().any(|t| t.name == "exec"));
    }

    #[tokio::test]
    async fn test_file_store_shadows_standard() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "agents/agent/agent.yaml",
            "agents:\n  - name: agent\n    instruction: custom\n",
        );
        let assets = Assets::new()
            .with_store(Arc::new(FileStore::new(dir.path())))
            .with_store(Arc::new(StandardStore::new()));

        let pack = assets.search_agent("me", "agent").await.unwrap().unwrap();
        assert_eq!(
            pack.agent("agent").unwrap().instruction.as_ref().unwrap().content,
            "custom"
        );
        assert_eq!(pack.source.as_ref().unwrap().base_dir, "agents/agent");
    }

    #[tokio::test]
    async fn test_missing_pack() {
        let dir = tempfile::tempdir().unwrap();
        let assets = Assets::new().with_store(Arc::new(FileStore::new(dir.path())));
        assert!(assets.search_agent("me", "nope").await.unwrap().is_none());
        assert!(assets.search_tool("me", "nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_agents() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "agents/echo/agent.yaml", "agents:\n  - name: echo\n");
        write(dir.path(), "agents/root/agent.yaml", "agents:\n  - name: root\n");
        let assets = Assets::new()
            .with_store(Arc::new(FileStore::new(dir.path())))
            .with_store(Arc::new(StandardStore::new()));

        let packs = assets.list_agents("me").await.unwrap();
        let names: Vec<_> = packs.keys().cloned().collect();
        assert_eq!(names, vec!["agent", "echo", "root"]);
    }

    #[tokio::test]
    async fn test_list_kits_across_stores() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "tools/text/text.yaml", "kit: text\ntools:\n  - name: upper\n");
        let assets = Assets::new()
            .with_store(Arc::new(FileStore::new(dir.path())))
            .with_store(Arc::new(StandardStore::new()));

        let kits = assets.list_kits("me").await.unwrap();
        assert!(kits.contains("text"));
        assert!(kits.contains("sh"));
        assert!(kits.contains("fs"));
    }

    #[tokio::test]
    async fn test_models_from_files() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "models/fast/models.yaml",
            "provider: openai\napi_key: openai_api_key\nmodels:\n  L1: {model: gpt-5-nano}\n",
        );
        let assets = Assets::new().with_store(Arc::new(FileStore::new(dir.path())));
        let set = assets.search_models("me", "fast").await.unwrap().unwrap();
        assert_eq!(set.set, "fast");
        assert_eq!(set.model("any").unwrap().model, "gpt-5-nano");
    }

    #[test]
    #[serial]
    fn test_env_default_models() {
        // SAFETY: serialized with other environment-mutating tests
        unsafe {
            std::env::remove_var("OPENAI_API_KEY");
            std::env::set_var("GEMINI_API_KEY", "g");
        }
        let set = env_default_models().unwrap();
        let model = set.model("L2").unwrap();
        assert_eq!(model.provider, "gemini");
        assert_eq!(model.model, "gemini-2.0-flash-lite");
        assert_eq!(model.api_key, "gemini_api_key");
        unsafe {
            std::env::remove_var("GEMINI_API_KEY");
        }
    }
}
