//! Read-only asset stores holding agent, tool and model packs.
//!
//! Every store speaks the minimal file contract (`read_dir`, `read_file`,
//! `resolve`). Stores that can answer typed queries directly expose them
//! through [`AssetStore::as_typed`].
//!
//! Layout:
//! ```text
//! <root>/agents/<pack>/*.yaml
//! <root>/tools/<kit>/*.yaml
//! <root>/models/<set>/*.yaml
//! ```

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::{ConfigError, Result};
use crate::types::{AgentsConfig, ModelsConfig, ToolsConfig};

/// Variant of an asset store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Filesystem,
    Typed,
    Web,
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DirEntry {
    pub name: String,
    #[serde(default)]
    pub is_dir: bool,
}

/// Read-only lookup of pack files.
#[async_trait]
pub trait AssetStore: Send + Sync {
    fn kind(&self) -> StoreKind;

    /// List the entries of a directory, sorted by name.
    async fn read_dir(&self, name: &str) -> Result<Vec<DirEntry>>;

    async fn read_file(&self, name: &str) -> Result<Vec<u8>>;

    /// Join `name` onto `parent`, normalizing `.` and `..`.
    fn resolve(&self, parent: &str, name: &str) -> String {
        join_clean(parent, name)
    }

    /// Typed lookups, if this store supports them.
    fn as_typed(&self) -> Option<&dyn TypedAssetStore> {
        None
    }
}

/// Stores that return parsed configs rather than raw files.
#[async_trait]
pub trait TypedAssetStore: Send + Sync {
    async fn retrieve_agent(&self, owner: &str, pack: &str) -> Result<Option<AgentsConfig>>;

    async fn list_agents(&self, owner: &str) -> Result<Vec<AgentsConfig>>;

    async fn retrieve_tool(&self, owner: &str, kit: &str) -> Result<Option<ToolsConfig>>;

    async fn retrieve_model(&self, owner: &str, set: &str) -> Result<Option<ModelsConfig>>;
}

/// Join two slash-separated paths and collapse `.`/`..`.
///
/// Leading `..` that would climb above the root are dropped.
pub fn join_clean(parent: &str, name: &str) -> String {
    let joined = if name.starts_with('/') || parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    };
    let mut parts: Vec<&str> = Vec::new();
    for part in joined.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            p => parts.push(p),
        }
    }
    parts.join("/")
}

// ─────────────────────────────────────────────────────────────────────────────
// Filesystem store
// ─────────────────────────────────────────────────────────────────────────────

/// Asset store over a local directory tree.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, name: &str) -> Result<PathBuf> {
        let rel = Path::new(name.trim_start_matches('/'));
        if rel.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(ConfigError::invalid(format!("path escapes asset root: {name}")));
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl AssetStore for FileStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Filesystem
    }

    async fn read_dir(&self, name: &str) -> Result<Vec<DirEntry>> {
        let path = self.path(name)?;
        let mut rd = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| ConfigError::read_file(path.display().to_string(), e))?;
        let mut entries = Vec::new();
        while let Some(entry) = rd
            .next_entry()
            .await
            .map_err(|e| ConfigError::read_file(path.display().to_string(), e))?
        {
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.path(name)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| ConfigError::read_file(path.display().to_string(), e))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Web store
// ─────────────────────────────────────────────────────────────────────────────

/// Asset store served over HTTP.
///
/// Files are fetched with `GET <base>/<name>`. Directory listings are
/// `GET <base>/<name>/` returning a JSON array of names or `{name, is_dir}`
/// objects.
#[derive(Debug, Clone)]
pub struct WebStore {
    base: url::Url,
    token: Option<String>,
    client: reqwest::Client,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ListingEntry {
    Name(String),
    Entry(DirEntry),
}

impl WebStore {
    pub fn new(base: &str) -> Result<Self> {
        let base = if base.ends_with('/') {
            base.to_string()
        } else {
            format!("{base}/")
        };
        let base = url::Url::parse(&base)
            .map_err(|e| ConfigError::invalid(format!("invalid asset url {base}: {e}")))?;
        Ok(Self {
            base,
            token: None,
            client: reqwest::Client::new(),
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    async fn get(&self, name: &str) -> Result<reqwest::Response> {
        let url = self
            .base
            .join(name.trim_start_matches('/'))
            .map_err(|e| ConfigError::invalid(format!("invalid asset path {name}: {e}")))?;
        debug!(url = %url, "Fetching asset");
        let mut req = self.client.get(url);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ConfigError::not_found(name.to_string()));
        }
        Ok(resp.error_for_status()?)
    }
}

#[async_trait]
impl AssetStore for WebStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Web
    }

    async fn read_dir(&self, name: &str) -> Result<Vec<DirEntry>> {
        let dir = format!("{}/", name.trim_end_matches('/'));
        let listing: Vec<ListingEntry> = self.get(&dir).await?.json().await?;
        let mut entries: Vec<DirEntry> = listing
            .into_iter()
            .map(|e| match e {
                ListingEntry::Name(name) => DirEntry {
                    is_dir: name.ends_with('/'),
                    name: name.trim_end_matches('/').to_string(),
                },
                ListingEntry::Entry(entry) => entry,
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        Ok(self.get(name).await?.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_clean() {
        assert_eq!(join_clean("agents/ask", "templates/a.tpl"), "agents/ask/templates/a.tpl");
        assert_eq!(join_clean("agents/ask", "../shared/x.md"), "agents/shared/x.md");
        assert_eq!(join_clean("agents/ask", "/abs/x.md"), "abs/x.md");
        assert_eq!(join_clean("", "../../x"), "x");
    }

    #[tokio::test]
    async fn test_file_store() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("agents/ask")).unwrap();
        std::fs::write(dir.path().join("agents/ask/b.yaml"), "b").unwrap();
        std::fs::write(dir.path().join("agents/ask/a.yaml"), "a").unwrap();

        let store = FileStore::new(dir.path());
        let names: Vec<_> = store
            .read_dir("agents/ask")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["a.yaml", "b.yaml"]);
        assert_eq!(store.read_file("agents/ask/a.yaml").await.unwrap(), b"a");

        let err = store.read_file("agents/missing.yaml").await.unwrap_err();
        assert_eq!(err.kind(), swarm_types::ErrorKind::NotFound);
        assert!(store.read_file("../etc/passwd").await.is_err());
    }

    #[tokio::test]
    async fn test_web_store() {
        use wiremock::matchers::{header, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/assets/agents/ask/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                "z.yaml",
                {"name": "a.yaml"}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/assets/agents/ask/a.yaml"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_string("pack: ask"))
            .mount(&server)
            .await;

        let store = WebStore::new(&format!("{}/assets", server.uri()))
            .unwrap()
            .with_token("tok");
        let entries = store.read_dir("agents/ask").await.unwrap();
        assert_eq!(entries[0].name, "a.yaml");
        assert_eq!(entries[1].name, "z.yaml");
        assert_eq!(store.read_file("agents/ask/a.yaml").await.unwrap(), b"pack: ask");

        let err = store.read_file("agents/none.yaml").await.unwrap_err();
        assert_eq!(err.kind(), swarm_types::ErrorKind::NotFound);
    }
}
