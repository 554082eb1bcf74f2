//! Application configuration and config file discovery.
//!
//! Resolution order (later overrides earlier):
//! 1. `<base>/config.toml` (default base `~/.ai`)
//! 2. `./ai.toml` (project-local)
//! 3. CLI arguments and `AI_*` environment variables (handled by the binary)
//!
//! ```toml
//! workspace = "/home/me/.ai/workspace"
//! user = "me@example.com"
//! model = "default/any"
//! unattended = false
//! max_turns = 8
//!
//! [secrets]
//! openai_api_key = "sk-..."
//!
//! [environment]
//! LANG = "en_US.UTF-8"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, Result};

/// Application directory under the home directory.
const APP_DIR: &str = ".ai";

/// Config filename inside the base directory.
const USER_CONFIG_FILE: &str = "config.toml";

/// Project-local config filename.
const PROJECT_CONFIG_FILE: &str = "ai.toml";

/// Runtime settings for the `ai` command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Asset root holding `agents/`, `tools/` and `models/`.
    pub base: Option<PathBuf>,

    /// Workspace root; history and blobs live underneath.
    pub workspace: Option<PathBuf>,

    /// Caller identity, used as the default owner of agent references.
    pub user: String,

    /// Default model alias, `[set/]level`.
    pub model: String,

    /// Skip the command safety check.
    #[serde(rename = "unsafe")]
    pub unsafe_mode: bool,

    /// Never prompt; unsafe commands are denied.
    pub unattended: bool,

    pub max_turns: i64,
    pub max_time: i64,
    pub max_history: i64,
    pub max_span: i64,

    pub log_level: String,

    /// Plaintext secrets, the last resort of the secret chain.
    pub secrets: BTreeMap<String, String>,

    /// Extra variables for the request-scoped environment.
    pub environment: BTreeMap<String, String>,
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_toml(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Overlay `other` on top of `self`; set values in `other` win.
    pub fn merge(&mut self, other: AppConfig) {
        if other.base.is_some() {
            self.base = other.base;
        }
        if other.workspace.is_some() {
            self.workspace = other.workspace;
        }
        let set = |dst: &mut String, src: String| {
            if !src.is_empty() {
                *dst = src;
            }
        };
        set(&mut self.user, other.user);
        set(&mut self.model, other.model);
        set(&mut self.log_level, other.log_level);
        self.unsafe_mode |= other.unsafe_mode;
        self.unattended |= other.unattended;
        for (dst, src) in [
            (&mut self.max_turns, other.max_turns),
            (&mut self.max_time, other.max_time),
            (&mut self.max_history, other.max_history),
            (&mut self.max_span, other.max_span),
        ] {
            if src != 0 {
                *dst = src;
            }
        }
        self.secrets.extend(other.secrets);
        self.environment.extend(other.environment);
    }

    /// Asset root, defaulting to `~/.ai`.
    pub fn base_dir(&self) -> PathBuf {
        self.base.clone().unwrap_or_else(default_base_dir)
    }

    /// Workspace root, defaulting to `<base>/workspace`.
    pub fn workspace_dir(&self) -> PathBuf {
        self.workspace
            .clone()
            .unwrap_or_else(|| self.base_dir().join("workspace"))
    }

    /// Directory holding conversation history.
    pub fn history_dir(&self) -> PathBuf {
        self.workspace_dir().join("history")
    }

    /// Directory holding stored blobs.
    pub fn blobs_dir(&self) -> PathBuf {
        self.workspace_dir().join("blobs")
    }

    /// Directory holding rolling log files.
    pub fn logs_dir(&self) -> PathBuf {
        self.workspace_dir().join("logs")
    }
}

/// `~/.ai`, or `./.ai` when there is no home directory.
pub fn default_base_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from(APP_DIR))
}

/// Where a config layer was looked for.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    pub path: PathBuf,
    pub loaded: bool,
}

/// Result of config discovery.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: AppConfig,
    /// Checked sources, lowest precedence first.
    pub sources: Vec<ConfigSource>,
    pub warnings: Vec<String>,
}

impl LoadedConfig {
    pub fn loaded_from(&self) -> Vec<&Path> {
        self.sources
            .iter()
            .filter(|s| s.loaded)
            .map(|s| s.path.as_path())
            .collect()
    }
}

/// Load a single config file.
pub fn load_config_file(path: &Path) -> Result<AppConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::read_file(path.display().to_string(), e))?;
    AppConfig::from_toml(&contents)
}

/// Discover and merge config layers.
///
/// An `explicit` path must exist and replaces the user config layer.
pub fn load_config(
    explicit: Option<&Path>,
    base: Option<&Path>,
    project_dir: Option<&Path>,
) -> Result<LoadedConfig> {
    let mut config = AppConfig::new();
    let mut sources = Vec::new();
    let mut warnings = Vec::new();

    match explicit {
        Some(path) => {
            config.merge(load_config_file(path)?);
            sources.push(ConfigSource {
                path: path.to_path_buf(),
                loaded: true,
            });
        }
        None => {
            let base = base.map(Path::to_path_buf).unwrap_or_else(default_base_dir);
            sources.push(load_layer(&mut config, &base.join(USER_CONFIG_FILE))?);
        }
    }

    let project = project_dir
        .map(|d| d.join(PROJECT_CONFIG_FILE))
        .unwrap_or_else(|| PathBuf::from(PROJECT_CONFIG_FILE));
    sources.push(load_layer(&mut config, &project)?);

    if !config.secrets.is_empty() {
        let msg = format!(
            "{} secret(s) stored in plaintext config; prefer environment variables",
            config.secrets.len()
        );
        warn!("{msg}");
        warnings.push(msg);
    }

    Ok(LoadedConfig {
        config,
        sources,
        warnings,
    })
}

fn load_layer(config: &mut AppConfig, path: &Path) -> Result<ConfigSource> {
    if !path.exists() {
        return Ok(ConfigSource {
            path: path.to_path_buf(),
            loaded: false,
        });
    }
    config.merge(load_config_file(path)?);
    Ok(ConfigSource {
        path: path.to_path_buf(),
        loaded: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_toml() {
        let cfg = AppConfig::from_toml(
            r#"
user = "me@example.com"
unsafe = true
max_turns = 12

[environment]
LANG = "C"
"#,
        )
        .unwrap();
        assert_eq!(cfg.user, "me@example.com");
        assert!(cfg.unsafe_mode);
        assert_eq!(cfg.max_turns, 12);
        assert_eq!(cfg.environment["LANG"], "C");
    }

    #[test]
    fn test_bad_toml_is_bad_request() {
        let err = AppConfig::from_toml("user = ").unwrap_err();
        assert_eq!(err.kind(), swarm_types::ErrorKind::BadRequest);
    }

    #[test]
    fn test_layering() {
        let base = tempfile::tempdir().unwrap();
        let project = tempfile::tempdir().unwrap();
        std::fs::write(
            base.path().join("config.toml"),
            "user = \"a\"\nmax_turns = 3\nmodel = \"fast/L1\"\n",
        )
        .unwrap();
        std::fs::write(project.path().join("ai.toml"), "user = \"b\"\n").unwrap();

        let loaded = load_config(None, Some(base.path()), Some(project.path())).unwrap();
        assert_eq!(loaded.config.user, "b");
        assert_eq!(loaded.config.max_turns, 3);
        assert_eq!(loaded.config.model, "fast/L1");
        assert_eq!(loaded.loaded_from().len(), 2);
    }

    #[test]
    fn test_explicit_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(Some(&dir.path().join("nope.toml")), None, Some(dir.path()))
            .unwrap_err();
        assert_eq!(err.kind(), swarm_types::ErrorKind::NotFound);
    }

    #[test]
    fn test_default_dirs() {
        let cfg = AppConfig {
            base: Some(PathBuf::from("/x")),
            ..Default::default()
        };
        assert_eq!(cfg.workspace_dir(), PathBuf::from("/x/workspace"));
        assert_eq!(cfg.history_dir(), PathBuf::from("/x/workspace/history"));
    }
}
