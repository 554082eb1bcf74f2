//! Config discovery and asset lookup against real directories.

use std::sync::Arc;

use swarm_config::{Assets, ConfigError, FileStore, load_config};
use tempfile::TempDir;

fn write(dir: &TempDir, name: &str, contents: &str) {
    let path = dir.path().join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, contents).unwrap();
}

#[test]
fn test_project_layer_overrides_user_layer() {
    let base = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    write(
        &base,
        "config.toml",
        "user = \"ada\"\nmodel = \"default/l1\"\nmax_turns = 4\n\n[environment]\nA = \"1\"\nB = \"1\"\n",
    );
    write(
        &project,
        "ai.toml",
        "model = \"openai/l2\"\n\n[environment]\nB = \"2\"\n",
    );

    let loaded = load_config(None, Some(base.path()), Some(project.path())).unwrap();
    let config = &loaded.config;
    assert_eq!(config.user, "ada");
    assert_eq!(config.model, "openai/l2");
    assert_eq!(config.max_turns, 4);
    assert_eq!(config.environment["A"], "1");
    assert_eq!(config.environment["B"], "2");
    assert_eq!(loaded.sources.len(), 2);
    assert_eq!(
        loaded.loaded_from(),
        vec![
            base.path().join("config.toml").as_path(),
            project.path().join("ai.toml").as_path()
        ]
    );
    assert!(loaded.warnings.is_empty());
}

#[test]
fn test_missing_layers_are_skipped() {
    let base = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();

    let loaded = load_config(None, Some(base.path()), Some(project.path())).unwrap();
    assert!(loaded.loaded_from().is_empty());
    assert_eq!(loaded.config.workspace_dir(), base.path().join("workspace").as_path());
}

#[test]
fn test_explicit_file_must_exist() {
    let project = TempDir::new().unwrap();
    let missing = project.path().join("nope.toml");

    let err = load_config(Some(&missing), None, Some(project.path())).unwrap_err();
    assert!(matches!(err, ConfigError::NotFound(_)));
}

#[test]
fn test_plaintext_secrets_warn() {
    let base = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    write(&base, "config.toml", "[secrets]\nopenai_api_key = \"sk-test\"\n");

    let loaded = load_config(None, Some(base.path()), Some(project.path())).unwrap();
    assert_eq!(loaded.config.secrets["openai_api_key"], "sk-test");
    assert_eq!(loaded.warnings.len(), 1);
    assert!(loaded.warnings[0].contains("plaintext"));
}

#[test]
fn test_malformed_toml_is_an_error() {
    let base = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    write(&project, "ai.toml", "max_turns = \"many\"\n");

    assert!(load_config(None, Some(base.path()), Some(project.path())).is_err());
}

#[tokio::test]
async fn test_pack_documents_merge_from_directory() {
    let base = TempDir::new().unwrap();
    write(
        &base,
        "agents/notes/agent.yaml",
        "pack: notes\nmodel: default/l1\nagents:\n  - name: notes\n    instruction:\n      content: Take notes.\n",
    );
    write(
        &base,
        "agents/notes/extra.yaml",
        "agents:\n  - name: summary\n    description: Summarize notes.\n    instruction:\n      content: Summarize.\n",
    );

    let assets = Assets::new().with_store(Arc::new(FileStore::new(base.path())));
    let pack = assets.search_agent("ada", "Notes").await.unwrap().unwrap();
    assert_eq!(pack.name, "notes");
    assert_eq!(pack.agents.len(), 2);
    assert!(pack.source.is_some());

    let all = assets.list_agents("ada").await.unwrap();
    assert_eq!(all.keys().collect::<Vec<_>>(), vec!["notes"]);
    assert!(assets.search_agent("ada", "other").await.unwrap().is_none());
}

#[tokio::test]
async fn test_earlier_store_shadows_later_one() {
    let user = TempDir::new().unwrap();
    write(
        &user,
        "agents/agent/agent.yaml",
        "pack: agent\nagents:\n  - name: agent\n    description: Local dispatcher.\n    instruction:\n      content: Local.\n",
    );

    let assets = Assets::standard();
    let assets = Assets::new()
        .with_store(Arc::new(FileStore::new(user.path())))
        .with_store(Arc::clone(&assets.stores()[0]));

    let all = assets.list_agents("ada").await.unwrap();
    assert_eq!(all["agent"].agents[0].description, "Local dispatcher.");
}
