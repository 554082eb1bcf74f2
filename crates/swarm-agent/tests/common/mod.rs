//! Common test utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use swarm_agent::{NativeFn, Request, Response, Result, Swarm, SwarmBuilder, ToolOutput, Vars};
use swarm_config::{Assets, FileStore, MapSecretStore, StandardStore};
use swarm_llm::{CompletionResponse, MockBackend, ProviderRegistry};
use swarm_memory::{InMemoryMemStore, MemoryBlobStore};
use swarm_shell::{Environment, Workspace};
use swarm_types::ArgMap;
use tempfile::TempDir;

pub const USER: &str = "tester@example.com";

const MODELS: &[(&str, &str)] = &[
    (
        "models/default/models.yaml",
        "set: default\nprovider: openai\nmodels:\n  L1:\n    model: gpt-l1\n  L2:\n    model: gpt-l2\n",
    ),
    (
        "models/openai/models.yaml",
        "set: openai\nprovider: openai\nmodels:\n  L1:\n    model: gpt-l1\n  L2:\n    model: gpt-l2\n",
    ),
];

pub fn write(root: &Path, path: &str, content: &str) {
    let p = root.join(path);
    std::fs::create_dir_all(p.parent().unwrap()).unwrap();
    std::fs::write(p, content).unwrap();
}

/// A native func tool from a synchronous closure.
pub fn native<F>(f: F) -> NativeFn
where
    F: Fn(ArgMap) -> Result<ToolOutput> + Send + Sync + 'static,
{
    Arc::new(move |args: ArgMap| -> BoxFuture<'static, Result<ToolOutput>> {
        let out = f(args);
        async move { out }.boxed()
    })
}

/// A native func tool from an async closure.
pub fn native_async<F, Fut>(f: F) -> NativeFn
where
    F: Fn(ArgMap) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ToolOutput>> + Send + 'static,
{
    Arc::new(move |args: ArgMap| -> BoxFuture<'static, Result<ToolOutput>> { f(args).boxed() })
}

/// A runtime over packs written to a temp directory, with every provider
/// routed to one mock backend.
pub struct Harness {
    pub dir: TempDir,
    pub mock: Arc<MockBackend>,
    pub memory: Arc<InMemoryMemStore>,
    pub blobs: Arc<MemoryBlobStore>,
    pub swarm: Swarm,
}

impl Harness {
    pub fn new(files: &[(&str, &str)], mock: MockBackend) -> Self {
        Self::with(files, mock, |b| b)
    }

    pub fn with(
        files: &[(&str, &str)],
        mock: MockBackend,
        configure: impl FnOnce(SwarmBuilder) -> SwarmBuilder,
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let packs = dir.path().join("packs");
        for (path, content) in MODELS.iter().chain(files) {
            write(&packs, path, content);
        }

        let mock = Arc::new(mock);
        let memory = Arc::new(InMemoryMemStore::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let assets = Assets::new()
            .with_store(Arc::new(FileStore::new(&packs)))
            .with_store(Arc::new(StandardStore::new()));
        let secrets = MapSecretStore::new().with_secret("openai_api_key", "sk-test");

        let builder = Swarm::builder(assets, Arc::new(secrets))
            .with_providers(
                ProviderRegistry::new().with_fallback(&["openai", "anthropic", "gemini"], mock.clone()),
            )
            .with_memory(memory.clone())
            .with_blobs(blobs.clone())
            .with_default_model("default/any")
            .with_unsafe(true);
        let swarm = configure(builder).build();

        Self {
            dir,
            mock,
            memory,
            blobs,
            swarm,
        }
    }

    pub fn vars(&self) -> Arc<Vars> {
        let ws = Workspace::new(self.dir.path().join("workspace")).unwrap();
        Arc::new(Vars::new(USER, Environment::new(), Arc::new(ws)))
    }

    pub async fn run(&self, agent: &str, query: &str) -> Result<Response> {
        self.swarm.run(Request::new(agent, query), self.vars()).await
    }

    pub async fn run_with(&self, req: Request, vars: Arc<Vars>) -> Result<Response> {
        self.swarm.run(req, vars).await
    }
}

pub fn text(s: &str) -> CompletionResponse {
    CompletionResponse::text(s)
}
