//! The request orchestrator.
//!
//! [`Swarm::run`] resolves the requested agent, serves the middleware chain
//! under the agent's time limit and follows transfers until an agent
//! answers with a final result.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use swarm_config::{Assets, SharedSecretStore, split_model_ref};
use swarm_llm::{BackendConfig, ProviderRegistry};
use swarm_memory::{BlobStore, InMemoryMemStore, MemStore, MemoryBlobStore};
use swarm_types::{AgentRef, Message};
use tracing::{Instrument, debug, info, info_span, warn};

use crate::adapter::{Adapter, AdapterRegistry};
use crate::agent::{HARD_MAX_TURNS, Limits, Request, Response};
use crate::error::{AgentError, Result};
use crate::guard::{Confirm, Deny, Guard};
use crate::middleware::{Chain, RunContext};
use crate::resolver::Resolver;
use crate::toolkit::{FuncKit, McpPool, NativeFn, ToolKit, ToolSystem};
use crate::vars::Vars;

struct SwarmInner {
    resolver: Resolver,
    tools: ToolSystem,
    adapters: AdapterRegistry,
    providers: ProviderRegistry,
    memory: Arc<dyn MemStore>,
    blobs: Arc<dyn BlobStore>,
    secrets: SharedSecretStore,
    chain: Chain,
    confirm: Arc<dyn Confirm>,
    default_model: String,
    unsafe_mode: bool,
}

/// Shared handle to the runtime. Cloning is cheap.
#[derive(Clone)]
pub struct Swarm {
    inner: Arc<SwarmInner>,
}

impl std::fmt::Debug for Swarm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Swarm")
            .field("resolver", &self.inner.resolver)
            .field("tools", &self.inner.tools)
            .field("adapters", &self.inner.adapters)
            .field("providers", &self.inner.providers)
            .field("chain", &self.inner.chain)
            .field("unsafe_mode", &self.inner.unsafe_mode)
            .finish()
    }
}

impl Swarm {
    pub fn builder(assets: Assets, secrets: SharedSecretStore) -> SwarmBuilder {
        SwarmBuilder::new(assets, secrets)
    }

    pub fn resolver(&self) -> &Resolver {
        &self.inner.resolver
    }

    pub fn tools(&self) -> &ToolSystem {
        &self.inner.tools
    }

    pub fn adapters(&self) -> &AdapterRegistry {
        &self.inner.adapters
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.inner.providers
    }

    pub fn memory(&self) -> &Arc<dyn MemStore> {
        &self.inner.memory
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.inner.blobs
    }

    pub fn secrets(&self) -> &SharedSecretStore {
        &self.inner.secrets
    }

    /// Whether external commands skip the guard.
    pub fn unsafe_mode(&self) -> bool {
        self.inner.unsafe_mode
    }

    /// A guard backed by the `any` level of the default model set.
    pub async fn guard(&self, owner: &str) -> Result<Guard> {
        let (set, _) = split_model_ref(&self.inner.default_model);
        let model = self
            .inner
            .resolver
            .resolve_model(owner, None, &format!("{set}/any"))
            .await?;
        let mut config = BackendConfig::new();
        if !model.base_url.is_empty() {
            config = config.with_base_url(model.base_url.clone());
        }
        if !model.api_key.is_empty() {
            let token = self
                .inner
                .secrets
                .get(owner, &model.api_key)
                .await
                .map_err(|e| AgentError::Unauthorized(format!("{}: {e}", model.api_key)))?;
            config = config.with_api_key(token);
        }
        let backend = self.inner.providers.create(&model.provider, config)?;
        Ok(Guard::new(backend, model.model).with_confirm(self.inner.confirm.clone()))
    }

    /// Run a request to completion.
    pub async fn run(&self, req: Request, vars: Arc<Vars>) -> Result<Response> {
        let span = info_span!("request", chat_id = %vars.chat_id, agent = %req.name);
        self.run_with(req, vars).instrument(span).await
    }

    /// Boxed form of [`Swarm::run`], for nested requests.
    pub fn run_with(&self, req: Request, vars: Arc<Vars>) -> BoxFuture<'static, Result<Response>> {
        let this = self.clone();
        async move { this.serve(req, vars).await }.boxed()
    }

    async fn serve(&self, mut req: Request, vars: Arc<Vars>) -> Result<Response> {
        for _ in 0..HARD_MAX_TURNS {
            let target = AgentRef::decode(&req.name).normalized().name();
            if req.resolving.contains(&target) {
                let mut path = req.resolving.clone();
                path.push(target);
                return Err(AgentError::bad_request(format!("cycle: {}", path.join(" -> "))));
            }

            let agent = self
                .inner
                .resolver
                .resolve_agent(&vars.user, &req.name)
                .await?
                .with_request_limits(&req.arguments);
            let limits = agent.limits;
            let span = info_span!("agent", agent = %agent.name, log_level = agent.log_level.as_str());
            info!(parent: &span, query_len = req.query.len(), "Agent started");
            req.agent = Some(agent);

            let mut resp = Response::default();
            self.serve_chain(&mut req, &mut resp, &vars, limits)
                .instrument(span)
                .await?;

            let next = resp
                .result
                .as_ref()
                .filter(|r| r.is_transfer())
                .and_then(|r| r.next_agent.clone())
                .filter(|n| !n.trim().is_empty());
            match next {
                Some(next) => {
                    info!(from = %req.name, to = %next, "Transfer");
                    req = Request {
                        name: next,
                        query: req.query,
                        arguments: req.arguments,
                        parent: req.parent,
                        resolving: req.resolving,
                        ..Default::default()
                    };
                }
                None => {
                    resp.agent = req.agent.take();
                    return Ok(resp);
                }
            }
        }
        Err(AgentError::bad_request(format!(
            "more than {HARD_MAX_TURNS} transfers"
        )))
    }

    /// One pass through the chain under the time limit, the caller's
    /// cancellation and a panic boundary.
    async fn serve_chain(
        &self,
        req: &mut Request,
        resp: &mut Response,
        vars: &Arc<Vars>,
        limits: Limits,
    ) -> Result<()> {
        if limits.max_time <= 0 {
            warn!(agent = %req.name, "No time budget");
            resp.messages = vec![Message::assistant("timed out")];
            return Err(AgentError::Timeout(format!("{}: no time budget", req.name)));
        }
        let max_time = Duration::from_secs(limits.max_time as u64);
        let ctx = RunContext::new(self.clone(), vars.clone());

        let outcome = {
            let chain = AssertUnwindSafe(self.inner.chain.serve(&ctx, req, resp)).catch_unwind();
            tokio::select! {
                _ = vars.cancel.cancelled() => Err(AgentError::Cancelled),
                r = tokio::time::timeout(max_time, chain) => match r {
                    Err(_) => Err(AgentError::Timeout(format!("{}s", limits.max_time))),
                    Ok(Err(panic)) => Err(AgentError::internal(format!(
                        "middleware panicked: {}",
                        panic_message(panic.as_ref())
                    ))),
                    Ok(Ok(r)) => r,
                },
            }
        };

        if let Err(AgentError::Timeout(_)) = &outcome {
            warn!(agent = %req.name, max_time = limits.max_time, "Agent timed out");
            resp.messages = vec![Message::assistant("timed out")];
            resp.result = None;
        }
        debug!(agent = %req.name, ok = outcome.is_ok(), "Chain finished");
        outcome
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Builder for [`Swarm`].
pub struct SwarmBuilder {
    assets: Assets,
    secrets: SharedSecretStore,
    memory: Option<Arc<dyn MemStore>>,
    blobs: Option<Arc<dyn BlobStore>>,
    providers: ProviderRegistry,
    adapters: AdapterRegistry,
    funcs: FuncKit,
    kits: Vec<(String, Arc<dyn ToolKit>)>,
    chain: Chain,
    confirm: Arc<dyn Confirm>,
    default_model: String,
    limits: Limits,
    unsafe_mode: bool,
}

impl SwarmBuilder {
    pub fn new(assets: Assets, secrets: SharedSecretStore) -> Self {
        Self {
            assets,
            secrets,
            memory: None,
            blobs: None,
            providers: ProviderRegistry::standard(),
            adapters: AdapterRegistry::standard(),
            funcs: FuncKit::new(),
            kits: Vec::new(),
            chain: Chain::standard(),
            confirm: Arc::new(Deny),
            default_model: String::new(),
            limits: Limits::zero(),
            unsafe_mode: false,
        }
    }

    /// History store; in-memory when unset.
    pub fn with_memory(mut self, memory: Arc<dyn MemStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Blob store; in-memory when unset.
    pub fn with_blobs(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = Some(blobs);
        self
    }

    pub fn with_providers(mut self, providers: ProviderRegistry) -> Self {
        self.providers = providers;
        self
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn Adapter>) -> Self {
        self.adapters = self.adapters.with_adapter(adapter);
        self
    }

    /// Register a native implementation for the func tool `kit:name`.
    pub fn with_func(mut self, reference: impl Into<String>, f: NativeFn) -> Self {
        self.funcs = self.funcs.with_func(reference, f);
        self
    }

    /// Register a toolkit under `type` or `type:kit`.
    pub fn with_kit(mut self, key: impl Into<String>, kit: Arc<dyn ToolKit>) -> Self {
        self.kits.push((key.into(), kit));
        self
    }

    pub fn with_chain(mut self, chain: Chain) -> Self {
        self.chain = chain;
        self
    }

    pub fn with_confirm(mut self, confirm: Arc<dyn Confirm>) -> Self {
        self.confirm = confirm;
        self
    }

    /// Default model reference, `[set/]level`.
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Application-wide limits, used when neither the agent nor its pack
    /// sets one.
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_unsafe(mut self, unsafe_mode: bool) -> Self {
        self.unsafe_mode = unsafe_mode;
        self
    }

    pub fn build(self) -> Swarm {
        let mcp = McpPool::new();
        let mut tools = ToolSystem::standard(self.funcs, mcp.clone());
        for (key, kit) in self.kits {
            tools = tools.with_kit(key, kit);
        }
        let resolver = Resolver::new(self.assets, self.secrets.clone(), mcp)
            .with_default_model(self.default_model.clone())
            .with_limits(self.limits);
        Swarm {
            inner: Arc::new(SwarmInner {
                resolver,
                tools,
                adapters: self.adapters,
                providers: self.providers,
                memory: self.memory.unwrap_or_else(|| Arc::new(InMemoryMemStore::new())),
                blobs: self.blobs.unwrap_or_else(|| Arc::new(MemoryBlobStore::new())),
                secrets: self.secrets,
                chain: self.chain,
                confirm: self.confirm,
                default_model: self.default_model,
                unsafe_mode: self.unsafe_mode,
            }),
        }
    }
}
