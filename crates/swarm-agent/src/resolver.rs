//! Agent resolver: turns an agent reference into a fully materialized
//! [`Agent`] with its instruction, model, tools, flow and embedded agents.
//!
//! Packs, toolkits and model sets come from the asset stores. Results are
//! cached with a TTL; every lookup returns a clone so callers may mutate the
//! agent freely.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::{Map, Value, json};
use swarm_cache::{AGENT_TTL, CacheConfig, MODEL_TTL, TOOLKIT_TTL, TtlCache};
use swarm_config::{
    AgentConfig, AgentsConfig, Assets, DISPATCH_AGENT, FlowConfig, Model, ModelsConfig,
    SharedSecretStore, ToolConfig, ToolFunc, ToolType, ToolsConfig, empty_schema, filter_tools,
    resolve_content, split_model_ref,
};
use swarm_types::{AGENT_KIT, AgentRef, LogLevel, ToolRef};
use tracing::{debug, info, warn};

use crate::agent::{Action, Agent, Flow, Limits};
use crate::error::{AgentError, Result};
use crate::toolkit::McpPool;

/// `(user, owner, pack, sub)`
type AgentKey = (String, String, String, String);

/// `(owner, name)`
type OwnedKey = (String, String);

/// `(owner, pack, agent)`
type InstructionKey = (String, String, String);

pub struct Resolver {
    assets: Assets,
    secrets: SharedSecretStore,
    mcp: McpPool,
    /// Application default model, `[set/]level`.
    default_model: String,
    /// Application limits, consulted after the agent and pack.
    limits: Limits,
    agents: TtlCache<AgentKey, Agent>,
    packs: TtlCache<OwnedKey, Arc<AgentsConfig>>,
    instructions: TtlCache<InstructionKey, String>,
    models: TtlCache<OwnedKey, ModelsConfig>,
    toolkits: TtlCache<OwnedKey, Vec<ToolFunc>>,
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("assets", &self.assets)
            .field("default_model", &self.default_model)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl Resolver {
    pub fn new(assets: Assets, secrets: SharedSecretStore, mcp: McpPool) -> Self {
        Self {
            assets,
            secrets,
            mcp,
            default_model: String::new(),
            limits: Limits::zero(),
            agents: TtlCache::new(CacheConfig::new().with_ttl(AGENT_TTL)),
            packs: TtlCache::new(CacheConfig::new().with_ttl(AGENT_TTL)),
            instructions: TtlCache::new(CacheConfig::new().with_ttl(AGENT_TTL)),
            models: TtlCache::new(CacheConfig::new().with_ttl(MODEL_TTL)),
            toolkits: TtlCache::new(CacheConfig::new().with_ttl(TOOLKIT_TTL)),
        }
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn assets(&self) -> &Assets {
        &self.assets
    }

    /// Drop every cached agent, pack, instruction, toolkit and model set.
    pub async fn clear(&self) {
        self.agents.clear().await;
        self.packs.clear().await;
        self.instructions.clear().await;
        self.models.clear().await;
        self.toolkits.clear().await;
    }

    // ─────────────────────────────────────────────────────────────────────
    // Agents
    // ─────────────────────────────────────────────────────────────────────

    /// Resolve `reference` on behalf of `user`. A reference without an
    /// owner belongs to the user; one without a pack is the dispatch agent.
    pub async fn resolve_agent(&self, user: &str, reference: &str) -> Result<Agent> {
        self.create(user, reference.to_string(), Vec::new()).await
    }

    fn create<'a>(
        &'a self,
        user: &'a str,
        reference: String,
        visiting: Vec<String>,
    ) -> BoxFuture<'a, Result<Agent>> {
        async move {
            let mut r = AgentRef::decode(&reference).with_default_owner(user).normalized();
            if r.pack.is_empty() {
                r = AgentRef::new(r.owner, DISPATCH_AGENT, "");
            }
            let key = (user.to_string(), r.owner.clone(), r.pack.clone(), r.sub.clone());
            if let Some(agent) = self.agents.get(&key).await {
                return Ok(agent);
            }

            let name = r.name();
            if visiting.contains(&name) {
                let mut chain = visiting;
                chain.push(name);
                return Err(AgentError::bad_request(format!("cycle: {}", chain.join(" -> "))));
            }
            let mut visiting = visiting;
            visiting.push(name);

            let agent = self.materialize(user, &r, visiting).await?;
            info!(agent = %agent.name, owner = %agent.owner, tools = agent.tools.len(), "Resolved agent");
            self.agents.insert(key, agent.clone()).await;
            Ok(agent)
        }
        .boxed()
    }

    async fn materialize(&self, user: &str, r: &AgentRef, visiting: Vec<String>) -> Result<Agent> {
        let config = self
            .pack(&r.owner, &r.pack)
            .await?
            .ok_or_else(|| AgentError::not_found(format!("agent {r}")))?;
        if config.agents.is_empty() {
            return Err(AgentError::bad_request(format!("pack {} has no agents", r.pack)));
        }
        let name = r.name();
        let ac = config
            .agent(&name)
            .or_else(|| if r.sub.is_empty() { config.agents.first() } else { None })
            .cloned()
            .ok_or_else(|| AgentError::not_found(format!("agent {r}")))?;
        let name = ac.name.clone();

        let instruction = match ac.instruction.clone() {
            Some(mut instruction) => {
                let key = (r.owner.clone(), r.pack.clone(), name.clone());
                instruction.content = self
                    .instructions
                    .get_or_try_insert_with(key, || {
                        resolve_content(config.source.as_ref(), &instruction.content)
                    })
                    .await?;
                Some(instruction)
            }
            None => None,
        };
        let has_instruction = instruction.as_ref().is_some_and(|i| !i.content.trim().is_empty());

        let mut environment = config.environment.clone();
        environment.extend(ac.environment.clone());

        let limits = Limits::first_non_zero(&[
            Limits::of_agent(&ac),
            Limits::of_pack(&config),
            self.limits,
            Limits::default(),
        ]);
        let log_level = LogLevel::parse(first_non_empty(&[&ac.log_level, &config.log_level]));

        let model_ref = first_non_empty(&[&ac.model, &config.model, &self.default_model]).to_string();
        let adapter = ac.adapter.trim().to_lowercase();
        let needs_model = (ac.flow.is_none() || has_instruction) && adapter != "echo";
        if ac.flow.is_none() && !has_instruction && matches!(adapter.as_str(), "" | "chat") {
            return Err(AgentError::bad_request(format!(
                "agent {name} has neither an instruction nor a flow"
            )));
        }
        let model = if model_ref.trim_start().starts_with('@') {
            None
        } else {
            match self.resolve_model(&r.owner, Some(&config), &model_ref).await {
                Ok(model) => Some(model),
                Err(e) if !needs_model => {
                    debug!(agent = %name, error = %e, "No model for agent without inference");
                    None
                }
                Err(e) => return Err(e),
            }
        };

        let tools = self.resolve_tools(&r.owner, &config, &ac).await?;
        let flow = ac.flow.as_ref().map(|f| build_flow(f, &tools)).transpose()?;

        let mut embed = Vec::with_capacity(ac.embed.len());
        for reference in &ac.embed {
            let child = AgentRef::decode(reference).with_default_owner(&r.owner).encode();
            embed.push(self.create(user, child, visiting.clone()).await?);
        }

        Ok(Agent {
            owner: r.owner.clone(),
            name,
            display: ac.display.clone(),
            description: ac.description.clone(),
            adapter,
            instruction,
            context: ac.context.clone(),
            message: ac.message.clone(),
            model,
            model_ref,
            tools,
            environment,
            arguments: ac.arguments.clone(),
            embed,
            flow,
            log_level,
            limits,
            config: Some(config),
        })
    }

    /// The agent pack `pack` of `owner`, loaded once per TTL. Missing packs
    /// are not cached.
    async fn pack(&self, owner: &str, pack: &str) -> Result<Option<Arc<AgentsConfig>>> {
        let key = (owner.to_string(), pack.to_lowercase());
        if let Some(config) = self.packs.get(&key).await {
            return Ok(Some(config));
        }
        let Some(config) = self.assets.search_agent(owner, pack).await? else {
            return Ok(None);
        };
        let config = Arc::new(config);
        debug!(owner = %owner, pack = %key.1, "Loaded agent pack");
        self.packs.insert(key, config.clone()).await;
        Ok(Some(config))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Models
    // ─────────────────────────────────────────────────────────────────────

    /// Resolve `[set/]level`, preferring a set defined in `pack`.
    pub async fn resolve_model(
        &self,
        owner: &str,
        pack: Option<&AgentsConfig>,
        model_ref: &str,
    ) -> Result<Model> {
        let (set, level) = split_model_ref(model_ref);
        if let Some(models) = pack.and_then(|p| p.model_set(&set)) {
            return models
                .model(&level)
                .ok_or_else(|| AgentError::not_found(format!("model {set}/{level}")));
        }
        let models = self
            .models
            .get_or_try_insert_with((owner.to_string(), set.clone()), || async {
                let models = self
                    .assets
                    .search_models(owner, &set)
                    .await?
                    .ok_or_else(|| AgentError::not_found(format!("model set {set}")))?;
                Ok::<_, AgentError>(models)
            })
            .await?;
        models
            .model(&level)
            .ok_or_else(|| AgentError::not_found(format!("model {set}/{level}")))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Tools
    // ─────────────────────────────────────────────────────────────────────

    /// Resolve a single tool reference outside of any pack.
    pub async fn resolve_tool(&self, owner: &str, r: &ToolRef) -> Result<Vec<ToolFunc>> {
        if r.is_agent() {
            return self.agent_tools(owner, r, "").await;
        }
        let tools = self.toolkit(owner, &r.kit).await?;
        Ok(if r.is_wildcard() { tools } else { filter_tools(&tools, &r.kit, &r.name) })
    }

    async fn resolve_tools(
        &self,
        owner: &str,
        config: &Arc<AgentsConfig>,
        ac: &AgentConfig,
    ) -> Result<Vec<ToolFunc>> {
        let mut tools = Vec::new();
        for function in &ac.functions {
            let r = ToolRef::decode(function);
            let found = if r.is_all() {
                self.all_tools(owner, config, &ac.name).await?
            } else if r.is_agent() {
                self.agent_tools(owner, &r, &ac.name).await?
            } else {
                self.kit_tools(owner, config, &r).await?
            };
            if found.is_empty() && !(r.is_agent() && r.is_wildcard()) {
                return Err(AgentError::not_found(format!("tool {function}")));
            }
            tools.extend(found);
        }

        let mut seen = HashSet::new();
        tools.retain(|t| seen.insert(t.id()));

        if !ac.filters.is_empty() {
            tools.retain(|t| {
                ac.filters
                    .iter()
                    .any(|f| !filter_tools(std::slice::from_ref(t), &f.kit, &f.name).is_empty())
            });
        }
        tools.retain(|t| !(t.is_agent() && t.agent == ac.name));
        Ok(tools)
    }

    /// Every pack-local tool, every tool of every visible kit and every
    /// agent. Kits that fail to load are skipped.
    async fn all_tools(
        &self,
        owner: &str,
        config: &Arc<AgentsConfig>,
        self_name: &str,
    ) -> Result<Vec<ToolFunc>> {
        let mut tools = Vec::new();
        let mut kits: Vec<String> = config.tools.iter().map(|t| t.kit.clone()).collect();
        kits.dedup();
        for kit in &kits {
            tools.extend(self.kit_tools(owner, config, &ToolRef::new(kit.as_str(), "*")).await?);
        }
        for kit in self.assets.list_kits(owner).await? {
            if kits.contains(&kit) {
                continue;
            }
            match self.toolkit(owner, &kit).await {
                Ok(found) => tools.extend(found),
                Err(e) => warn!(kit = %kit, error = %e, "Skipping toolkit"),
            }
        }
        tools.extend(self.agent_tools(owner, &ToolRef::new(AGENT_KIT, "*"), self_name).await?);
        Ok(tools)
    }

    async fn kit_tools(&self, owner: &str, config: &Arc<AgentsConfig>, r: &ToolRef) -> Result<Vec<ToolFunc>> {
        let local: Vec<&ToolConfig> = config
            .tools
            .iter()
            .filter(|t| t.kit == r.kit && (r.is_wildcard() || t.name == r.name))
            .collect();
        if !local.is_empty() {
            let kit = Arc::new(ToolsConfig {
                kit: r.kit.clone(),
                provider: config.provider.clone(),
                base_url: config.base_url.clone(),
                api_key: config.api_key.clone(),
                tools: local.iter().map(|t| (*t).clone()).collect(),
                source: config.source.clone(),
                ..Default::default()
            });
            return Ok(local.into_iter().map(|t| tool_func(&kit, t)).collect());
        }
        self.resolve_tool(owner, r).await
    }

    /// Every tool of `kit`, with MCP tools discovered from the server.
    async fn toolkit(&self, owner: &str, kit: &str) -> Result<Vec<ToolFunc>> {
        self.toolkits
            .get_or_try_insert_with((owner.to_string(), kit.to_string()), || async {
                let config = self
                    .assets
                    .search_tool(owner, kit)
                    .await?
                    .ok_or_else(|| AgentError::not_found(format!("toolkit {kit}")))?;
                let config = Arc::new(config);
                let mut tools: Vec<ToolFunc> =
                    config.tools.iter().map(|t| tool_func(&config, t)).collect();
                if config.tool_type == Some(ToolType::Mcp) {
                    for tool in self.discover_mcp(owner, &config).await? {
                        if !tools.iter().any(|t| t.name == tool.name) {
                            tools.push(tool);
                        }
                    }
                }
                debug!(kit = %kit, tools = tools.len(), "Loaded toolkit");
                Ok::<_, AgentError>(tools)
            })
            .await
    }

    async fn discover_mcp(&self, owner: &str, config: &Arc<ToolsConfig>) -> Result<Vec<ToolFunc>> {
        let connector = config.connector.clone().unwrap_or_default();
        let url = first_non_empty(&[&connector.base_url, &config.base_url]).to_string();
        if url.is_empty() {
            warn!(kit = %config.kit, "MCP toolkit without a server url");
            return Ok(Vec::new());
        }
        let api_key = first_non_empty(&[&connector.api_key, &config.api_key]).to_string();
        let token = if api_key.is_empty() {
            String::new()
        } else {
            self.secrets
                .get(owner, &api_key)
                .await
                .map_err(|e| AgentError::Unauthorized(e.to_string()))?
        };
        let client = self.mcp.client(&url, &token).await?;
        let infos = client.list_tools().await?;
        Ok(infos
            .into_iter()
            .map(|info| ToolFunc {
                tool_type: ToolType::Mcp,
                kit: config.kit.clone(),
                name: info.name,
                description: info.description.unwrap_or_default(),
                parameters: info.input_schema.unwrap_or_else(empty_schema),
                body: None,
                agent: String::new(),
                provider: connector.provider.clone(),
                base_url: url.clone(),
                api_key: api_key.clone(),
                arguments: Default::default(),
                config: Some(config.clone()),
            })
            .collect())
    }

    async fn agent_tools(&self, owner: &str, r: &ToolRef, self_name: &str) -> Result<Vec<ToolFunc>> {
        if r.is_wildcard() {
            let packs = self.assets.list_agents(owner).await?;
            return Ok(packs
                .values()
                .flat_map(|pack| pack.agents.iter())
                .filter(|ac| ac.name != self_name)
                .map(agent_tool)
                .collect());
        }
        let target = AgentRef::decode(&r.name).with_default_owner(owner).normalized();
        let Some(pack) = self.pack(&target.owner, &target.pack).await? else {
            return Ok(Vec::new());
        };
        let ac = pack
            .agent(&target.name())
            .or_else(|| if target.sub.is_empty() { pack.agents.first() } else { None });
        Ok(ac
            .map(|ac| {
                let mut tool = agent_tool(ac);
                if target.owner != owner {
                    tool.agent = AgentRef::new(target.owner.as_str(), ac.name.as_str(), "").encode();
                }
                tool
            })
            .into_iter()
            .collect())
    }
}

fn first_non_empty<'a>(values: &[&'a String]) -> &'a str {
    values
        .iter()
        .map(|s| s.trim())
        .find(|s| !s.is_empty())
        .unwrap_or_default()
}

/// Materialize a tool definition of `kit`.
pub fn tool_func(kit: &Arc<ToolsConfig>, t: &ToolConfig) -> ToolFunc {
    let inherit = |own: &String, fallback: &String| {
        if own.is_empty() { fallback.clone() } else { own.clone() }
    };
    ToolFunc {
        tool_type: t.tool_type.or(kit.tool_type).unwrap_or(ToolType::Func),
        kit: inherit(&t.kit, &kit.kit),
        name: t.name.clone(),
        description: t.description.clone(),
        parameters: if t.parameters.is_empty() {
            empty_schema()
        } else {
            Value::Object(t.parameters.clone())
        },
        body: t.body.clone(),
        agent: t.agent.clone(),
        provider: inherit(&t.provider, &kit.provider),
        base_url: inherit(&t.base_url, &kit.base_url),
        api_key: inherit(&t.api_key, &kit.api_key),
        arguments: t.arguments.clone(),
        config: Some(kit.clone()),
    }
}

/// An agent exposed as a tool taking a `query` plus the agent's declared
/// parameters.
pub fn agent_tool(ac: &AgentConfig) -> ToolFunc {
    let mut properties = Map::new();
    properties.insert(
        "query".into(),
        json!({"type": "string", "description": "The request for the agent."}),
    );
    let mut required = vec![Value::String("query".into())];

    match ac.parameters.get("properties") {
        Some(Value::Object(props)) => {
            properties.extend(props.clone());
            if let Some(Value::Array(req)) = ac.parameters.get("required") {
                required.extend(req.iter().filter(|v| v.as_str() != Some("query")).cloned());
            }
        }
        _ => {
            for (key, value) in &ac.parameters {
                let schema = match value {
                    Value::Object(_) => value.clone(),
                    other => json!({
                        "type": "string",
                        "description": swarm_types::value_to_string(other).unwrap_or_default(),
                    }),
                };
                properties.insert(key.clone(), schema);
            }
        }
    }

    let description = if ac.description.is_empty() { &ac.display } else { &ac.description };
    let mut tool = ToolFunc::new(ToolType::Agent, AGENT_KIT, ac.name.clone())
        .with_description(description.clone())
        .with_parameters(json!({
            "type": "object",
            "properties": properties,
            "required": required,
        }));
    tool.agent = ac.name.clone();
    tool
}

fn build_flow(config: &FlowConfig, tools: &[ToolFunc]) -> Result<Flow> {
    let by_ref: HashMap<String, &ToolFunc> = tools.iter().map(|t| (t.reference(), t)).collect();
    let actions = config
        .actions
        .iter()
        .map(|a| {
            let r = ToolRef::decode(a);
            by_ref
                .get(&r.to_string())
                .map(|t| Action {
                    id: t.id(),
                    name: t.reference(),
                    arguments: t.arguments.clone(),
                })
                .ok_or_else(|| AgentError::bad_request(format!("flow action {a} is not a tool of the agent")))
        })
        .collect::<Result<Vec<_>>>()?;
    if actions.is_empty() && config.script.trim().is_empty() {
        return Err(AgentError::bad_request("flow has neither actions nor a script"));
    }
    Ok(Flow {
        flow_type: config.flow_type,
        actions,
        concurrency: config.concurrency,
        retry: config.retry,
        expression: config.expression.clone(),
        script: config.script.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarm_config::FlowType;

    #[test]
    fn test_agent_tool_schema() {
        let mut ac = AgentConfig {
            name: "ask/sub".into(),
            description: "Answers".into(),
            ..Default::default()
        };
        ac.parameters.insert("lang".into(), json!("Output language"));
        let tool = agent_tool(&ac);
        assert_eq!(tool.kit, "agent");
        assert_eq!(tool.agent, "ask/sub");
        assert_eq!(tool.reference(), "agent:ask/sub");
        assert_eq!(tool.parameters["required"], json!(["query"]));
        assert_eq!(tool.parameters["properties"]["lang"]["type"], "string");

        let mut ac = AgentConfig::default();
        ac.name = "x".into();
        ac.parameters = json!({
            "properties": {"n": {"type": "integer"}},
            "required": ["n"],
        })
        .as_object()
        .cloned()
        .unwrap();
        let tool = agent_tool(&ac);
        assert_eq!(tool.parameters["required"], json!(["query", "n"]));
        assert_eq!(tool.parameters["properties"]["n"]["type"], "integer");
    }

    #[test]
    fn test_tool_func_inherits_kit() {
        let kit = Arc::new(ToolsConfig {
            kit: "sh".into(),
            tool_type: Some(ToolType::System),
            api_key: "sh_key".into(),
            ..Default::default()
        });
        let t = ToolConfig {
            name: "pwd".into(),
            ..Default::default()
        };
        let f = tool_func(&kit, &t);
        assert_eq!(f.tool_type, ToolType::System);
        assert_eq!(f.kit, "sh");
        assert_eq!(f.api_key, "sh_key");
        assert_eq!(f.parameters, empty_schema());
    }

    #[test]
    fn test_build_flow_checks_actions() {
        let tools = vec![
            ToolFunc::new(ToolType::Func, "text", "upcase"),
            ToolFunc::new(ToolType::Func, "text", "reverse"),
        ];
        let config = FlowConfig {
            flow_type: FlowType::Sequence,
            actions: vec!["text:upcase".into(), "text__reverse".into()],
            ..Default::default()
        };
        let flow = build_flow(&config, &tools).unwrap();
        assert_eq!(flow.actions[1].id, "text__reverse");
        assert_eq!(flow.actions[0].name, "text:upcase");

        let config = FlowConfig {
            actions: vec!["text:missing".into()],
            ..Default::default()
        };
        assert!(build_flow(&config, &tools).is_err());
        assert!(build_flow(&FlowConfig::default(), &tools).is_err());
    }
}
