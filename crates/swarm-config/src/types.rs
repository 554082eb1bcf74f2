//! Configuration types mapping to the pack YAML schema.
//!
//! ```yaml
//! pack: ask                 # agents/<pack>/*.yaml
//! model: default/any
//! agents:
//!   - name: ask
//!     instruction: "file:templates/ask.tpl"
//!     functions: ["sh:*", "agent:echo"]
//! tools: [...]              # pack-local tool definitions
//! models: [...]             # pack-local model sets
//! ```
//!
//! Keys are snake_case; camelCase aliases are accepted.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use swarm_types::{ArgMap, tool_id};

use crate::store::AssetStore;

// ─────────────────────────────────────────────────────────────────────────────
// Asset source
// ─────────────────────────────────────────────────────────────────────────────

/// The store and directory a config was loaded from; relative `file:` and
/// `resource:` references resolve against it.
#[derive(Clone)]
pub struct AssetSource {
    pub store: Arc<dyn AssetStore>,
    pub base_dir: String,
}

impl AssetSource {
    pub fn new(store: Arc<dyn AssetStore>, base_dir: impl Into<String>) -> Self {
        Self {
            store,
            base_dir: base_dir.into(),
        }
    }
}

impl std::fmt::Debug for AssetSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetSource")
            .field("store", &self.store.kind())
            .field("base_dir", &self.base_dir)
            .finish()
    }
}

impl PartialEq for AssetSource {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.store, &other.store) && self.base_dir == other.base_dir
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Agents
// ─────────────────────────────────────────────────────────────────────────────

/// Pack-level agent configuration, the merge of every YAML document in a
/// pack directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentsConfig {
    #[serde(alias = "pack")]
    pub name: String,

    /// Default model, `[set/]level`.
    pub model: String,

    pub agents: Vec<AgentConfig>,

    /// Pack-local tool definitions.
    pub tools: Vec<ToolConfig>,

    /// Pack-local model sets.
    pub models: Vec<ModelsConfig>,

    /// Inherited by inline tools and models.
    pub provider: String,
    #[serde(alias = "baseUrl")]
    pub base_url: String,
    #[serde(alias = "apiKey")]
    pub api_key: String,

    pub environment: ArgMap,

    #[serde(alias = "maxTurns")]
    pub max_turns: i64,
    #[serde(alias = "maxTime")]
    pub max_time: i64,
    #[serde(alias = "maxHistory")]
    pub max_history: i64,
    #[serde(alias = "maxSpan")]
    pub max_span: i64,

    #[serde(alias = "logLevel")]
    pub log_level: String,

    #[serde(skip)]
    pub source: Option<AssetSource>,
}

impl AgentsConfig {
    /// Find the agent named `name` (already normalized).
    pub fn agent(&self, name: &str) -> Option<&AgentConfig> {
        self.agents.iter().find(|a| a.name == name)
    }

    /// Pack-local model set by name.
    pub fn model_set(&self, set: &str) -> Option<&ModelsConfig> {
        self.models.iter().find(|m| m.set == set)
    }
}

/// One agent inside a pack.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// `pack` or `pack/sub`.
    pub name: String,
    pub display: String,
    pub description: String,

    pub instruction: Option<Instruction>,

    /// Agent reference producing the historical context.
    pub context: String,

    /// Supplementary user message, may be a template.
    pub message: String,

    /// `[set/]level` or `@agent`.
    pub model: String,

    /// `kit:name` references; `*` wildcards allowed.
    pub functions: Vec<String>,

    /// LLM capability: chat, image, tts.
    pub adapter: String,

    pub flow: Option<FlowConfig>,

    /// Agent references whose instructions and tools are inherited.
    pub embed: Vec<String>,

    /// Extra restrictions applied to the resolved tool set.
    pub filters: Vec<ToolFilter>,

    #[serde(alias = "maxTurns")]
    pub max_turns: i64,
    #[serde(alias = "maxTime")]
    pub max_time: i64,
    #[serde(alias = "maxHistory")]
    pub max_history: i64,
    #[serde(alias = "maxSpan")]
    pub max_span: i64,

    #[serde(alias = "logLevel")]
    pub log_level: String,

    /// Default arguments.
    pub arguments: ArgMap,

    pub environment: ArgMap,

    /// Extra JSON-schema properties when the agent is called as a tool.
    pub parameters: ArgMap,
}

/// System prompt source: a literal, `file:<path>` or `resource:<name>`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "InstructionRepr")]
pub struct Instruction {
    pub role: String,
    pub content: String,
    /// `tpl` marks the content as a template.
    #[serde(rename = "type")]
    pub kind: String,
}

impl Instruction {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn is_template(&self) -> bool {
        matches!(self.kind.as_str(), "tpl" | "template")
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum InstructionRepr {
    Text(String),
    Full {
        #[serde(default)]
        role: String,
        #[serde(default)]
        content: String,
        #[serde(default, rename = "type")]
        kind: String,
    },
}

impl From<InstructionRepr> for Instruction {
    fn from(repr: InstructionRepr) -> Self {
        match repr {
            InstructionRepr::Text(content) => Instruction::new(content),
            InstructionRepr::Full {
                role,
                content,
                kind,
            } => Instruction {
                role,
                content,
                kind,
            },
        }
    }
}

/// A `(kit, name)` filter; empty or `*` matches anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolFilter {
    pub kit: String,
    pub name: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Flows
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowType {
    #[default]
    Sequence,
    Parallel,
    Choice,
    Map,
}

impl FlowType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowType::Sequence => "sequence",
            FlowType::Parallel => "parallel",
            FlowType::Choice => "choice",
            FlowType::Map => "map",
        }
    }
}

/// Non-LLM composition of actions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    #[serde(rename = "type")]
    pub flow_type: FlowType,

    /// `kit:name` references, resolved against the agent's tools.
    pub actions: Vec<String>,

    /// Fan-out bound for parallel and map; 0 is unbounded.
    pub concurrency: usize,

    /// Extra attempts per action.
    pub retry: u32,

    /// Choice selector template.
    pub expression: String,

    /// Bash script run in the virtual shell.
    pub script: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tools
// ─────────────────────────────────────────────────────────────────────────────

/// Kind of toolkit implementing a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolType {
    Func,
    System,
    Web,
    Mcp,
    Faas,
    Agent,
    Template,
    Shell,
}

impl ToolType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolType::Func => "func",
            ToolType::System => "system",
            ToolType::Web => "web",
            ToolType::Mcp => "mcp",
            ToolType::Faas => "faas",
            ToolType::Agent => "agent",
            ToolType::Template => "template",
            ToolType::Shell => "shell",
        }
    }
}

impl std::fmt::Display for ToolType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Toolkit configuration, the merge of `tools/<kit>/*.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub kit: String,

    /// Default type for every tool of the kit.
    #[serde(rename = "type")]
    pub tool_type: Option<ToolType>,

    pub provider: String,
    #[serde(alias = "baseUrl")]
    pub base_url: String,
    #[serde(alias = "apiKey")]
    pub api_key: String,

    /// Remote endpoint for MCP kits.
    pub connector: Option<ConnectorConfig>,

    pub tools: Vec<ToolConfig>,

    #[serde(skip)]
    pub source: Option<AssetSource>,
}

/// One tool definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    #[serde(rename = "type")]
    pub tool_type: Option<ToolType>,

    /// Only used by pack-local tools; defaults to the pack name.
    pub kit: String,

    pub name: String,
    pub description: String,
    pub parameters: ArgMap,
    pub body: Option<FuncBody>,

    /// Agent reference for agent tools.
    pub agent: String,

    pub provider: String,
    #[serde(alias = "baseUrl")]
    pub base_url: String,
    #[serde(alias = "apiKey")]
    pub api_key: String,

    /// Default arguments.
    pub arguments: ArgMap,
}

/// Scripted tool body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FuncBody {
    pub language: String,
    #[serde(alias = "mimeType")]
    pub mime_type: String,
    pub code: String,
    pub url: String,
}

impl FuncBody {
    /// The effective language, from `language` or `mime_type`.
    pub fn lang(&self) -> &str {
        if !self.language.is_empty() {
            return &self.language;
        }
        match self.mime_type.as_str() {
            "text/x-go-template" => "template",
            "text/x-shellscript" => "bash",
            other => other,
        }
    }
}

/// MCP or other remote connector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    pub provider: String,
    #[serde(alias = "baseUrl")]
    pub base_url: String,
    #[serde(alias = "apiKey")]
    pub api_key: String,
}

/// A materialized tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolFunc {
    #[serde(rename = "type")]
    pub tool_type: ToolType,
    pub kit: String,
    pub name: String,
    pub description: String,
    /// JSON-schema object.
    pub parameters: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<FuncBody>,
    /// Agent reference for agent tools.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub agent: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub base_url: String,
    /// Name of the secret resolved before each call.
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub arguments: ArgMap,
    #[serde(skip)]
    pub config: Option<Arc<ToolsConfig>>,
}

impl ToolFunc {
    pub fn new(tool_type: ToolType, kit: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            tool_type,
            kit: kit.into(),
            name: name.into(),
            description: String::new(),
            parameters: empty_schema(),
            body: None,
            agent: String::new(),
            provider: String::new(),
            base_url: String::new(),
            api_key: String::new(),
            arguments: ArgMap::new(),
            config: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_body(mut self, body: FuncBody) -> Self {
        self.body = Some(body);
        self
    }

    /// Stable `kit__name` identifier.
    pub fn id(&self) -> String {
        tool_id(&self.kit, &self.name)
    }

    /// `kit:name` reference.
    pub fn reference(&self) -> String {
        format!("{}:{}", self.kit, self.name)
    }

    pub fn is_agent(&self) -> bool {
        self.tool_type == ToolType::Agent
    }
}

/// `{"type": "object", "properties": {}}`
pub fn empty_schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// Keep the tools matching `(kit, name)`; empty or `*` match anything.
pub fn filter_tools(tools: &[ToolFunc], kit: &str, name: &str) -> Vec<ToolFunc> {
    let wild = |s: &str| s.is_empty() || s == "*";
    tools
        .iter()
        .filter(|t| (wild(kit) || t.kit == kit) && (wild(name) || t.name == name))
        .cloned()
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Models
// ─────────────────────────────────────────────────────────────────────────────

/// Model levels in preference order for `any`.
pub const MODEL_LEVELS: [&str; 3] = ["L1", "L2", "L3"];

/// A model set, the merge of `models/<set>/*.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    #[serde(alias = "alias", alias = "name")]
    pub set: String,

    pub provider: String,
    #[serde(alias = "baseUrl")]
    pub base_url: String,
    #[serde(alias = "apiKey")]
    pub api_key: String,

    /// Level (`L1`, `L2`, `L3`, ...) to model.
    pub models: BTreeMap<String, ModelConfig>,
}

impl ModelsConfig {
    /// Materialize the model at `level`; `any` picks the first of L1, L2, L3.
    pub fn model(&self, level: &str) -> Option<Model> {
        let (level, config) = if level.is_empty() || level.eq_ignore_ascii_case("any") {
            MODEL_LEVELS
                .iter()
                .find_map(|l| self.models.get(*l).map(|c| (l.to_string(), c)))?
        } else {
            (level.to_string(), self.models.get(level)?)
        };
        Some(Model {
            set: self.set.clone(),
            level,
            provider: config.provider.clone(),
            model: config.model.clone(),
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub model: String,
    pub provider: String,
    #[serde(alias = "baseUrl")]
    pub base_url: String,
    #[serde(alias = "apiKey")]
    pub api_key: String,
}

/// A resolved model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    pub set: String,
    pub level: String,
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub base_url: String,
    /// Name of the secret holding the API key.
    #[serde(default)]
    pub api_key: String,
}

/// Split `[set/]level` into `(set, level)`.
///
/// A bare level (`L1`..`L3`, `any`) uses the `default` set; any other bare
/// word names a set at level `any`.
pub fn split_model_ref(s: &str) -> (String, String) {
    let s = s.trim();
    if let Some((set, level)) = s.split_once('/') {
        let set = if set.is_empty() { "default" } else { set };
        let level = if level.is_empty() { "any" } else { level };
        return (set.to_string(), level.to_string());
    }
    if s.is_empty() {
        return ("default".into(), "any".into());
    }
    let is_level = s.eq_ignore_ascii_case("any") || MODEL_LEVELS.iter().any(|l| l == &s);
    if is_level {
        ("default".into(), s.to_string())
    } else {
        (s.to_string(), "any".into())
    }
}
