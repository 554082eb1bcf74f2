//! Materialized agents and the request/response pair that flows through the
//! middleware chain.

use std::sync::Arc;

use serde::Serialize;
use swarm_config::{AgentsConfig, FlowType, Instruction, Model, ToolFunc};
use swarm_types::{
    ActionResult, AgentRef, ArgMap, LogLevel, Message,
    action::{DEFAULT_MAX_HISTORY, DEFAULT_MAX_SPAN, DEFAULT_MAX_TIME, DEFAULT_MAX_TURNS},
};

use crate::error::{AgentError, Result};

/// Upper bound on inference turns after resolution.
pub const HARD_MAX_TURNS: i64 = 100;

/// Upper bound on run time in seconds after resolution.
pub const HARD_MAX_TIME: i64 = 900;

// ─────────────────────────────────────────────────────────────────────────────
// Limits
// ─────────────────────────────────────────────────────────────────────────────

/// Numeric limits of an agent run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Limits {
    pub max_turns: i64,
    /// Seconds.
    pub max_time: i64,
    pub max_history: i64,
    /// Minutes.
    pub max_span: i64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_turns: DEFAULT_MAX_TURNS,
            max_time: DEFAULT_MAX_TIME,
            max_history: DEFAULT_MAX_HISTORY,
            max_span: DEFAULT_MAX_SPAN,
        }
    }
}

impl Limits {
    /// First non-zero value of each field, in order; turns and time are then
    /// capped by the hard limits.
    ///
    /// A negative `max_time` is kept as zero so the run times out at once.
    pub fn first_non_zero(chain: &[Limits]) -> Limits {
        let pick = |f: fn(&Limits) -> i64| chain.iter().map(f).find(|v| *v != 0).unwrap_or(0);
        Limits {
            max_turns: pick(|l| l.max_turns).clamp(0, HARD_MAX_TURNS),
            max_time: pick(|l| l.max_time).clamp(0, HARD_MAX_TIME),
            max_history: pick(|l| l.max_history),
            max_span: pick(|l| l.max_span),
        }
    }

    pub(crate) fn of_pack(config: &AgentsConfig) -> Limits {
        Limits {
            max_turns: config.max_turns,
            max_time: config.max_time,
            max_history: config.max_history,
            max_span: config.max_span,
        }
    }

    pub(crate) fn of_agent(config: &swarm_config::AgentConfig) -> Limits {
        Limits {
            max_turns: config.max_turns,
            max_time: config.max_time,
            max_history: config.max_history,
            max_span: config.max_span,
        }
    }

    pub(crate) fn of_args(args: &ArgMap) -> Limits {
        use swarm_types::ArgMapExt;
        Limits {
            max_turns: args.get_int("max_turns").unwrap_or(0),
            max_time: args.get_int("max_time").unwrap_or(0),
            max_history: args.get_int("max_history").unwrap_or(0),
            max_span: args.get_int("max_span").unwrap_or(0),
        }
    }

    pub(crate) fn zero() -> Limits {
        Limits {
            max_turns: 0,
            max_time: 0,
            max_history: 0,
            max_span: 0,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Flow
// ─────────────────────────────────────────────────────────────────────────────

/// A flow step bound to a resolved tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Action {
    /// Tool ID, `kit__name`.
    pub id: String,
    /// `kit:name` reference.
    pub name: String,
    /// Default arguments of the tool.
    pub arguments: ArgMap,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Flow {
    pub flow_type: FlowType,
    pub actions: Vec<Action>,
    /// Fan-out bound for parallel and map; zero is unbounded.
    pub concurrency: usize,
    /// Extra attempts per failed action.
    pub retry: u32,
    /// Choice expression, a template.
    pub expression: String,
    /// Optional bash script run in the virtual shell.
    pub script: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Agent
// ─────────────────────────────────────────────────────────────────────────────

/// A fully resolved agent, cloned out of the agent cache per request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Agent {
    pub owner: String,
    /// `pack[/sub]`, lower-case.
    pub name: String,
    pub display: String,
    pub description: String,
    /// LLM capability key; empty means `chat`.
    pub adapter: String,
    /// Instruction with `file:`/`resource:` references already read.
    pub instruction: Option<Instruction>,
    /// Agent producing the conversation context, if any.
    pub context: String,
    /// Supplementary user message.
    pub message: String,
    /// Resolved model; `None` while `model_ref` names an agent.
    pub model: Option<Model>,
    /// Model reference as configured, e.g. `default/L1` or `@choose_model`.
    pub model_ref: String,
    pub tools: Vec<ToolFunc>,
    pub environment: ArgMap,
    pub arguments: ArgMap,
    pub embed: Vec<Agent>,
    pub flow: Option<Flow>,
    pub log_level: LogLevel,
    pub limits: Limits,
    /// The pack this agent was loaded from.
    #[serde(skip)]
    pub config: Option<Arc<AgentsConfig>>,
}

impl Agent {
    pub fn reference(&self) -> AgentRef {
        let mut r = AgentRef::decode(&self.name);
        r.owner = self.owner.clone();
        r
    }

    pub fn adapter(&self) -> &str {
        if self.adapter.is_empty() {
            "chat"
        } else {
            &self.adapter
        }
    }

    /// Whether the model is chosen at run time by another agent.
    pub fn has_agent_model(&self) -> bool {
        self.model_ref.trim_start().starts_with('@')
    }

    pub fn has_instruction(&self) -> bool {
        self.instruction
            .as_ref()
            .is_some_and(|i| !i.content.trim().is_empty())
    }

    /// Depth-first pre-order over the embed tree, the agent itself last.
    pub fn walk(&self) -> Vec<&Agent> {
        let mut out = Vec::new();
        for child in &self.embed {
            collect_pre_order(child, &mut out);
        }
        out.push(self);
        out
    }

    /// Apply per-request limit overrides.
    pub fn with_request_limits(mut self, args: &ArgMap) -> Self {
        self.limits = Limits::first_non_zero(&[Limits::of_args(args), self.limits]);
        self
    }
}

fn collect_pre_order<'a>(agent: &'a Agent, out: &mut Vec<&'a Agent>) {
    out.push(agent);
    for child in &agent.embed {
        collect_pre_order(child, out);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Request / Response
// ─────────────────────────────────────────────────────────────────────────────

/// A request to run an agent.
#[derive(Debug, Clone, Default)]
pub struct Request {
    /// Agent reference, `[owner:]pack[/sub]`.
    pub name: String,
    /// The user input.
    pub query: String,
    pub arguments: ArgMap,
    /// The calling agent for nested requests.
    pub parent: Option<Arc<Agent>>,
    /// Agents currently resolving a model or instruction for this request.
    pub(crate) resolving: Vec<String>,

    // Filled in by the orchestrator and the middleware chain.
    pub agent: Option<Agent>,
    pub instruction: String,
    pub history: Vec<Message>,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolFunc>,
    pub model: Option<Model>,
    pub token: String,
}

impl Request {
    pub fn new(name: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_arguments(mut self, arguments: ArgMap) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn with_parent(mut self, parent: Arc<Agent>) -> Self {
        self.parent = Some(parent);
        self
    }

    /// The materialized agent.
    pub fn agent(&self) -> Result<&Agent> {
        self.agent
            .as_ref()
            .ok_or_else(|| AgentError::internal(format!("agent {} not resolved", self.name)))
    }

    pub fn is_top_level(&self) -> bool {
        self.parent.is_none()
    }

    /// A request for `name` made on behalf of this one.
    pub(crate) fn child(&self, name: &str, query: impl Into<String>, arguments: ArgMap) -> Self {
        let mut child = Request::new(name, query).with_arguments(arguments);
        child.parent = self.agent.clone().map(Arc::new);
        child.resolving = self.resolving.clone();
        child
    }
}

/// The outcome of an agent run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Response {
    /// Messages appended by this run.
    pub messages: Vec<Message>,
    /// The agent that produced the result, after any transfers.
    #[serde(skip)]
    pub agent: Option<Agent>,
    pub result: Option<ActionResult>,
}

impl Response {
    /// Result value, or empty.
    pub fn value(&self) -> &str {
        self.result.as_ref().map(|r| r.value.as_str()).unwrap_or_default()
    }

    pub fn is_transfer(&self) -> bool {
        self.result.as_ref().is_some_and(ActionResult::is_transfer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(name: &str, embed: Vec<Agent>) -> Agent {
        Agent {
            owner: String::new(),
            name: name.into(),
            display: String::new(),
            description: String::new(),
            adapter: String::new(),
            instruction: None,
            context: String::new(),
            message: String::new(),
            model: None,
            model_ref: String::new(),
            tools: Vec::new(),
            environment: ArgMap::new(),
            arguments: ArgMap::new(),
            embed,
            flow: None,
            log_level: LogLevel::default(),
            limits: Limits::default(),
            config: None,
        }
    }

    #[test]
    fn test_limits_first_non_zero() {
        let request = Limits {
            max_turns: 0,
            max_time: 30,
            max_history: 0,
            max_span: 0,
        };
        let agent = Limits {
            max_turns: 500,
            max_time: 60,
            max_history: 0,
            max_span: 10,
        };
        let limits = Limits::first_non_zero(&[request, agent, Limits::default()]);
        assert_eq!(limits.max_turns, HARD_MAX_TURNS);
        assert_eq!(limits.max_time, 30);
        assert_eq!(limits.max_history, DEFAULT_MAX_HISTORY);
        assert_eq!(limits.max_span, 10);

        let capped = Limits::first_non_zero(&[Limits {
            max_time: 5000,
            ..Limits::zero()
        }]);
        assert_eq!(capped.max_time, HARD_MAX_TIME);
    }

    #[test]
    fn test_walk_is_pre_order() {
        let root = agent(
            "root",
            vec![agent("a", vec![agent("a1", vec![])]), agent("b", vec![])],
        );
        let names: Vec<&str> = root.walk().iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["a", "a1", "b", "root"]);
    }

    #[test]
    fn test_request_limits_override() {
        let mut args = ArgMap::new();
        args.insert("max_turns".into(), serde_json::json!("3"));
        let a = agent("x", vec![]).with_request_limits(&args);
        assert_eq!(a.limits.max_turns, 3);
        assert_eq!(a.limits.max_time, DEFAULT_MAX_TIME);
    }
}
