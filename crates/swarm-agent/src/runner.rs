//! Action runner: the handle kits, shell scripts and templates use to reach
//! back into the orchestrator.
//!
//! A runner is bound to one request. `@agent` actions become child requests
//! of that request; `/kit:name` actions go through a dispatcher over the
//! request's tools, falling back to the resolver for tools the agent does
//! not carry.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde_json::Value;
use swarm_config::ToolFunc;
use swarm_shell::{Environment, ShellError, ShellHooks, VirtualShell, is_core_util};
use swarm_types::{
    ActionResult, ArgMap, ArgMapExt, Role, ToolRef, action_agent, parse_action_args,
    parse_action_command, value_to_string,
};
use tracing::debug;

use crate::agent::Request;
use crate::dispatch::Dispatcher;
use crate::error::{AgentError, Result};
use crate::swarm::Swarm;
use crate::template::funcs::encode_md;
use crate::template::{self, TemplateFuncs};
use crate::vars::Vars;

const EXPANDENV_STUB: &str = "expandenv is not supported, use {{ .Name }} instead";

/// Template functions provided by the runner in addition to the core
/// utilities.
const HOST_FUNCS: &[&str] = &["env", "setenv", "expandenv", "ai", "asset"];

pub struct Runner {
    me: Weak<Runner>,
    swarm: Swarm,
    vars: Arc<Vars>,
    request: Arc<Request>,
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("request", &self.request.name)
            .field("chat_id", &self.vars.chat_id)
            .finish()
    }
}

impl Runner {
    pub fn new(swarm: Swarm, vars: Arc<Vars>, request: Arc<Request>) -> Arc<Self> {
        Arc::new_cyclic(|me| Runner {
            me: me.clone(),
            swarm,
            vars,
            request,
        })
    }

    pub fn swarm(&self) -> &Swarm {
        &self.swarm
    }

    pub fn vars(&self) -> &Arc<Vars> {
        &self.vars
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    fn arc(&self) -> Result<Arc<Runner>> {
        self.me
            .upgrade()
            .ok_or_else(|| AgentError::internal("runner dropped"))
    }

    /// Owner of the current agent, or the calling user.
    pub fn owner(&self) -> String {
        self.request
            .agent
            .as_ref()
            .map(|a| a.owner.clone())
            .filter(|o| !o.is_empty())
            .unwrap_or_else(|| self.vars.user.clone())
    }

    /// The secret named by the tool's `api_key`, or empty.
    pub async fn token(&self, tool: &ToolFunc) -> Result<String> {
        if tool.api_key.is_empty() {
            return Ok(String::new());
        }
        self.swarm
            .secrets()
            .get(&self.owner(), &tool.api_key)
            .await
            .map_err(|e| AgentError::Unauthorized(e.to_string()))
    }

    /// A virtual shell over the request's workspace and environment, with
    /// actions routed back through this runner.
    pub fn shell(&self) -> VirtualShell {
        self.shell_over(self.vars.env.clone())
    }

    /// Like [`Runner::shell`] but over a copy of the environment, so
    /// exports stay local to the script.
    pub fn scoped_shell(&self) -> VirtualShell {
        self.shell_over(self.vars.env.snapshot())
    }

    fn shell_over(&self, env: Environment) -> VirtualShell {
        let shell = VirtualShell::new(self.vars.workspace.clone(), env)
            .with_cancel(self.vars.cancel.clone());
        match self.me.upgrade() {
            Some(me) => shell.with_hooks(me as Arc<dyn ShellHooks>),
            None => shell,
        }
    }

    /// Whether an external command may run: always in unsafe mode, else
    /// whatever the guard decides.
    pub async fn check_command(&self, command: &str, args: &[String]) -> Result<bool> {
        if self.swarm.unsafe_mode() {
            return Ok(true);
        }
        let guard = self.swarm.guard(&self.owner()).await?;
        guard.evaluate(command, args).await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Actions
    // ─────────────────────────────────────────────────────────────────────

    /// Run agent `name` as a child of the current request.
    pub async fn run_agent(&self, name: &str, query: &str, args: ArgMap) -> Result<ActionResult> {
        debug!(parent = %self.request.name, agent = %name, "Running nested agent");
        let child = self.request.child(name, query, args);
        let resp = self.swarm.run_with(child, self.vars.clone()).await?;
        if let Some(result) = resp.result {
            return Ok(result);
        }
        let text = resp
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        Ok(ActionResult::text(text))
    }

    /// Run the tool `reference` (`kit:name`), looking it up in the current
    /// agent's tools first.
    pub async fn run_tool(&self, reference: &str, args: ArgMap) -> Result<ActionResult> {
        let r = ToolRef::decode(reference);
        if r.is_agent() {
            let query = args.string_or_empty("query");
            return self.run_agent(&r.name, &query, args).await;
        }
        let id = r.id();
        let known = self
            .request
            .tools
            .iter()
            .chain(self.request.agent.iter().flat_map(|a| a.tools.iter()))
            .find(|t| t.id() == id)
            .cloned();
        let tool = match known {
            Some(tool) => tool,
            None => self
                .swarm
                .resolver()
                .resolve_tool(&self.owner(), &r)
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| AgentError::not_found(format!("tool {r}")))?,
        };
        Dispatcher::new(self.arc()?, std::slice::from_ref(&tool))
            .execute(&tool, args)
            .await
    }

    /// Run a parsed action (see [`parse_action_args`]).
    pub async fn run_parsed(&self, argm: ArgMap) -> Result<ActionResult> {
        let query = [argm.string_or_empty("message"), argm.string_or_empty("stdin")]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        let mut args = argm.clone();
        for key in ["kit", "owner", "pack", "name", "message", "stdin"] {
            args.remove(key);
        }

        if let Some(agent) = action_agent(&argm) {
            return self.run_agent(&agent, &query, args).await;
        }
        let kit = argm
            .get_string("kit")
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AgentError::bad_request("not an action: missing agent or tool"))?;
        let name = argm.get_string("name").filter(|n| !n.is_empty()).unwrap_or_else(|| kit.clone());
        if !query.is_empty() && !args.contains_key("query") {
            args.insert("query".into(), Value::String(query));
        }
        self.run_tool(&format!("{kit}:{name}"), args).await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Templates
    // ─────────────────────────────────────────────────────────────────────

    /// Data visible to templates: the request arguments plus `query`,
    /// `agent`, `user` and `workspace`.
    pub fn template_data(&self) -> Value {
        let mut data = self.request.arguments.clone();
        data.insert("query".into(), Value::String(self.request.query.clone()));
        data.insert("agent".into(), Value::String(self.request.name.clone()));
        data.insert("user".into(), Value::String(self.vars.user.clone()));
        data.insert(
            "workspace".into(),
            Value::String(self.vars.workspace.root().display().to_string()),
        );
        Value::Object(data)
    }

    /// Render `s` if it is a template.
    pub async fn apply(&self, s: &str) -> Result<String> {
        template::apply(s, &self.template_data(), self).await
    }

    /// Render `s` unconditionally.
    pub async fn render(&self, s: &str, data: &Value) -> Result<String> {
        template::Template::parse(template::template_source(s))?
            .render(data, self)
            .await
    }

    async fn asset(&self, paths: &[String]) -> Result<String> {
        let source = self
            .request
            .agent
            .as_ref()
            .and_then(|a| a.config.as_ref())
            .and_then(|c| c.source.clone())
            .ok_or_else(|| AgentError::not_found("agent has no asset store"))?;
        if paths.is_empty() {
            return Err(AgentError::template("asset: pathname required"));
        }
        let mut content = String::new();
        for path in paths {
            let name = source.store.resolve(&source.base_dir, path);
            let data = source.store.read_file(&name).await?;
            let text = String::from_utf8(data)
                .map_err(|_| AgentError::template(format!("asset {path}: not UTF-8 text")))?;
            content.push_str(&text);
        }
        Ok(encode_md(&content))
    }

    async fn core_util(&self, name: &str, args: &[String]) -> Result<String> {
        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push(name.to_string());
        argv.extend(args.iter().cloned());
        let out = self.shell().run_command(&argv, b"").await?;
        if !out.success() {
            debug!(util = %name, status = out.status, "Core utility failed in template");
        }
        let text = out.stdout + &out.stderr;
        Ok(text.trim_end_matches('\n').to_string())
    }
}

fn string_args(args: &[Value]) -> Vec<String> {
    args.iter().filter_map(value_to_string).collect()
}

#[async_trait]
impl TemplateFuncs for Runner {
    fn has(&self, name: &str) -> bool {
        HOST_FUNCS.contains(&name) || is_core_util(name)
    }

    async fn call(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        let args = string_args(&args);
        let out = match name {
            "env" => match args.as_slice() {
                [] => self.vars.env.lines(),
                keys => keys
                    .iter()
                    .map(|k| self.vars.env.get(k).unwrap_or_default())
                    .collect::<Vec<_>>()
                    .join("\n"),
            },
            "setenv" => {
                let [key, value] = args.as_slice() else {
                    return Err(AgentError::template("setenv expects a key and a value"));
                };
                self.vars.env.set(key.clone(), value.clone());
                String::new()
            }
            "expandenv" => EXPANDENV_STUB.to_string(),
            "ai" => {
                let argm = match args.as_slice() {
                    [line] => parse_action_command(line),
                    argv => parse_action_args(argv),
                };
                let result = match argm {
                    Ok(argm) => self.run_parsed(argm).await,
                    Err(e) => Err(e.into()),
                };
                match result {
                    Ok(r) => r.value,
                    Err(AgentError::Cancelled) => return Err(AgentError::Cancelled),
                    Err(e) => e.to_string(),
                }
            }
            "asset" => self.asset(&args).await?,
            util => self.core_util(util, &args).await?,
        };
        Ok(Value::String(out))
    }
}

#[async_trait]
impl ShellHooks for Runner {
    async fn run_action(&self, argv: &[String], stdin: &str) -> swarm_shell::Result<String> {
        let mut argm = parse_action_args(argv).map_err(|e| ShellError::Action(e.to_string()))?;
        if !stdin.is_empty() {
            argm.insert("stdin".into(), Value::String(stdin.to_string()));
        }
        match self.run_parsed(argm).await {
            Ok(result) => Ok(result.value),
            Err(AgentError::Cancelled) => Err(ShellError::Cancelled),
            Err(e) => Err(ShellError::Action(e.to_string())),
        }
    }

    async fn allow_command(&self, command: &str, args: &[String]) -> swarm_shell::Result<bool> {
        self.check_command(command, args)
            .await
            .map_err(|e| ShellError::Denied(e.to_string()))
    }
}
