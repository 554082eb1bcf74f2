//! System tools: command execution, the virtual shell, workspace files and a
//! few helpers that manipulate the request itself.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use swarm_config::ToolFunc;
use swarm_shell::RestrictedExec;
use swarm_types::{ArgMap, ArgMapExt, parse_action_command};
use tracing::{debug, warn};

use super::{ToolKit, ToolOutput};
use crate::error::{AgentError, Result};
use crate::runner::Runner;

#[derive(Debug, Default)]
pub struct SystemKit {
    exec: RestrictedExec,
}

fn required(args: &ArgMap, key: &str) -> Result<String> {
    args.get_string(key)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AgentError::bad_request(format!("missing required argument: {key}")))
}

impl SystemKit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_exec(mut self, exec: RestrictedExec) -> Self {
        self.exec = exec;
        self
    }

    async fn exec(&self, runner: &Runner, args: &ArgMap) -> Result<String> {
        let command = required(args, "command")?;
        let argv = shell_words::split(&command).unwrap_or_else(|_| vec![command.clone()]);
        let (program, rest) = argv.split_first().map(|(p, r)| (p.as_str(), r)).unwrap_or(("", &[]));
        if !runner.check_command(program, rest).await? {
            warn!(command = %command, "Command denied");
            return Err(AgentError::Shell(swarm_shell::ShellError::Denied(format!(
                "{program}: permission denied"
            ))));
        }
        let vars = runner.vars();
        let out = self
            .exec
            .run_bash(&command, vars.workspace.root(), &vars.env.all(), &vars.cancel)
            .await?;
        let text = out.combined();
        if !out.success() {
            return Err(AgentError::tool(format!("exit status {}: {}", out.status, text.trim())));
        }
        Ok(text)
    }
}

#[async_trait]
impl ToolKit for SystemKit {
    fn name(&self) -> &str {
        "system"
    }

    async fn call(&self, runner: &Arc<Runner>, tool: &ToolFunc, args: &ArgMap) -> Result<ToolOutput> {
        debug!(tool = %tool.reference(), "Calling system tool");
        let vars = runner.vars();
        let out = match tool.name.as_str() {
            "exec" => self.exec(runner, args).await?,
            "bash" => {
                let script = required(args, "script")?;
                let out = runner.shell().capture(&script).await?;
                if !out.success() {
                    return Err(AgentError::tool(format!(
                        "exit status {}: {}{}",
                        out.status,
                        out.stdout,
                        out.stderr
                    )));
                }
                out.stdout
            }
            "cd" => {
                return Err(AgentError::unsupported(
                    "cd is not supported, use absolute paths instead",
                ));
            }
            "pwd" | "workspace" => vars.workspace.root().display().to_string(),
            "pass" => args.string_or_empty("query"),
            "apply" => {
                let template = required(args, "template")?;
                let Value::Object(mut data) = runner.template_data() else {
                    return Err(AgentError::internal("template data is not an object"));
                };
                data.extend(args.iter().map(|(k, v)| (k.clone(), v.clone())));
                runner.render(&template, &Value::Object(data)).await?
            }
            "parse" => {
                let command = required(args, "command")?;
                let argm = parse_action_command(&command)?;
                return Ok(ToolOutput::Json(Value::Object(argm)));
            }
            "read_file" => {
                let path = required(args, "path")?;
                vars.workspace.read_to_string(&path).await?
            }
            "write_file" => {
                let path = required(args, "path")?;
                let content = args.string_or_empty("content");
                vars.workspace.write_file(&path, content.as_bytes()).await?;
                format!("wrote {} bytes to {path}", content.len())
            }
            "list_directory" => {
                let path = args.get_string("path").unwrap_or_else(|| ".".to_string());
                vars.workspace.list_directory(&path).await?.join("\n")
            }
            other => {
                return Err(AgentError::not_found(format!("system tool {}:{other}", tool.kit)));
            }
        };
        Ok(ToolOutput::Text(out))
    }
}
