//! Function tools: native Rust handlers registered by the embedding
//! application, or scripted bodies declared in the pack.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use swarm_config::ToolFunc;
use swarm_types::{ArgMap, value_to_string};
use tracing::debug;

use super::{ToolKit, ToolOutput};
use crate::error::{AgentError, Result};
use crate::runner::Runner;

/// A native tool handler.
pub type NativeFn = Arc<dyn Fn(ArgMap) -> BoxFuture<'static, Result<ToolOutput>> + Send + Sync>;

#[derive(Clone, Default)]
pub struct FuncKit {
    funcs: HashMap<String, NativeFn>,
}

impl std::fmt::Debug for FuncKit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.funcs.keys().collect();
        names.sort();
        f.debug_struct("FuncKit").field("funcs", &names).finish()
    }
}

impl FuncKit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a native handler for `kit:name`.
    pub fn with_func(mut self, reference: impl Into<String>, f: NativeFn) -> Self {
        self.funcs.insert(reference.into(), f);
        self
    }

    async fn run_body(&self, runner: &Arc<Runner>, tool: &ToolFunc, args: &ArgMap) -> Result<ToolOutput> {
        let Some(body) = tool.body.as_ref() else {
            return Err(AgentError::not_found(format!("no function registered for {}", tool.reference())));
        };
        if body.code.trim().is_empty() {
            return Err(AgentError::bad_request(format!("{}: empty function body", tool.reference())));
        }
        match body.lang() {
            "template" | "tpl" => {
                let Value::Object(mut data) = runner.template_data() else {
                    return Err(AgentError::internal("template data is not an object"));
                };
                data.extend(args.iter().map(|(k, v)| (k.clone(), v.clone())));
                let out = runner.render(&body.code, &Value::Object(data)).await?;
                Ok(ToolOutput::Text(out))
            }
            "bash" | "sh" => {
                let mut shell = runner.scoped_shell();
                for (key, value) in args {
                    if let Some(s) = value_to_string(value) {
                        shell.env().set(key.clone(), s);
                    }
                }
                let out = shell.capture(&body.code).await?;
                if !out.success() {
                    let detail = if out.stderr.trim().is_empty() { out.stdout } else { out.stderr };
                    return Err(AgentError::tool(format!(
                        "{}: exit status {}: {}",
                        tool.reference(),
                        out.status,
                        detail.trim()
                    )));
                }
                Ok(ToolOutput::Text(out.stdout))
            }
            other => Err(AgentError::unsupported(format!("function language {other:?}"))),
        }
    }
}

#[async_trait]
impl ToolKit for FuncKit {
    fn name(&self) -> &str {
        "func"
    }

    async fn call(&self, runner: &Arc<Runner>, tool: &ToolFunc, args: &ArgMap) -> Result<ToolOutput> {
        if let Some(f) = self.funcs.get(&tool.reference()) {
            debug!(tool = %tool.reference(), "Calling native function");
            return f(args.clone()).await;
        }
        self.run_body(runner, tool, args).await
    }
}
