//! Tool dispatch: look up a tool by ID, run it through its kit, turn the
//! output into an [`ActionResult`] and record the call.

use std::collections::HashMap;
use std::sync::Arc;

use swarm_config::ToolFunc;
use swarm_types::blob::MIME_B64_JSON;
use swarm_types::{ActionResult, ArgMap, Blob, ToolCallEntry, parse_blob_uri, value_to_string};
use tracing::{debug, warn};

use crate::error::{AgentError, Result};
use crate::runner::Runner;
use crate::toolkit::ToolOutput;

/// Per-agent dispatcher over the agent's tools, keyed by tool ID.
pub struct Dispatcher {
    runner: Arc<Runner>,
    tools: HashMap<String, ToolFunc>,
}

impl Dispatcher {
    pub fn new(runner: Arc<Runner>, tools: &[ToolFunc]) -> Self {
        let tools = tools.iter().map(|t| (t.id(), t.clone())).collect();
        Self { runner, tools }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tools.contains_key(id)
    }

    /// Run the tool with ID `id`, propagating errors.
    pub async fn run_tool(&self, id: &str, args: ArgMap) -> Result<ActionResult> {
        let tool = self
            .tools
            .get(id)
            .ok_or_else(|| AgentError::not_found(format!("tool {id}")))?;
        self.execute(tool, args).await
    }

    /// Run a tool on behalf of the LLM: errors become the result text so the
    /// model can recover on its next turn. Cancellation still propagates.
    pub async fn call(&self, id: &str, args: ArgMap) -> Result<ActionResult> {
        match self.run_tool(id, args).await {
            Ok(result) => Ok(result),
            Err(AgentError::Cancelled) => Err(AgentError::Cancelled),
            Err(e) => {
                warn!(tool = %id, error = %e, "Tool call failed");
                Ok(ActionResult::text(format!("error: {e}")))
            }
        }
    }

    /// Run `tool` with `args` layered over the tool's default arguments.
    pub async fn execute(&self, tool: &ToolFunc, args: ArgMap) -> Result<ActionResult> {
        let mut merged = tool.arguments.clone();
        merged.extend(args);

        let vars = self.runner.vars();
        if vars.cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        let entry = ToolCallEntry::new(
            uuid::Uuid::new_v4().to_string(),
            tool.kit.clone(),
            tool.name.clone(),
            merged.clone(),
        );
        debug!(tool = %tool.reference(), kind = %tool.tool_type, "Dispatching tool");

        let outcome = async {
            let kit = self.runner.swarm().tools().get_kit(tool.tool_type, &tool.kit)?;
            let output = kit.call(&self.runner, tool, &merged).await?;
            self.canonicalize(output).await
        }
        .await;

        match outcome {
            Ok(result) => {
                vars.log_tool_call(entry.with_result(result.clone()));
                Ok(result)
            }
            Err(e) => {
                vars.log_tool_call(entry.with_error(e.to_string()));
                Err(e)
            }
        }
    }

    /// Text passes through; anything else is moved into the blob store and
    /// replaced by its data URI.
    pub(crate) async fn canonicalize(&self, output: ToolOutput) -> Result<ActionResult> {
        let mut result = match output {
            ToolOutput::None => return Ok(ActionResult::text("")),
            ToolOutput::Text(s) => return Ok(ActionResult::text(s)),
            ToolOutput::Json(v) => {
                return Ok(ActionResult::text(value_to_string(&v).unwrap_or_default()));
            }
            ToolOutput::Result(r) => r,
        };

        if result.is_text() {
            if let Some(content) = result.content.take() {
                if result.value.is_empty() {
                    result.value = String::from_utf8_lossy(&content).into_owned();
                }
            }
            return Ok(result);
        }
        if result.content.is_none() && parse_blob_uri(&result.value).is_some() {
            return Ok(result);
        }

        let blob = match result.content.take() {
            Some(bytes) if result.mime_type == MIME_B64_JSON => {
                Blob::from_base64(MIME_B64_JSON, &String::from_utf8_lossy(&bytes))?
            }
            Some(bytes) => Blob::new(result.mime_type.clone(), bytes),
            None if result.mime_type == MIME_B64_JSON => Blob::from_base64(MIME_B64_JSON, &result.value)?,
            None => Blob::new(result.mime_type.clone(), result.value.clone().into_bytes()),
        };
        self.runner.swarm().blobs().put(&blob).await?;
        debug!(blob = %blob.id, mime = %blob.mime_type, "Stored tool output as blob");

        result.mime_type = blob.mime_type.clone();
        result.value = blob.uri();
        Ok(result)
    }
}
