//! The LLM loop: call the adapter, run requested tools, repeat until the
//! model answers without tool calls or the turn budget runs out.

use std::sync::Arc;

use serde_json::Value;
use swarm_llm::{BackendConfig, ChatMessage, SharedBackend, ToolCall, ToolDefinition};
use swarm_types::{ActionResult, ArgMap, Message};
use tracing::{debug, info, warn};

use crate::adapter::Turn;
use crate::agent::{Request, Response};
use crate::dispatch::Dispatcher;
use crate::error::{AgentError, Result};
use crate::runner::Runner;
use crate::swarm::Swarm;
use crate::toolkit::ToolOutput;
use crate::vars::Vars;

/// Run the inference loop for the request's agent.
///
/// The final assistant message is appended to both `req.messages` and
/// `resp.messages`. A tool returning a transfer ends the loop early with
/// that result.
pub async fn run(
    swarm: &Swarm,
    vars: &Arc<Vars>,
    req: &mut Request,
    resp: &mut Response,
) -> Result<ActionResult> {
    let agent = req.agent()?.clone();
    let adapter = swarm.adapters().get(agent.adapter())?;
    let backend = if adapter.needs_model() {
        Some(backend(swarm, req)?)
    } else {
        None
    };
    let max_turns = agent.limits.max_turns;

    let runner = Runner::new(swarm.clone(), vars.clone(), Arc::new(req.clone()));
    let dispatcher = Dispatcher::new(runner, &req.tools);
    let tools: Vec<ToolDefinition> = req
        .tools
        .iter()
        .map(|t| ToolDefinition::new(t.id(), t.description.clone(), t.parameters.clone()))
        .collect();
    let mut transcript: Vec<ChatMessage> = req.messages.iter().map(ChatMessage::from).collect();

    let mut turn = 0i64;
    loop {
        turn += 1;
        if vars.cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        if turn > max_turns {
            warn!(agent = %agent.name, max_turns, "Max turns exceeded");
            return Err(AgentError::MaxTurns(max_turns));
        }

        debug!(
            agent = %agent.name,
            turn,
            messages = transcript.len(),
            tools = tools.len(),
            "Calling adapter"
        );
        let reply = {
            let t = Turn {
                agent: &agent.name,
                model: req.model.as_ref(),
                instruction: &req.instruction,
                query: &req.query,
                messages: &transcript,
                tools: &tools,
                arguments: &req.arguments,
            };
            adapter.call(backend.clone(), &t).await?
        };

        if reply.tool_calls.is_empty() {
            let result = reply.result.unwrap_or_else(|| ActionResult::text(reply.content));
            let result = dispatcher.canonicalize(ToolOutput::Result(result)).await?;
            let message = Message::assistant(result.value.clone())
                .with_sender(agent.name.clone())
                .with_chat_id(vars.chat_id.clone())
                .with_content_type(result.mime_type.clone());
            req.messages.push(message.clone());
            resp.messages.push(message);
            info!(agent = %agent.name, turns = turn, "Inference completed");
            return Ok(result);
        }

        info!(
            agent = %agent.name,
            turn,
            tools = %reply.tool_calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>().join(", "),
            "Executing tools"
        );
        transcript.push(ChatMessage::assistant_calls(reply.content, reply.tool_calls.clone()));
        for call in &reply.tool_calls {
            let result = match call_arguments(call) {
                Ok(args) => dispatcher.call(&call.name, args).await?,
                Err(e) => ActionResult::text(format!("error: {e}")),
            };
            transcript.push(ChatMessage::tool(call.id.clone(), result.value.clone()));
            req.messages.push(
                Message::tool(call.id.clone(), result.value.clone()).with_chat_id(vars.chat_id.clone()),
            );
            if result.is_transfer() {
                info!(agent = %agent.name, next = ?result.next_agent, "Transfer requested");
                return Ok(result);
            }
        }
    }
}

/// Backend for the request's model, authenticated with the resolved token.
fn backend(swarm: &Swarm, req: &Request) -> Result<SharedBackend> {
    let model = req
        .model
        .as_ref()
        .ok_or_else(|| AgentError::bad_request(format!("agent {} has no model", req.name)))?;
    let mut config = BackendConfig::new();
    if !model.base_url.is_empty() {
        config = config.with_base_url(model.base_url.clone());
    }
    if !req.token.is_empty() {
        config = config.with_api_key(req.token.clone());
    }
    Ok(swarm.providers().create(&model.provider, config)?)
}

/// Tool-call arguments as a map. Providers may send the object encoded as
/// a JSON string.
fn call_arguments(call: &ToolCall) -> Result<ArgMap> {
    match &call.arguments {
        Value::Object(map) => Ok(map.clone()),
        Value::Null => Ok(ArgMap::new()),
        Value::String(s) if s.trim().is_empty() => Ok(ArgMap::new()),
        Value::String(s) => match serde_json::from_str(s)? {
            Value::Object(map) => Ok(map),
            _ => Err(AgentError::bad_request(format!("{}: arguments are not an object", call.name))),
        },
        _ => Err(AgentError::bad_request(format!("{}: arguments are not an object", call.name))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_call_arguments() {
        let call = ToolCall::new("1", "sh__pwd", json!({"a": 1}));
        assert_eq!(call_arguments(&call).unwrap()["a"], json!(1));

        let call = ToolCall::new("2", "sh__pwd", json!("{\"b\": \"x\"}"));
        assert_eq!(call_arguments(&call).unwrap()["b"], json!("x"));

        let call = ToolCall::new("3", "sh__pwd", json!(""));
        assert!(call_arguments(&call).unwrap().is_empty());

        let call = ToolCall::new("4", "sh__pwd", json!([1, 2]));
        assert!(call_arguments(&call).is_err());
    }
}
