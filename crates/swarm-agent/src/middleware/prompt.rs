//! Prompt assembly: system instruction, user query and conversation context.

use async_trait::async_trait;
use serde_json::Value;
use swarm_types::{ArgMap, ArgMapExt, Message, Role, parse_action_command};
use tracing::debug;

use super::{Middleware, Next, RunContext};
use crate::agent::{Request, Response};
use crate::error::Result;
use crate::runner::Runner;

/// Content of the form `@agent ...` is replaced by that agent's answer,
/// with `query` as the message unless the content carries its own.
async fn resolve_agent_content(runner: &Runner, content: String, query: &str) -> Result<String> {
    let trimmed = content.trim();
    if !trimmed.starts_with('@') {
        return Ok(content);
    }
    let mut argm = parse_action_command(trimmed)?;
    if argm.string_or_empty("message").is_empty() {
        argm.insert("message".into(), Value::String(query.to_string()));
    }
    Ok(runner.run_parsed(argm).await?.value)
}

/// Builds the system instruction from the embed tree, depth first, then the
/// agent's own.
#[derive(Debug, Clone, Copy, Default)]
pub struct Instruction;

#[async_trait]
impl Middleware for Instruction {
    fn name(&self) -> &str {
        "instruction"
    }

    async fn handle(
        &self,
        ctx: &RunContext,
        req: &mut Request,
        resp: &mut Response,
        next: Next<'_>,
    ) -> Result<()> {
        let agent = req.agent()?.clone();
        let runner = ctx.resolving_runner(req);

        let mut parts = Vec::new();
        for a in agent.walk() {
            let Some(instruction) = a.instruction.as_ref() else {
                continue;
            };
            if instruction.content.trim().is_empty() {
                continue;
            }
            let content = if instruction.is_template() {
                runner.render(&instruction.content, &runner.template_data()).await?
            } else {
                runner.apply(&instruction.content).await?
            };
            let content = resolve_agent_content(&runner, content, &req.query).await?;
            if !content.trim().is_empty() {
                parts.push(content);
            }
        }
        req.instruction = parts.join("\n");
        debug!(agent = %agent.name, len = req.instruction.len(), "Instruction resolved");

        next.run(ctx, req, resp).await
    }
}

/// Prefixes the user query with the agent's supplementary message.
#[derive(Debug, Clone, Copy, Default)]
pub struct Query;

#[async_trait]
impl Middleware for Query {
    fn name(&self) -> &str {
        "query"
    }

    async fn handle(
        &self,
        ctx: &RunContext,
        req: &mut Request,
        resp: &mut Response,
        next: Next<'_>,
    ) -> Result<()> {
        let message = req.agent()?.message.clone();
        if !message.trim().is_empty() {
            let runner = ctx.resolving_runner(req);
            let message = runner.apply(&message).await?;
            let message = resolve_agent_content(&runner, message, &req.query).await?;
            req.query = [message, std::mem::take(&mut req.query)]
                .into_iter()
                .filter(|s| !s.trim().is_empty())
                .collect::<Vec<_>>()
                .join("\n");
        }
        next.run(ctx, req, resp).await
    }
}

/// Lays out the transcript: system instruction, replayed history (or the
/// output of the agent's context agent), then the user query.
#[derive(Debug, Clone, Copy, Default)]
pub struct Context;

#[async_trait]
impl Middleware for Context {
    fn name(&self) -> &str {
        "context"
    }

    async fn handle(
        &self,
        ctx: &RunContext,
        req: &mut Request,
        resp: &mut Response,
        next: Next<'_>,
    ) -> Result<()> {
        let agent = req.agent()?.clone();
        let context = agent.context.trim().trim_start_matches('@');
        let history = if context.is_empty() {
            req.history.clone()
        } else {
            let runner = ctx.resolving_runner(req);
            let result = runner.run_agent(context, &req.query, ArgMap::new()).await?;
            context_messages(&result.value)
        };

        let mut messages = Vec::with_capacity(history.len() + 2);
        if !req.instruction.trim().is_empty() {
            messages.push(Message::system(req.instruction.clone()).with_sender(agent.name.clone()));
        }
        messages.extend(history.into_iter().filter(|m| m.role != Role::System));

        let user = Message::user(req.query.clone())
            .with_sender(ctx.vars.user.clone())
            .with_chat_id(ctx.vars.chat_id.clone());
        messages.push(user.clone());
        req.messages = messages;
        resp.messages.push(user);

        next.run(ctx, req, resp).await
    }
}

/// Messages produced by a context agent: a JSON message list, or the whole
/// text as one context message.
fn context_messages(value: &str) -> Vec<Message> {
    match serde_json::from_str::<Vec<Message>>(value) {
        Ok(messages) => messages.into_iter().map(Message::as_context).collect(),
        Err(_) if value.trim().is_empty() => Vec::new(),
        Err(_) => vec![Message::user(value).as_context()],
    }
}
