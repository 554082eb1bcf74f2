use async_trait::async_trait;
use swarm_types::Message;
use tracing::debug;

use super::{Middleware, Next, RunContext};
use crate::agent::{Request, Response};
use crate::error::Result;
use crate::flow::FlowEngine;
use crate::inference;

/// Produces the result: the model loop, the flow, or the model loop
/// feeding the flow when the agent has both an instruction and a flow.
#[derive(Debug, Clone, Copy, Default)]
pub struct Inference;

#[async_trait]
impl Middleware for Inference {
    fn name(&self) -> &str {
        "inference"
    }

    async fn handle(
        &self,
        ctx: &RunContext,
        req: &mut Request,
        resp: &mut Response,
        next: Next<'_>,
    ) -> Result<()> {
        let agent = req.agent()?.clone();
        let Some(flow) = agent.flow.as_ref() else {
            let result = inference::run(&ctx.swarm, &ctx.vars, req, resp).await?;
            resp.result = Some(result);
            return next.run(ctx, req, resp).await;
        };

        let query = if agent.has_instruction() {
            let before = resp.messages.len();
            let seed = inference::run(&ctx.swarm, &ctx.vars, req, resp).await?;
            if seed.is_transfer() {
                resp.result = Some(seed);
                return next.run(ctx, req, resp).await;
            }
            // only the flow's answer is reported
            resp.messages.truncate(before);
            seed.value
        } else {
            req.query.clone()
        };

        debug!(agent = %agent.name, flow = ?flow.flow_type, "Running flow");
        let result = FlowEngine::new(flow, ctx.runner(req)).run(&query).await?;
        let message = Message::assistant(result.value.clone())
            .with_sender(agent.name.clone())
            .with_chat_id(ctx.vars.chat_id.clone())
            .with_content_type(result.mime_type.clone());
        req.messages.push(message.clone());
        resp.messages.push(message);
        resp.result = Some(result);

        next.run(ctx, req, resp).await
    }
}
