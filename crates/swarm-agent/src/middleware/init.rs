use async_trait::async_trait;
use swarm_types::{ArgMap, ArgMapExt, LogLevel, merge_args, value_to_string};
use tracing::debug;

use super::{Middleware, Next, RunContext};
use crate::agent::{Request, Response};
use crate::error::Result;

/// Merges the agent's default arguments under the request's, exports the
/// agent environment and applies a `log_level` override.
#[derive(Debug, Clone, Copy, Default)]
pub struct InitEnv;

#[async_trait]
impl Middleware for InitEnv {
    fn name(&self) -> &str {
        "init"
    }

    async fn handle(
        &self,
        ctx: &RunContext,
        req: &mut Request,
        resp: &mut Response,
        next: Next<'_>,
    ) -> Result<()> {
        let agent = req.agent()?;
        let mut args: ArgMap = agent.arguments.clone();
        merge_args(&mut args, &req.arguments);

        for (key, value) in &agent.environment {
            if let Some(v) = value_to_string(value) {
                ctx.vars.env.set(key.clone(), v);
            }
        }

        let level = args.get_string("log_level").filter(|l| !l.is_empty());
        if let (Some(level), Some(agent)) = (level, req.agent.as_mut()) {
            agent.log_level = LogLevel::parse(&level);
        }
        debug!(agent = %req.name, args = args.len(), "Request initialized");
        req.arguments = args;

        next.run(ctx, req, resp).await
    }
}
