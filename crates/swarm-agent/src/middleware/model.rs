use async_trait::async_trait;
use swarm_types::ArgMap;
use tracing::{debug, info};

use super::{Middleware, Next, RunContext};
use crate::agent::{Request, Response};
use crate::error::{AgentError, Result};

/// Settles the model: `@agent` references are answered by running that
/// agent, whose reply is a `[set/]level` reference. Then the model's API
/// key is looked up.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelStage;

#[async_trait]
impl Middleware for ModelStage {
    fn name(&self) -> &str {
        "model"
    }

    async fn handle(
        &self,
        ctx: &RunContext,
        req: &mut Request,
        resp: &mut Response,
        next: Next<'_>,
    ) -> Result<()> {
        let agent = req.agent()?.clone();
        let mut model = agent.model.clone();

        if agent.has_agent_model() {
            let chooser = agent.model_ref.trim().trim_start_matches('@');
            let runner = ctx.resolving_runner(req);
            let answer = runner.run_agent(chooser, &req.query, ArgMap::new()).await?;
            let choice = answer.value.trim();
            info!(agent = %agent.name, chooser, choice, "Model chosen by agent");
            let resolved = ctx
                .swarm
                .resolver()
                .resolve_model(&agent.owner, agent.config.as_deref(), choice)
                .await?;
            model = Some(resolved);
        }

        if let Some(m) = &model {
            if !m.api_key.is_empty() {
                req.token = ctx
                    .swarm
                    .secrets()
                    .get(&agent.owner, &m.api_key)
                    .await
                    .map_err(|e| AgentError::Unauthorized(format!("{}: {e}", m.api_key)))?;
            }
            debug!(agent = %agent.name, provider = %m.provider, model = %m.model, "Model ready");
        }
        req.model = model;

        next.run(ctx, req, resp).await
    }
}
