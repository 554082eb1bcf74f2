use async_trait::async_trait;
use swarm_memory::MemOption;
use tracing::{debug, warn};

use super::{Middleware, Next, RunContext};
use crate::agent::{Request, Response};
use crate::error::Result;

/// Loads recent history before the rest of the chain and saves the
/// messages the run added afterwards. Only top-level requests are saved;
/// nested agents report back through their caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct Memory;

#[async_trait]
impl Middleware for Memory {
    fn name(&self) -> &str {
        "memory"
    }

    async fn handle(
        &self,
        ctx: &RunContext,
        req: &mut Request,
        resp: &mut Response,
        next: Next<'_>,
    ) -> Result<()> {
        let limits = req.agent()?.limits;
        let opt = MemOption::new(limits.max_history, limits.max_span);
        let history = ctx.swarm.memory().load(&opt).await?;
        debug!(agent = %req.name, messages = history.len(), "History loaded");
        req.history = history;

        let initial = resp.messages.len();
        next.run(ctx, req, resp).await?;

        if !req.is_top_level() {
            return Ok(());
        }
        let added: Vec<_> = resp.messages[initial..]
            .iter()
            .cloned()
            .map(|m| m.with_chat_id(ctx.vars.chat_id.clone()))
            .collect();
        if added.is_empty() {
            return Ok(());
        }
        if let Err(e) = ctx.swarm.memory().save(&added).await {
            warn!(agent = %req.name, error = %e, "Failed to save history");
            return Err(e.into());
        }
        debug!(agent = %req.name, messages = added.len(), "History saved");
        Ok(())
    }
}
