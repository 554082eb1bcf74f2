//! Agent tools: call another agent as if it were a function.

use std::sync::Arc;

use async_trait::async_trait;
use swarm_config::ToolFunc;
use swarm_types::{ArgMap, ArgMapExt};

use super::{ToolKit, ToolOutput};
use crate::error::{AgentError, Result};
use crate::runner::Runner;

#[derive(Debug, Clone, Copy, Default)]
pub struct AgentKit;

#[async_trait]
impl ToolKit for AgentKit {
    fn name(&self) -> &str {
        "agent"
    }

    async fn call(&self, runner: &Arc<Runner>, tool: &ToolFunc, args: &ArgMap) -> Result<ToolOutput> {
        let agent = if tool.agent.is_empty() { &tool.name } else { &tool.agent };
        if agent.is_empty() {
            return Err(AgentError::bad_request("agent tool without an agent"));
        }
        let query = args.string_or_empty("query");
        let mut rest = args.clone();
        rest.remove("query");
        let result = runner.run_agent(agent, &query, rest).await?;
        Ok(ToolOutput::Result(result))
    }
}
