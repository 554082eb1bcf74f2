use async_trait::async_trait;
use swarm_config::ToolFunc;
use swarm_types::tool_id;
use tracing::debug;

use super::{Middleware, Next, RunContext};
use crate::agent::{Agent, Request, Response};
use crate::error::Result;

/// Flattens the tools of the embed tree into the request.
#[derive(Debug, Clone, Copy, Default)]
pub struct Tools;

#[async_trait]
impl Middleware for Tools {
    fn name(&self) -> &str {
        "tools"
    }

    async fn handle(
        &self,
        ctx: &RunContext,
        req: &mut Request,
        resp: &mut Response,
        next: Next<'_>,
    ) -> Result<()> {
        let agent = req.agent()?;
        req.tools = effective_tools(agent);
        debug!(agent = %req.name, tools = req.tools.len(), "Tools assembled");
        next.run(ctx, req, resp).await
    }
}

/// Tools in embed pre-order, the agent's own last. A later tool with the
/// same ID replaces the earlier one in place. The agent never sees itself
/// as a tool.
pub(crate) fn effective_tools(agent: &Agent) -> Vec<ToolFunc> {
    let own_id = tool_id(swarm_types::AGENT_KIT, &agent.name);
    let mut tools: Vec<ToolFunc> = Vec::new();
    for tool in agent.walk().into_iter().flat_map(|a| a.tools.iter()) {
        let id = tool.id();
        if id == own_id {
            continue;
        }
        match tools.iter().position(|t| t.id() == id) {
            Some(i) => tools[i] = tool.clone(),
            None => tools.push(tool.clone()),
        }
    }
    tools
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Limits;
    use swarm_config::ToolType;
    use swarm_types::{ArgMap, LogLevel};

    fn agent(name: &str, tools: Vec<ToolFunc>, embed: Vec<Agent>) -> Agent {
        Agent {
            owner: String::new(),
            name: name.into(),
            display: String::new(),
            description: String::new(),
            adapter: String::new(),
            instruction: None,
            context: String::new(),
            message: String::new(),
            model: None,
            model_ref: String::new(),
            tools,
            environment: ArgMap::new(),
            arguments: ArgMap::new(),
            embed,
            flow: None,
            log_level: LogLevel::default(),
            limits: Limits::default(),
            config: None,
        }
    }

    fn tool(kit: &str, name: &str, description: &str) -> ToolFunc {
        ToolFunc::new(ToolType::System, kit, name).with_description(description)
    }

    #[test]
    fn test_later_insertion_wins() {
        let child = agent("child", vec![tool("sh", "pwd", "child"), tool("fs", "read_file", "child")], vec![]);
        let root = agent(
            "root",
            vec![tool("sh", "pwd", "root"), tool("agent", "root", "self")],
            vec![child],
        );
        let tools = effective_tools(&root);
        let ids: Vec<String> = tools.iter().map(ToolFunc::id).collect();
        assert_eq!(ids, vec!["sh__pwd", "fs__read_file"]);
        assert_eq!(tools[0].description, "root");
    }
}
