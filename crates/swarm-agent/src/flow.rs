//! Flows: compose an agent's actions without a model.
//!
//! - `sequence` pipes each result into the next action's `query`
//! - `parallel` runs every action on the same query
//! - `choice` runs one action picked by an expression or at random
//! - `map` runs the sequence once per element of a JSON array query
//!
//! A flow with a script runs the script in the virtual shell instead, with
//! the query exported as `$query`. Actions stay callable from the script.

use std::sync::Arc;

use futures::future::join_all;
use rand::Rng;
use serde_json::Value;
use swarm_config::FlowType;
use swarm_types::{ActionResult, ArgMap};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::agent::{Action, Flow};
use crate::dispatch::Dispatcher;
use crate::error::{AgentError, Result};
use crate::runner::Runner;

pub struct FlowEngine<'a> {
    flow: &'a Flow,
    runner: Arc<Runner>,
    dispatcher: Dispatcher,
}

impl<'a> FlowEngine<'a> {
    /// An engine over `flow`, dispatching to the runner's request tools.
    pub fn new(flow: &'a Flow, runner: Arc<Runner>) -> Self {
        let dispatcher = Dispatcher::new(runner.clone(), &runner.request().tools);
        Self {
            flow,
            runner,
            dispatcher,
        }
    }

    pub async fn run(&self, query: &str) -> Result<ActionResult> {
        debug!(flow = ?self.flow.flow_type, actions = self.flow.actions.len(), "Running flow");
        if !self.flow.script.trim().is_empty() {
            return self.script(query).await;
        }
        if self.flow.actions.is_empty() {
            return Err(AgentError::bad_request("flow has neither actions nor script"));
        }
        match self.flow.flow_type {
            FlowType::Sequence => self.sequence(query).await,
            FlowType::Parallel => self.parallel(query).await,
            FlowType::Choice => self.choice(query).await,
            FlowType::Map => self.map(query).await,
        }
    }

    async fn sequence(&self, query: &str) -> Result<ActionResult> {
        let mut result = ActionResult::text(query);
        for action in &self.flow.actions {
            result = self.action(action, &result.value).await?;
        }
        Ok(result)
    }

    async fn parallel(&self, query: &str) -> Result<ActionResult> {
        let sem = self.semaphore(self.flow.actions.len());
        let runs = self.flow.actions.iter().map(|action| {
            let sem = &sem;
            async move {
                let _permit = sem
                    .acquire()
                    .await
                    .map_err(|e| AgentError::internal(e.to_string()))?;
                self.action(action, query).await
            }
        });
        let values = in_slot(join_all(runs).await)?;
        Ok(ActionResult::text(serde_json::to_string(&values)?))
    }

    async fn choice(&self, query: &str) -> Result<ActionResult> {
        let index = self.pick(query).await?;
        let action = &self.flow.actions[index];
        debug!(action = %action.name, index, "Choice");
        self.action(action, query).await
    }

    async fn map(&self, query: &str) -> Result<ActionResult> {
        let items = map_items(query);
        let sem = self.semaphore(items.len());
        let runs = items.iter().map(|item| {
            let sem = &sem;
            async move {
                let _permit = sem
                    .acquire()
                    .await
                    .map_err(|e| AgentError::internal(e.to_string()))?;
                self.sequence(item).await
            }
        });
        let values = in_slot(join_all(runs).await)?;
        Ok(ActionResult::text(serde_json::to_string(&values)?))
    }

    async fn script(&self, query: &str) -> Result<ActionResult> {
        let mut shell = self.runner.scoped_shell();
        shell.env().set("query", query);
        let out = shell.capture(&self.flow.script).await?;
        if !out.success() {
            return Err(AgentError::tool(format!(
                "flow script: exit status {}: {}",
                out.status,
                out.stderr.trim()
            )));
        }
        Ok(ActionResult::text(out.stdout.trim_end_matches('\n')))
    }

    /// Run one action, retrying failed attempts `retry` times.
    async fn action(&self, action: &Action, query: &str) -> Result<ActionResult> {
        let mut args: ArgMap = action.arguments.clone();
        args.insert("query".into(), Value::String(query.to_string()));

        let mut attempt = 0;
        loop {
            match self.dispatcher.run_tool(&action.id, args.clone()).await {
                Ok(result) => return Ok(result),
                Err(AgentError::Cancelled) => return Err(AgentError::Cancelled),
                Err(e) if attempt < self.flow.retry => {
                    attempt += 1;
                    warn!(action = %action.name, attempt, error = %e, "Flow action failed, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn semaphore(&self, n: usize) -> Semaphore {
        let permits = match self.flow.concurrency {
            0 => n.max(1),
            c => c,
        };
        Semaphore::new(permits)
    }

    /// Index of the action a choice flow runs.
    async fn pick(&self, query: &str) -> Result<usize> {
        let actions = &self.flow.actions;
        if self.flow.expression.trim().is_empty() {
            return Ok(rand::thread_rng().gen_range(0..actions.len()));
        }
        let mut data = match self.runner.template_data() {
            Value::Object(map) => map,
            _ => ArgMap::new(),
        };
        data.insert("query".into(), Value::String(query.to_string()));
        let out = self
            .runner
            .render(&self.flow.expression, &Value::Object(data))
            .await?;
        choose(actions, out.trim())
    }
}

/// Match a rendered choice expression against the actions: ID or
/// reference first, then `true`/`false`, then an index.
fn choose(actions: &[Action], key: &str) -> Result<usize> {
    if let Some(i) = actions.iter().position(|a| a.id == key || a.name == key) {
        return Ok(i);
    }
    let index = match key.to_ascii_lowercase().as_str() {
        "true" => Some(1),
        "false" => Some(0),
        other => other.parse::<usize>().ok(),
    };
    match index {
        Some(i) if i < actions.len() => Ok(i),
        _ => Err(AgentError::bad_request(format!("choice: no action matches {key:?}"))),
    }
}

/// A JSON array of strings, or the whole query as a single element.
fn map_items(query: &str) -> Vec<String> {
    match serde_json::from_str::<Vec<Value>>(query) {
        Ok(values) => values
            .into_iter()
            .map(|v| match v {
                Value::String(s) => s,
                other => other.to_string(),
            })
            .collect(),
        Err(_) => vec![query.to_string()],
    }
}

/// Result values with errors recorded in their slot. Cancellation aborts.
fn in_slot(results: Vec<Result<ActionResult>>) -> Result<Vec<String>> {
    results
        .into_iter()
        .map(|r| match r {
            Ok(r) => Ok(r.value),
            Err(AgentError::Cancelled) => Err(AgentError::Cancelled),
            Err(e) => Ok(e.to_string()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actions() -> Vec<Action> {
        ["upcase", "reverse", "count"]
            .iter()
            .map(|n| Action {
                id: format!("text__{n}"),
                name: format!("text:{n}"),
                arguments: ArgMap::new(),
            })
            .collect()
    }

    #[test]
    fn test_choose() {
        let actions = actions();
        assert_eq!(choose(&actions, "text__reverse").unwrap(), 1);
        assert_eq!(choose(&actions, "text:count").unwrap(), 2);
        assert_eq!(choose(&actions, "true").unwrap(), 1);
        assert_eq!(choose(&actions, "False").unwrap(), 0);
        assert_eq!(choose(&actions, "2").unwrap(), 2);
        assert!(choose(&actions, "3").is_err());
        assert!(choose(&actions, "nope").is_err());
    }

    #[test]
    fn test_map_items() {
        assert_eq!(map_items(r#"["a", "b"]"#), vec!["a", "b"]);
        assert_eq!(map_items("[1, 2]"), vec!["1", "2"]);
        assert_eq!(map_items("plain"), vec!["plain"]);
    }

    #[test]
    fn test_in_slot() {
        let values = in_slot(vec![
            Ok(ActionResult::text("a")),
            Err(AgentError::tool("boom")),
        ])
        .unwrap();
        assert_eq!(values, vec!["a".to_string(), "tool error: boom".to_string()]);
        assert!(in_slot(vec![Err(AgentError::Cancelled)]).is_err());
    }
}
