//! Run one action: an agent, a tool, or a message for the dispatch agent.

use std::sync::Arc;

use anyhow::{Result, bail};
use console::style;
use serde_json::Value;
use swarm_agent::{Request, Runner};
use swarm_config::DISPATCH_AGENT;
use swarm_types::{AGENT_KIT, ActionResult, ArgMap, parse_action_args};
use tokio::io::AsyncReadExt;
use tracing::debug;

use super::Context;
use crate::Format;
use crate::runtime::Runtime;

/// Run the action given on the command line and print its result.
pub async fn run(ctx: &Context, rt: &Runtime, words: &[String], stdin: bool) -> Result<()> {
    let input = if stdin {
        let mut buf = String::new();
        tokio::io::stdin().read_to_string(&mut buf).await?;
        buf
    } else {
        String::new()
    };
    let argm = action(words, &input)?;
    debug!(action = ?argm, "Parsed action");

    let root = Request::new(DISPATCH_AGENT, "");
    let runner = Runner::new(rt.swarm.clone(), rt.vars.clone(), Arc::new(root));
    let result = runner.run_parsed(argm).await;

    if ctx.verbose {
        print_tool_calls(rt);
    }
    print_result(ctx, &result?)
}

/// Parse the command words; plain text goes to the dispatch agent.
fn action(words: &[String], stdin: &str) -> Result<ArgMap> {
    if words.is_empty() && stdin.trim().is_empty() {
        bail!(swarm_types::Error::bad_request(
            "nothing to do: give an action or a message, see --help"
        ));
    }
    let mut argm = parse_action_args(words)?;
    if !stdin.is_empty() {
        argm.insert("stdin".into(), Value::String(stdin.to_string()));
    }
    if !argm.contains_key("kit") {
        argm.insert("kit".into(), Value::String(AGENT_KIT.to_string()));
        argm.insert("pack".into(), Value::String(DISPATCH_AGENT.to_string()));
    }
    Ok(argm)
}

fn print_result(ctx: &Context, result: &ActionResult) -> Result<()> {
    match ctx.format {
        Format::Json => println!("{}", serde_json::to_string_pretty(result)?),
        Format::Text => println!("{}", result.value),
    }
    Ok(())
}

fn print_tool_calls(rt: &Runtime) {
    for entry in rt.vars.tool_calls() {
        let status = match &entry.error {
            Some(e) => style(format!("failed: {e}")).red(),
            None => style("done".to_string()).green(),
        };
        let args = serde_json::to_string(&entry.arguments).unwrap_or_default();
        eprintln!(
            "{} {}:{} {} [{}]",
            style("tool").dim(),
            entry.kit,
            entry.name,
            style(args).dim(),
            status
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(s: &[&str]) -> Vec<String> {
        s.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_plain_message_goes_to_dispatcher() {
        let argm = action(&words(&["what", "time", "is", "it"]), "").unwrap();
        assert_eq!(argm["kit"], "agent");
        assert_eq!(argm["pack"], "agent");
        assert_eq!(argm["message"], "what time is it");
    }

    #[test]
    fn test_tool_action_and_stdin() {
        let argm = action(&words(&["/fs:read_file", "--path", "a.txt"]), "piped").unwrap();
        assert_eq!(argm["kit"], "fs");
        assert_eq!(argm["name"], "read_file");
        assert_eq!(argm["path"], "a.txt");
        assert_eq!(argm["stdin"], "piped");
    }

    #[test]
    fn test_empty_is_an_error() {
        assert!(action(&[], "").is_err());
        assert!(action(&[], "from stdin").is_ok());
    }
}
