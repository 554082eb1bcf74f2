//! List the agents visible to the caller.

use anyhow::Result;
use console::style;
use serde_json::json;

use super::Context;
use crate::Format;
use crate::runtime::Runtime;

pub async fn run(ctx: &Context, rt: &Runtime) -> Result<()> {
    let packs = rt.swarm.resolver().assets().list_agents(&ctx.user).await?;
    let agents: Vec<(String, String)> = packs
        .values()
        .flat_map(|pack| pack.agents.iter())
        .map(|a| (a.name.clone(), a.description.clone()))
        .collect();

    match ctx.format {
        Format::Json => {
            let list: Vec<_> = agents
                .iter()
                .map(|(name, description)| json!({"name": name, "description": description}))
                .collect();
            println!("{}", serde_json::to_string_pretty(&list)?);
        }
        Format::Text => {
            if agents.is_empty() {
                if !ctx.quiet {
                    println!("{}", style("No agents found.").dim());
                }
                return Ok(());
            }
            let width = agents.iter().map(|(n, _)| n.len()).max().unwrap_or(0);
            for (name, description) in &agents {
                println!(
                    "{}  {}",
                    style(format!("@{name:<width$}")).cyan(),
                    description.lines().next().unwrap_or_default()
                );
            }
        }
    }
    Ok(())
}
