//! CLI command handlers.

pub mod list;
pub mod run;

use swarm_config::AppConfig;

use crate::Format;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Effective configuration after files, environment and flags.
    pub config: AppConfig,
    pub user: String,
    pub format: Format,
    /// Print the tool-call log.
    pub verbose: bool,
    /// Print nothing but the result.
    pub quiet: bool,
}
