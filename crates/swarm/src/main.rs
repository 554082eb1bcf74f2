//! ai - run agents, tools and flows from the command line.
//!
//! ```text
//! ai @ask what is the capital of France
//! ai /sh:pwd
//! echo notes.txt | ai --stdin /fs:read_file --path notes.txt
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use console::style;
use swarm_agent::AgentError;
use swarm_config::{AppConfig, ConfigError, load_config};
use swarm_types::LogLevel;
use tracing_appender::non_blocking::WorkerGuard;

mod commands;
mod confirm;
mod runtime;

/// Exit status for runtime failures.
const RUNTIME_ERROR: u8 = 1;
/// Exit status for configuration and usage errors.
const CONFIG_ERROR: u8 = 2;

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Run agents, tools and flows from the command line
#[derive(Parser, Debug)]
#[command(name = "ai")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Action to run: `@agent message`, `/kit:tool --arg value`, or a plain
    /// message for the dispatch agent
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub action: Vec<String>,

    /// Config file (replaces ~/.ai/config.toml)
    #[arg(short, long, env = "AI_CONFIG")]
    pub config: Option<PathBuf>,

    /// Asset root holding agents/, tools/ and models/
    #[arg(long, env = "AI_BASE")]
    pub base: Option<PathBuf>,

    /// Workspace root
    #[arg(long, env = "AI_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    /// Caller identity
    #[arg(long, env = "AI_USER")]
    pub user: Option<String>,

    /// Default model, `[set/]level`
    #[arg(long, env = "AI_MODEL")]
    pub model: Option<String>,

    /// Run commands without the safety check
    #[arg(long = "unsafe", env = "AI_UNSAFE")]
    pub unsafe_mode: bool,

    /// Never prompt; unsafe commands are refused
    #[arg(long, env = "AI_UNATTENDED")]
    pub unattended: bool,

    /// Maximum inference turns
    #[arg(long, env = "AI_MAX_TURNS")]
    pub max_turns: Option<i64>,

    /// Time budget in seconds
    #[arg(long, env = "AI_MAX_TIME")]
    pub max_time: Option<i64>,

    /// Log level: quiet, info, verbose or trace
    #[arg(long, env = "AI_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Output format
    #[arg(long, value_enum, default_value_t = Format::Text, env = "AI_FORMAT")]
    pub format: Format,

    /// Read the message from standard input
    #[arg(long)]
    pub stdin: bool,

    /// List the available agents
    #[arg(long)]
    pub list: bool,

    /// Enable verbose output, including the tool-call log
    #[arg(short, long)]
    pub verbose: bool,

    /// Only print the result
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Text,
    Json,
}

impl Cli {
    /// Flags as a config layer on top of the discovered files.
    fn overrides(&self) -> AppConfig {
        AppConfig {
            base: self.base.clone(),
            workspace: self.workspace.clone(),
            user: self.user.clone().unwrap_or_default(),
            model: self.model.clone().unwrap_or_default(),
            unsafe_mode: self.unsafe_mode,
            unattended: self.unattended,
            max_turns: self.max_turns.unwrap_or_default(),
            max_time: self.max_time.unwrap_or_default(),
            log_level: self.log_level.clone().unwrap_or_default(),
            ..Default::default()
        }
    }

    fn console_level(&self, config: &AppConfig) -> LogLevel {
        if self.quiet {
            LogLevel::Quiet
        } else if self.verbose {
            LogLevel::Verbose
        } else {
            LogLevel::parse(&config.log_level)
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match configure(&cli) {
        Ok(config) => config,
        Err(e) => return fail(&e, CONFIG_ERROR),
    };
    let _guard = init_tracing(cli.console_level(&config), &config);

    let ctx = commands::Context {
        user: runtime::user(&config),
        format: cli.format,
        verbose: cli.verbose,
        quiet: cli.quiet,
        config,
    };
    let rt = match runtime::Runtime::new(&ctx) {
        Ok(rt) => rt,
        Err(e) => return fail(&e, CONFIG_ERROR),
    };

    let outcome = if cli.list {
        commands::list::run(&ctx, &rt).await
    } else {
        commands::run::run(&ctx, &rt, &cli.action, cli.stdin).await
    };
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => fail(&e, exit_code(&e)),
    }
}

fn configure(cli: &Cli) -> anyhow::Result<AppConfig> {
    let loaded = load_config(cli.config.as_deref(), cli.base.as_deref(), None)?;
    let mut config = loaded.config;
    config.merge(cli.overrides());
    Ok(config)
}

/// Console output on stderr at `level` (or `RUST_LOG`), plus a JSON file
/// rolled daily under the workspace.
fn init_tracing(level: LogLevel, config: &AppConfig) -> Option<WorkerGuard> {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::prelude::*;

    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(console_directives(level)));
    let console = tracing_subscriber::fmt::layer()
        .with_target(level >= LogLevel::Verbose)
        .with_writer(std::io::stderr)
        .with_filter(console_filter);

    let log_dir = config.logs_dir();
    if std::fs::create_dir_all(&log_dir).is_err() {
        tracing_subscriber::registry().with(console).init();
        return None;
    }
    let file_appender = tracing_appender::rolling::daily(&log_dir, "ai.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(console)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(EnvFilter::new(
                    "ai=debug,swarm_agent=debug,swarm_llm=debug,swarm_mcp=debug,swarm_shell=debug,swarm_config=debug,info",
                )),
        )
        .init();
    Some(guard)
}

fn console_directives(level: LogLevel) -> String {
    match level {
        LogLevel::Quiet => "error".to_string(),
        LogLevel::Info => "ai=info,swarm_agent=info,warn".to_string(),
        other => {
            let d = other.filter_directive();
            format!("ai={d},swarm_agent={d},swarm_llm={d},swarm_mcp={d},swarm_shell={d},swarm_config={d},info")
        }
    }
}

/// 2 for configuration and action syntax errors, 1 otherwise.
fn exit_code(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<AgentError>() {
            return if e.is_config() { CONFIG_ERROR } else { RUNTIME_ERROR };
        }
        if cause.is::<ConfigError>() || cause.is::<swarm_types::Error>() {
            return CONFIG_ERROR;
        }
    }
    RUNTIME_ERROR
}

fn fail(err: &anyhow::Error, code: u8) -> ExitCode {
    eprintln!("{} {err:#}", style("Error:").red().bold());
    ExitCode::from(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let err = anyhow::Error::new(AgentError::Timeout("1s".into()));
        assert_eq!(exit_code(&err), RUNTIME_ERROR);

        let err = anyhow::Error::new(AgentError::from(ConfigError::not_found("agents/x")));
        assert_eq!(exit_code(&err), CONFIG_ERROR);

        let err = anyhow::Error::new(swarm_types::Error::bad_request("bad flag")).context("parsing");
        assert_eq!(exit_code(&err), CONFIG_ERROR);

        assert_eq!(exit_code(&anyhow::anyhow!("boom")), RUNTIME_ERROR);
    }

    #[test]
    fn test_overrides_win() {
        let cli = Cli::parse_from(["ai", "--model", "openai/L2", "--max-turns", "3", "@x", "hi"]);
        let mut config = AppConfig {
            model: "default/any".into(),
            max_turns: 8,
            max_time: 60,
            ..Default::default()
        };
        config.merge(cli.overrides());
        assert_eq!(config.model, "openai/L2");
        assert_eq!(config.max_turns, 3);
        assert_eq!(config.max_time, 60);
        assert_eq!(cli.action, ["@x", "hi"]);
    }

    #[test]
    fn test_action_flags_stay_with_action() {
        let cli = Cli::parse_from(["ai", "-v", "/fs:read_file", "--path", "a.txt"]);
        assert!(cli.verbose);
        assert_eq!(cli.action, ["/fs:read_file", "--path", "a.txt"]);
    }
}
