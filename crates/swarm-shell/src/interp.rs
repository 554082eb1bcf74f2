//! Interpreter for parsed scripts.
//!
//! Output is buffered per command and routed through redirections once the
//! command finishes. Pipelines run left to right with each stage's stdout
//! feeding the next stage's stdin.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use swarm_types::is_action;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::coreutils::{self, UtilContext, UtilIo, is_core_util, short_error};
use crate::env::Environment;
use crate::error::{Result, ShellError};
use crate::exec::RestrictedExec;
use crate::syntax::{
    AndOr, Command, Connector, Param, ParamOp, Pipeline, RedirOp, Redirect, Script,
    SimpleCommand, Word, WordPart, is_name, parse,
};
use crate::vfs::Workspace;

/// `set -e`
pub const OPT_ERREXIT: &str = "option_exit";
/// `set -u`
pub const OPT_NOUNSET: &str = "option_nounset";
/// `set -x`
pub const OPT_XTRACE: &str = "option_xtrace";
/// `set -o pipefail`
pub const OPT_PIPEFAIL: &str = "option_pipefail";

const CD_DISALLOWED: &str = "cd: changing the working directory is not supported; \
     use the 'sh:exec' tool to run commands in another directory";
const EXEC_DISALLOWED: &str = "exec: replacing the shell is not supported";

const DEFAULT_IFS: &str = " \t\n";

// ─────────────────────────────────────────────────────────────────────────────
// Hooks and streams
// ─────────────────────────────────────────────────────────────────────────────

/// Callbacks into the host.
#[async_trait]
pub trait ShellHooks: Send + Sync {
    /// Run an action command (`@agent ...`, `/kit:tool ...`) and return its
    /// text output.
    async fn run_action(&self, argv: &[String], stdin: &str) -> Result<String>;

    /// Decide whether an external command may run.
    async fn allow_command(&self, _command: &str, _args: &[String]) -> Result<bool> {
        Ok(true)
    }
}

/// Cloneable in-memory writer.
#[derive(Debug, Clone, Default)]
pub struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().clone()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Caller-supplied standard streams.
pub struct Ioe {
    pub stdin: Vec<u8>,
    pub stdout: Box<dyn Write + Send>,
    pub stderr: Box<dyn Write + Send>,
}

impl Ioe {
    pub fn new(
        stdin: impl Into<Vec<u8>>,
        stdout: impl Write + Send + 'static,
        stderr: impl Write + Send + 'static,
    ) -> Self {
        Self {
            stdin: stdin.into(),
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
        }
    }

    /// Streams that write into the returned buffers.
    pub fn capture(stdin: impl Into<Vec<u8>>) -> (Self, SharedBuf, SharedBuf) {
        let out = SharedBuf::new();
        let err = SharedBuf::new();
        (Self::new(stdin, out.clone(), err.clone()), out, err)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Buffers of one command.
#[derive(Debug, Default)]
struct Io {
    stdin: Vec<u8>,
    out: Vec<u8>,
    err: Vec<u8>,
}

impl Io {
    fn new(stdin: Vec<u8>) -> Self {
        Self {
            stdin,
            ..Default::default()
        }
    }

    fn error(&mut self, msg: impl std::fmt::Display) {
        self.err.extend_from_slice(format!("{msg}\n").as_bytes());
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Sink {
    Out,
    Err,
    File(PathBuf),
    Null,
}

#[derive(Debug)]
struct Sinks {
    out: Sink,
    err: Sink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopCtl {
    Break,
    Continue,
}

// ─────────────────────────────────────────────────────────────────────────────
// Shell
// ─────────────────────────────────────────────────────────────────────────────

pub struct VirtualShell {
    vfs: Arc<Workspace>,
    env: Environment,
    hooks: Option<Arc<dyn ShellHooks>>,
    exec: RestrictedExec,
    cancel: CancellationToken,
    cwd: PathBuf,
    locals: BTreeMap<String, String>,
    positional: Vec<String>,
    status: i32,
    exited: bool,
    loop_depth: usize,
    loop_ctl: Option<LoopCtl>,
    subst_status: Option<i32>,
}

impl VirtualShell {
    pub fn new(vfs: Arc<Workspace>, env: Environment) -> Self {
        let cwd = vfs.root().to_path_buf();
        Self {
            vfs,
            env,
            hooks: None,
            exec: RestrictedExec::default(),
            cancel: CancellationToken::new(),
            cwd,
            locals: BTreeMap::new(),
            positional: Vec::new(),
            status: 0,
            exited: false,
            loop_depth: 0,
            loop_ctl: None,
            subst_status: None,
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn ShellHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_exec(mut self, exec: RestrictedExec) -> Self {
        self.exec = exec;
        self
    }

    /// Start in `dir`, relative to the workspace root.
    pub fn with_cwd(mut self, dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_string_lossy();
        self.cwd = self.vfs.resolve(self.vfs.root(), &dir)?;
        Ok(self)
    }

    /// Positional parameters `$1..`.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.positional = args;
        self
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Status of the last command.
    pub fn status(&self) -> i32 {
        self.status
    }

    /// Parse and run `script`, writing output to `ioe` after each top-level
    /// command.
    pub async fn run_script(&mut self, script: &str, ioe: &mut Ioe) -> Result<i32> {
        let parsed = parse(script)?;
        self.exited = false;
        self.loop_depth = 0;
        self.loop_ctl = None;

        let mut io = Io::new(ioe.stdin.clone());
        for item in &parsed.items {
            let res = self.step(item, &mut io, false).await;
            flush(&mut io, ioe)?;
            if res? {
                break;
            }
        }
        Ok(self.status)
    }

    /// Run a single command without parsing.
    pub async fn run_command(&mut self, argv: &[String], stdin: &[u8]) -> Result<CommandOutput> {
        let mut io = Io::new(stdin.to_vec());
        let status = self.run_argv(argv, &[], &mut io).await?;
        self.status = status;
        Ok(CommandOutput {
            status,
            stdout: String::from_utf8_lossy(&io.out).into_owned(),
            stderr: String::from_utf8_lossy(&io.err).into_owned(),
        })
    }

    /// Run `script` and collect its output.
    pub async fn capture(&mut self, script: &str) -> Result<CommandOutput> {
        let (mut ioe, out, err) = Ioe::capture(Vec::new());
        let status = self.run_script(script, &mut ioe).await?;
        Ok(CommandOutput {
            status,
            stdout: out.text(),
            stderr: err.text(),
        })
    }

    fn subshell(&self) -> Self {
        Self {
            vfs: self.vfs.clone(),
            env: self.env.snapshot(),
            hooks: self.hooks.clone(),
            exec: self.exec.clone(),
            cancel: self.cancel.clone(),
            cwd: self.cwd.clone(),
            locals: self.locals.clone(),
            positional: self.positional.clone(),
            status: self.status,
            exited: false,
            loop_depth: 0,
            loop_ctl: None,
            subst_status: None,
        }
    }

    fn option(&self, key: &str) -> bool {
        self.env.is_true(key)
    }

    fn set_option(&self, key: &str, on: bool) {
        if on {
            self.env.set(key, "true");
        } else {
            self.env.unset(key);
        }
    }

    fn check_cancel(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(ShellError::Cancelled);
        }
        Ok(())
    }

    fn set_var(&mut self, name: &str, value: String) {
        if self.env.contains(name) {
            self.env.set(name, value);
        } else {
            self.locals.insert(name.to_string(), value);
        }
    }

    fn lookup(&self, name: &str) -> Option<String> {
        match name {
            "?" => Some(self.status.to_string()),
            "#" => Some(self.positional.len().to_string()),
            "@" | "*" => Some(self.positional.join(" ")),
            "$" => Some(std::process::id().to_string()),
            "0" => Some("bash".into()),
            "-" => Some(String::new()),
            "!" => None,
            "PWD" => Some(self.cwd.display().to_string()),
            n if n.chars().all(|c| c.is_ascii_digit()) => n
                .parse::<usize>()
                .ok()
                .filter(|i| *i > 0)
                .and_then(|i| self.positional.get(i - 1).cloned()),
            n => self.locals.get(n).cloned().or_else(|| self.env.get(n)),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Control flow
    // ─────────────────────────────────────────────────────────────────────

    /// Run one list item. Returns true when execution of the enclosing
    /// script should stop.
    async fn step(&mut self, item: &AndOr, io: &mut Io, cond: bool) -> Result<bool> {
        self.check_cancel()?;
        let (status, errexit_applies) = self.exec_and_or(item, io, cond).await?;
        self.status = status;
        if !self.exited
            && errexit_applies
            && !cond
            && status != 0
            && self.option(OPT_ERREXIT)
        {
            self.exited = true;
        }
        Ok(self.exited || self.loop_ctl.is_some())
    }

    fn exec_script<'a>(
        &'a mut self,
        script: &'a Script,
        io: &'a mut Io,
        cond: bool,
    ) -> BoxFuture<'a, Result<i32>> {
        Box::pin(async move {
            for item in &script.items {
                if self.step(item, io, cond).await? {
                    break;
                }
            }
            Ok(self.status)
        })
    }

    /// Returns the status and whether `set -e` applies to it. Only the last
    /// pipeline of an `&&`/`||` list can trigger an exit.
    async fn exec_and_or(&mut self, item: &AndOr, io: &mut Io, cond: bool) -> Result<(i32, bool)> {
        let mut status = self
            .exec_pipeline(&item.first, io, cond || !item.rest.is_empty())
            .await?;
        let mut applies = item.rest.is_empty() && !item.first.negated;
        let last = item.rest.len().saturating_sub(1);
        for (i, (conn, pipeline)) in item.rest.iter().enumerate() {
            if self.exited || self.loop_ctl.is_some() {
                break;
            }
            let run = match conn {
                Connector::And => status == 0,
                Connector::Or => status != 0,
            };
            if !run {
                applies = false;
                continue;
            }
            status = self.exec_pipeline(pipeline, io, cond || i != last).await?;
            applies = i == last && !pipeline.negated;
        }
        Ok((status, applies))
    }

    async fn exec_pipeline(&mut self, pipeline: &Pipeline, io: &mut Io, cond: bool) -> Result<i32> {
        let cond = cond || pipeline.negated;
        let status = match pipeline.commands.as_slice() {
            [single] => self.exec_command(single, io, cond).await?,
            commands => {
                let was_exited = self.exited;
                let mut input = io.stdin.clone();
                let mut statuses = Vec::with_capacity(commands.len());
                for cmd in commands {
                    let mut stage = Io::new(std::mem::take(&mut input));
                    let s = self.exec_command(cmd, &mut stage, true).await?;
                    io.err.append(&mut stage.err);
                    input = stage.out;
                    statuses.push(s);
                    self.exited = was_exited;
                }
                io.out.append(&mut input);
                if self.option(OPT_PIPEFAIL) {
                    statuses.iter().rev().find(|s| **s != 0).copied().unwrap_or(0)
                } else {
                    statuses.last().copied().unwrap_or(0)
                }
            }
        };
        let status = if pipeline.negated {
            i32::from(status == 0)
        } else {
            status
        };
        self.status = status;
        Ok(status)
    }

    async fn exec_command(&mut self, cmd: &Command, io: &mut Io, cond: bool) -> Result<i32> {
        match cmd {
            Command::Simple(simple) => self.exec_simple(simple, io).await,
            Command::Group(script, redirects) => {
                let Some((mut inner, sinks)) = self.open_redirects(redirects, io).await? else {
                    return Ok(1);
                };
                let status = self.exec_script(script, &mut inner, cond).await?;
                self.route(sinks, inner, io).await;
                Ok(status)
            }
            Command::Subshell(script, redirects) => {
                let Some((mut inner, sinks)) = self.open_redirects(redirects, io).await? else {
                    return Ok(1);
                };
                let mut child = self.subshell();
                let status = child.exec_script(script, &mut inner, cond).await?;
                self.route(sinks, inner, io).await;
                Ok(status)
            }
            Command::If {
                branches,
                else_body,
            } => {
                for (test, body) in branches {
                    let s = self.exec_script(test, io, true).await?;
                    if self.exited || self.loop_ctl.is_some() {
                        return Ok(s);
                    }
                    if s == 0 {
                        return self.exec_script(body, io, cond).await;
                    }
                }
                match else_body {
                    Some(body) => self.exec_script(body, io, cond).await,
                    None => Ok(0),
                }
            }
            Command::For { var, items, body } => {
                let values = match items {
                    Some(words) => self.expand_words(words, &mut io.err).await?,
                    None => self.positional.clone(),
                };
                let mut status = 0;
                self.loop_depth += 1;
                for value in values {
                    self.check_cancel()?;
                    self.set_var(var, value);
                    status = self.exec_script(body, io, cond).await?;
                    if self.exited || self.loop_ctl.take() == Some(LoopCtl::Break) {
                        break;
                    }
                }
                self.loop_depth -= 1;
                Ok(status)
            }
            Command::While {
                until,
                cond: test,
                body,
            } => {
                let mut status = 0;
                self.loop_depth += 1;
                loop {
                    self.check_cancel()?;
                    let s = self.exec_script(test, io, true).await?;
                    if self.exited || self.loop_ctl.take() == Some(LoopCtl::Break) {
                        break;
                    }
                    if (s == 0) == *until {
                        break;
                    }
                    status = self.exec_script(body, io, cond).await?;
                    if self.exited || self.loop_ctl.take() == Some(LoopCtl::Break) {
                        break;
                    }
                }
                self.loop_depth -= 1;
                Ok(status)
            }
        }
    }

    async fn exec_simple(&mut self, cmd: &SimpleCommand, io: &mut Io) -> Result<i32> {
        self.subst_status = None;
        let mut assigns = Vec::with_capacity(cmd.assigns.len());
        for (name, word) in &cmd.assigns {
            let value = self.expand_assignment(word, &mut io.err).await?;
            assigns.push((name.clone(), value));
        }
        let argv = self.expand_words(&cmd.words, &mut io.err).await?;

        let Some((mut inner, sinks)) = self.open_redirects(&cmd.redirects, io).await? else {
            return Ok(1);
        };
        let status = if argv.is_empty() {
            for (name, value) in assigns {
                self.set_var(&name, value);
            }
            self.subst_status.take().unwrap_or(0)
        } else {
            if self.option(OPT_XTRACE) {
                io.error(format!("+ {}", argv.join(" ")));
            }
            self.run_argv(&argv, &assigns, &mut inner).await?
        };
        self.route(sinks, inner, io).await;
        Ok(status)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Commands
    // ─────────────────────────────────────────────────────────────────────

    fn run_argv<'a>(
        &'a mut self,
        argv: &'a [String],
        assigns: &'a [(String, String)],
        io: &'a mut Io,
    ) -> BoxFuture<'a, Result<i32>> {
        Box::pin(async move {
            let Some(name) = argv.first() else {
                return Ok(0);
            };
            self.check_cancel()?;
            if is_action_word(name) {
                return self.run_action(argv, io).await;
            }
            let args = &argv[1..];
            match name.as_str() {
                "cd" => Err(ShellError::Disallowed(CD_DISALLOWED.into())),
                "exec" => Err(ShellError::Disallowed(EXEC_DISALLOWED.into())),
                ":" => Ok(0),
                "set" => Ok(self.builtin_set(args, io)),
                "export" => Ok(self.builtin_export(args, io)),
                "unset" => {
                    for key in args.iter().filter(|a| !a.starts_with('-')) {
                        self.locals.remove(key);
                        self.env.unset(key);
                    }
                    Ok(0)
                }
                "exit" => Ok(self.builtin_exit(args, io)),
                "break" | "continue" => {
                    if self.loop_depth > 0 {
                        self.loop_ctl = Some(if name == "break" {
                            LoopCtl::Break
                        } else {
                            LoopCtl::Continue
                        });
                    }
                    Ok(0)
                }
                "test" => Ok(self.builtin_test(args, io)),
                "[" => match args.split_last() {
                    Some((last, rest)) if last == "]" => Ok(self.builtin_test(rest, io)),
                    _ => {
                        io.error("[: missing `]'");
                        Ok(2)
                    }
                },
                "time" => self.builtin_time(args, assigns, io).await,
                "xargs" => self.builtin_xargs(args, io).await,
                n if is_core_util(n) => self.run_core_util(argv, assigns, io).await,
                _ => self.run_external(argv, assigns, io).await,
            }
        })
    }

    async fn run_action(&mut self, argv: &[String], io: &mut Io) -> Result<i32> {
        let Some(hooks) = self.hooks.clone() else {
            io.error(format!("{}: command not found", argv[0]));
            return Ok(127);
        };
        tracing::debug!(action = %argv[0], "rerouting action from shell");
        let stdin = String::from_utf8_lossy(&io.stdin).into_owned();
        match hooks.run_action(argv, &stdin).await {
            Ok(mut text) => {
                if !text.is_empty() && !text.ends_with('\n') {
                    text.push('\n');
                }
                io.out.extend_from_slice(text.as_bytes());
                Ok(0)
            }
            Err(ShellError::Cancelled) => Err(ShellError::Cancelled),
            Err(e) => {
                io.error(format!("{}: {e}", argv[0]));
                Ok(1)
            }
        }
    }

    async fn run_core_util(
        &mut self,
        argv: &[String],
        assigns: &[(String, String)],
        io: &mut Io,
    ) -> Result<i32> {
        let env = if assigns.is_empty() {
            self.env.clone()
        } else {
            let env = self.env.snapshot();
            env.extend(assigns.iter().cloned());
            env
        };
        let ctx = UtilContext {
            vfs: &self.vfs,
            cwd: &self.cwd,
            env: &env,
            cancel: &self.cancel,
        };
        let mut uio = UtilIo {
            stdin: io.stdin.clone(),
            ..Default::default()
        };
        let status = coreutils::run(&ctx, argv, &mut uio).await?;
        io.out.append(&mut uio.out);
        io.err.append(&mut uio.err);
        Ok(status)
    }

    async fn run_external(
        &mut self,
        argv: &[String],
        assigns: &[(String, String)],
        io: &mut Io,
    ) -> Result<i32> {
        let name = &argv[0];
        if let Some(hooks) = self.hooks.clone()
            && !hooks.allow_command(name, &argv[1..]).await?
        {
            io.error(format!("{name}: permission denied"));
            return Ok(126);
        }
        let mut env = self.env.all();
        env.extend(assigns.iter().cloned());
        env.insert("PWD".into(), self.cwd.display().to_string());

        tracing::debug!(command = %name, cwd = %self.cwd.display(), "running external command");
        let out = self
            .exec
            .run(argv, &self.cwd, &env, &io.stdin, &self.cancel)
            .await?;
        io.out.extend_from_slice(&out.stdout);
        io.err.extend_from_slice(&out.stderr);
        Ok(out.status)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Builtins
    // ─────────────────────────────────────────────────────────────────────

    fn builtin_set(&mut self, args: &[String], io: &mut Io) -> i32 {
        if args.is_empty() {
            let mut vars = self.env.all();
            vars.extend(self.locals.clone());
            for (k, v) in vars {
                io.out.extend_from_slice(format!("{k}={v}\n").as_bytes());
            }
            return 0;
        }
        let mut i = 0;
        while i < args.len() {
            let arg = &args[i];
            if arg == "--" {
                self.positional = args[i + 1..].to_vec();
                break;
            }
            let (on, flags) = if let Some(f) = arg.strip_prefix('-') {
                (true, f)
            } else if let Some(f) = arg.strip_prefix('+') {
                (false, f)
            } else {
                self.positional = args[i..].to_vec();
                break;
            };
            for c in flags.chars() {
                let key = match c {
                    'e' => OPT_ERREXIT,
                    'u' => OPT_NOUNSET,
                    'x' => OPT_XTRACE,
                    'o' => {
                        i += 1;
                        match args.get(i).map(String::as_str) {
                            Some("errexit") => OPT_ERREXIT,
                            Some("nounset") => OPT_NOUNSET,
                            Some("xtrace") => OPT_XTRACE,
                            Some("pipefail") => OPT_PIPEFAIL,
                            Some(other) => {
                                io.error(format!("set: {other}: invalid option name"));
                                return 2;
                            }
                            None => {
                                for (name, key) in [
                                    ("errexit", OPT_ERREXIT),
                                    ("nounset", OPT_NOUNSET),
                                    ("pipefail", OPT_PIPEFAIL),
                                    ("xtrace", OPT_XTRACE),
                                ] {
                                    let state = if self.option(key) { "on" } else { "off" };
                                    io.out
                                        .extend_from_slice(format!("{name:<15}{state}\n").as_bytes());
                                }
                                return 0;
                            }
                        }
                    }
                    other => {
                        io.error(format!("set: -{other}: invalid option"));
                        return 2;
                    }
                };
                self.set_option(key, on);
            }
            i += 1;
        }
        0
    }

    fn builtin_export(&mut self, args: &[String], io: &mut Io) -> i32 {
        let names: Vec<&String> = args.iter().filter(|a| !a.starts_with('-')).collect();
        if names.is_empty() {
            for (k, v) in self.env.all() {
                io.out
                    .extend_from_slice(format!("export {k}={}\n", shell_words::quote(&v)).as_bytes());
            }
            return 0;
        }
        let mut status = 0;
        for arg in names {
            let (name, value) = match arg.split_once('=') {
                Some((n, v)) => (n, Some(v.to_string())),
                None => (arg.as_str(), None),
            };
            if !is_name(name) {
                io.error(format!("export: `{arg}': not a valid identifier"));
                status = 1;
                continue;
            }
            let value = value
                .or_else(|| self.locals.get(name).cloned())
                .unwrap_or_default();
            self.locals.remove(name);
            self.env.set(name, value);
        }
        status
    }

    fn builtin_exit(&mut self, args: &[String], io: &mut Io) -> i32 {
        self.exited = true;
        match args.first() {
            None => self.status,
            Some(code) => match code.parse::<i32>() {
                Ok(n) => n & 0xff,
                Err(_) => {
                    io.error(format!("exit: {code}: numeric argument required"));
                    2
                }
            },
        }
    }

    fn builtin_test(&self, args: &[String], io: &mut Io) -> i32 {
        match self.eval_test(args) {
            Ok(true) => 0,
            Ok(false) => 1,
            Err(msg) => {
                io.error(format!("test: {msg}"));
                2
            }
        }
    }

    fn eval_test(&self, args: &[String]) -> std::result::Result<bool, String> {
        if let Some(pos) = args.iter().position(|a| a == "-o") {
            return Ok(self.eval_test(&args[..pos])? || self.eval_test(&args[pos + 1..])?);
        }
        if let Some(pos) = args.iter().position(|a| a == "-a") {
            return Ok(self.eval_test(&args[..pos])? && self.eval_test(&args[pos + 1..])?);
        }
        match args {
            [] => Ok(false),
            [bang, rest @ ..] if bang == "!" => Ok(!self.eval_test(rest)?),
            [s] => Ok(!s.is_empty()),
            [op, operand] => self.unary_test(op, operand),
            [lhs, op, rhs] => binary_test(lhs, op, rhs),
            _ => Err("too many arguments".into()),
        }
    }

    fn unary_test(&self, op: &str, operand: &str) -> std::result::Result<bool, String> {
        let meta = || {
            self.vfs
                .resolve(&self.cwd, operand)
                .ok()
                .and_then(|p| std::fs::metadata(p).ok())
        };
        Ok(match op {
            "-z" => operand.is_empty(),
            "-n" => !operand.is_empty(),
            "-e" => meta().is_some(),
            "-f" => meta().is_some_and(|m| m.is_file()),
            "-d" => meta().is_some_and(|m| m.is_dir()),
            "-s" => meta().is_some_and(|m| m.len() > 0),
            "-r" => meta().is_some(),
            "-w" => meta().is_some_and(|m| !m.permissions().readonly()),
            "-x" => meta().is_some_and(|m| is_executable(&m)),
            "-L" | "-h" => self
                .vfs
                .resolve(&self.cwd, operand)
                .ok()
                .and_then(|p| std::fs::symlink_metadata(p).ok())
                .is_some_and(|m| m.file_type().is_symlink()),
            other => return Err(format!("{other}: unary operator expected")),
        })
    }

    async fn builtin_time(
        &mut self,
        args: &[String],
        assigns: &[(String, String)],
        io: &mut Io,
    ) -> Result<i32> {
        let start = Instant::now();
        let status = if args.is_empty() {
            0
        } else {
            self.run_argv(args, assigns, io).await?
        };
        io.error(format!(
            "\nreal\t{}\nuser\t0m0.000s\nsys\t0m0.000s",
            format_elapsed(start.elapsed())
        ));
        Ok(status)
    }

    /// `xargs [-n N] [-I REPL] [command...]`
    async fn builtin_xargs(&mut self, args: &[String], io: &mut Io) -> Result<i32> {
        let mut max_args: Option<usize> = None;
        let mut replace: Option<String> = None;
        let mut i = 0;
        while i < args.len() {
            let a = args[i].as_str();
            match a {
                "-n" | "-I" => {
                    i += 1;
                    let Some(v) = args.get(i) else {
                        io.error(format!("xargs: option requires an argument -- '{}'", &a[1..]));
                        return Ok(1);
                    };
                    if a == "-n" {
                        let Ok(n) = v.parse() else {
                            io.error(format!("xargs: invalid number '{v}'"));
                            return Ok(1);
                        };
                        max_args = Some(n);
                    } else {
                        replace = Some(v.clone());
                    }
                }
                "-r" | "--no-run-if-empty" => {}
                a if a.starts_with("-n") => max_args = a[2..].parse().ok(),
                a if a.starts_with('-') => {
                    io.error(format!("xargs: unsupported option '{a}'"));
                    return Ok(1);
                }
                _ => break,
            }
            i += 1;
        }
        let command: Vec<String> = if i < args.len() {
            args[i..].to_vec()
        } else {
            vec!["echo".to_string()]
        };

        let input = String::from_utf8_lossy(&io.stdin).into_owned();
        let batches: Vec<Vec<String>> = match &replace {
            Some(token) => input
                .lines()
                .filter(|l| !l.trim().is_empty())
                .map(|line| command.iter().map(|a| a.replace(token, line)).collect())
                .collect(),
            None => {
                let items = shell_words::split(&input)
                    .unwrap_or_else(|_| input.split_whitespace().map(String::from).collect());
                let n = max_args.unwrap_or(items.len()).max(1);
                items
                    .chunks(n)
                    .map(|chunk| {
                        let mut argv = command.clone();
                        argv.extend_from_slice(chunk);
                        argv
                    })
                    .collect()
            }
        };

        let mut status = 0;
        for argv in batches {
            let mut sub = Io::default();
            if self.run_argv(&argv, &[], &mut sub).await? != 0 {
                status = 123;
            }
            io.out.append(&mut sub.out);
            io.err.append(&mut sub.err);
            if self.exited {
                break;
            }
        }
        Ok(status)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Redirections
    // ─────────────────────────────────────────────────────────────────────

    /// Prepare the streams of a command. `None` means a redirection failed
    /// and the message is already on stderr.
    async fn open_redirects(
        &mut self,
        redirects: &[Redirect],
        io: &mut Io,
    ) -> Result<Option<(Io, Sinks)>> {
        let mut inner = Io::new(io.stdin.clone());
        let mut sinks = Sinks {
            out: Sink::Out,
            err: Sink::Err,
        };
        for r in redirects {
            match r.op {
                RedirOp::HereDoc => {
                    inner.stdin = self.expand_text(&r.target, &mut io.err).await?.into_bytes();
                }
                RedirOp::Read => {
                    let target = self.expand_target(&r.target, &mut io.err).await?;
                    if target == "/dev/null" {
                        inner.stdin.clear();
                        continue;
                    }
                    let read = match self.vfs.resolve(&self.cwd, &target) {
                        Ok(p) => tokio::fs::read(&p)
                            .await
                            .map_err(|e| ShellError::io(&target, e)),
                        Err(e) => Err(e),
                    };
                    match read {
                        Ok(data) => inner.stdin = data,
                        Err(e) => {
                            io.error(format!("{target}: {}", short_error(&e)));
                            return Ok(None);
                        }
                    }
                }
                RedirOp::Write | RedirOp::Append | RedirOp::WriteBoth => {
                    let target = self.expand_target(&r.target, &mut io.err).await?;
                    let sink = if target == "/dev/null" {
                        Sink::Null
                    } else {
                        match self.open_output(&target, r.op != RedirOp::Append).await {
                            Ok(p) => Sink::File(p),
                            Err(e) => {
                                io.error(format!("{target}: {}", short_error(&e)));
                                return Ok(None);
                            }
                        }
                    };
                    if r.op == RedirOp::WriteBoth {
                        sinks.out = sink.clone();
                        sinks.err = sink;
                    } else if r.fd == 2 {
                        sinks.err = sink;
                    } else {
                        sinks.out = sink;
                    }
                }
                RedirOp::Dup => {
                    let target = self.expand_target(&r.target, &mut io.err).await?;
                    let sink = match target.as_str() {
                        "1" => sinks.out.clone(),
                        "2" => sinks.err.clone(),
                        "-" => Sink::Null,
                        other => {
                            io.error(format!("{other}: bad file descriptor"));
                            return Ok(None);
                        }
                    };
                    match r.fd {
                        1 => sinks.out = sink,
                        2 => sinks.err = sink,
                        _ => {}
                    }
                }
            }
        }
        Ok(Some((inner, sinks)))
    }

    /// Create or truncate an output file.
    async fn open_output(&self, target: &str, truncate: bool) -> Result<PathBuf> {
        let path = self.vfs.resolve(&self.cwd, target)?;
        let mut opts = tokio::fs::OpenOptions::new();
        opts.create(true);
        if truncate {
            opts.write(true).truncate(true);
        } else {
            opts.append(true);
        }
        opts.open(&path)
            .await
            .map_err(|e| ShellError::io(target, e))?;
        Ok(path)
    }

    async fn route(&self, sinks: Sinks, inner: Io, io: &mut Io) {
        write_sink(&sinks.out, inner.out, io).await;
        write_sink(&sinks.err, inner.err, io).await;
    }

    // ─────────────────────────────────────────────────────────────────────
    // Expansion
    // ─────────────────────────────────────────────────────────────────────

    fn ifs(&self) -> String {
        self.lookup("IFS").unwrap_or_else(|| DEFAULT_IFS.to_string())
    }

    fn home(&self) -> String {
        self.lookup("HOME")
            .unwrap_or_else(|| self.vfs.root().display().to_string())
    }

    /// Replace a leading `~` with `$HOME`.
    fn with_tilde<'w>(&self, parts: &'w [WordPart]) -> Cow<'w, [WordPart]> {
        if let Some(WordPart::Lit(first)) = parts.first()
            && let Some(rest) = first.strip_prefix('~')
            && (rest.is_empty() || rest.starts_with('/'))
        {
            let mut owned = parts.to_vec();
            owned[0] = WordPart::Quoted(self.home());
            if !rest.is_empty() {
                owned.insert(1, WordPart::Lit(rest.to_string()));
            }
            return Cow::Owned(owned);
        }
        Cow::Borrowed(parts)
    }

    async fn expand_words(&mut self, words: &[Word], err: &mut Vec<u8>) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for w in words {
            out.extend(self.expand_word(w, err).await?);
        }
        Ok(out)
    }

    /// Full expansion: parameters, command substitution, field splitting
    /// and pathname expansion.
    async fn expand_word(&mut self, word: &Word, err: &mut Vec<u8>) -> Result<Vec<String>> {
        let parts = self.with_tilde(&word.parts);
        let mut acc = Fields::new(true, self.ifs());
        self.expand_parts(&parts, false, &mut acc, err).await?;

        let mut out = Vec::new();
        for field in acc.finish() {
            if field.glob {
                let matches = self.glob(&field.pattern);
                if !matches.is_empty() {
                    out.extend(matches);
                    continue;
                }
            }
            out.push(field.text);
        }
        Ok(out)
    }

    /// Expansion without splitting or globbing, as inside double quotes.
    async fn expand_text(&mut self, word: &Word, err: &mut Vec<u8>) -> Result<String> {
        let mut acc = Fields::new(false, String::new());
        self.expand_parts(&word.parts, true, &mut acc, err).await?;
        Ok(acc.cur.text)
    }

    async fn expand_assignment(&mut self, word: &Word, err: &mut Vec<u8>) -> Result<String> {
        let parts = self.with_tilde(&word.parts);
        let mut acc = Fields::new(false, String::new());
        self.expand_parts(&parts, false, &mut acc, err).await?;
        Ok(acc.cur.text)
    }

    /// Glob pattern with quoted parts escaped.
    async fn expand_pattern(&mut self, word: &Word, err: &mut Vec<u8>) -> Result<String> {
        let mut acc = Fields::new(false, String::new());
        self.expand_parts(&word.parts, false, &mut acc, err).await?;
        Ok(acc.cur.pattern)
    }

    async fn expand_target(&mut self, word: &Word, err: &mut Vec<u8>) -> Result<String> {
        Ok(self.expand_word(word, err).await?.join(" "))
    }

    fn expand_parts<'a>(
        &'a mut self,
        parts: &'a [WordPart],
        quoted: bool,
        acc: &'a mut Fields,
        err: &'a mut Vec<u8>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            for part in parts {
                match part {
                    WordPart::Lit(s) => acc.push(s, quoted),
                    WordPart::Quoted(s) => acc.push(s, true),
                    WordPart::Double(inner) => {
                        let only_at = matches!(
                            inner.as_slice(),
                            [WordPart::Param(Param { name, op: ParamOp::None })] if name == "@"
                        );
                        if !only_at {
                            acc.mark_quoted();
                        }
                        self.expand_parts(inner, true, acc, err).await?;
                    }
                    WordPart::Param(p) if quoted && p.name == "@" && p.op == ParamOp::None => {
                        for (i, arg) in self.positional.iter().enumerate() {
                            if i > 0 {
                                acc.break_field();
                            }
                            acc.push(arg, true);
                        }
                    }
                    WordPart::Param(p) => {
                        let value = self.param_value(p, err).await?;
                        acc.push_value(&value, quoted);
                    }
                    WordPart::Command(script) => {
                        let value = self.command_subst(script, err).await?;
                        acc.push_value(&value, quoted);
                    }
                }
            }
            Ok(())
        })
    }

    async fn param_value(&mut self, p: &Param, err: &mut Vec<u8>) -> Result<String> {
        let value = self.lookup(&p.name);
        match &p.op {
            ParamOp::None => match value {
                Some(v) => Ok(v),
                None if self.option(OPT_NOUNSET) && p.name != "!" => {
                    Err(ShellError::UnboundVariable(p.name.clone()))
                }
                None => Ok(String::new()),
            },
            ParamOp::Length => Ok(value.unwrap_or_default().chars().count().to_string()),
            ParamOp::Default { colon, word } => {
                if is_unset(&value, *colon) {
                    self.expand_text(word, err).await
                } else {
                    Ok(value.unwrap_or_default())
                }
            }
            ParamOp::Assign { colon, word } => {
                if is_unset(&value, *colon) {
                    let v = self.expand_text(word, err).await?;
                    self.set_var(&p.name, v.clone());
                    Ok(v)
                } else {
                    Ok(value.unwrap_or_default())
                }
            }
            ParamOp::Alternative { colon, word } => {
                if is_unset(&value, *colon) {
                    Ok(String::new())
                } else {
                    self.expand_text(word, err).await
                }
            }
            ParamOp::Error { colon, word } => {
                if is_unset(&value, *colon) {
                    let msg = self.expand_text(word, err).await?;
                    let message = if msg.is_empty() {
                        "parameter null or not set".to_string()
                    } else {
                        msg
                    };
                    Err(ShellError::ParameterNotSet {
                        name: p.name.clone(),
                        message,
                    })
                } else {
                    Ok(value.unwrap_or_default())
                }
            }
            ParamOp::RemovePrefix { longest, pattern } => {
                let pat = self.expand_pattern(pattern, err).await?;
                Ok(remove_prefix(&value.unwrap_or_default(), &pat, *longest))
            }
            ParamOp::RemoveSuffix { longest, pattern } => {
                let pat = self.expand_pattern(pattern, err).await?;
                Ok(remove_suffix(&value.unwrap_or_default(), &pat, *longest))
            }
        }
    }

    /// `$(...)`: run in a subshell, trailing newlines trimmed.
    async fn command_subst(&mut self, script: &Script, err: &mut Vec<u8>) -> Result<String> {
        let mut child = self.subshell();
        let mut io = Io::default();
        let status = child.exec_script(script, &mut io, false).await?;
        err.append(&mut io.err);
        self.status = status;
        self.subst_status = Some(status);
        let text = String::from_utf8_lossy(&io.out);
        Ok(text.trim_end_matches('\n').to_string())
    }

    /// Pathname expansion inside the workspace. Relative patterns yield
    /// relative paths.
    fn glob(&self, pattern: &str) -> Vec<String> {
        let absolute = pattern.starts_with('/');
        let full = if absolute {
            pattern.to_string()
        } else {
            format!(
                "{}/{pattern}",
                glob::Pattern::escape(&self.cwd.to_string_lossy())
            )
        };
        let opts = glob::MatchOptions {
            case_sensitive: true,
            require_literal_separator: true,
            require_literal_leading_dot: true,
        };
        let Ok(paths) = glob::glob_with(&full, opts) else {
            return Vec::new();
        };
        paths
            .filter_map(|p| p.ok())
            .filter(|p| p.starts_with(self.vfs.root()))
            .map(|p| {
                if absolute {
                    p.display().to_string()
                } else {
                    p.strip_prefix(&self.cwd)
                        .unwrap_or(&p)
                        .display()
                        .to_string()
                }
            })
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// First word of a command that should run as an action. A leading `/` only
/// counts in the `/kit:name` form with no `/` inside the kit, so `/tmp` and
/// `/bin/ls` stay paths.
fn is_action_word(word: &str) -> bool {
    let lower = word.to_lowercase();
    if let Some(rest) = lower.strip_prefix('/') {
        return match rest.split_once(':') {
            Some((kit, _)) => !kit.is_empty() && !kit.contains('/'),
            None => false,
        };
    }
    is_action(&lower)
}

fn is_unset(value: &Option<String>, colon: bool) -> bool {
    match value {
        None => true,
        Some(v) => colon && v.is_empty(),
    }
}

fn boundaries(value: &str) -> Vec<usize> {
    value
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(value.len()))
        .collect()
}

fn remove_prefix(value: &str, pattern: &str, longest: bool) -> String {
    let Ok(p) = glob::Pattern::new(pattern) else {
        return value.to_string();
    };
    let mut idx = boundaries(value);
    if longest {
        idx.reverse();
    }
    idx.into_iter()
        .find(|i| p.matches(&value[..*i]))
        .map(|i| value[i..].to_string())
        .unwrap_or_else(|| value.to_string())
}

fn remove_suffix(value: &str, pattern: &str, longest: bool) -> String {
    let Ok(p) = glob::Pattern::new(pattern) else {
        return value.to_string();
    };
    let mut idx = boundaries(value);
    if !longest {
        idx.reverse();
    }
    idx.into_iter()
        .find(|i| p.matches(&value[*i..]))
        .map(|i| value[..i].to_string())
        .unwrap_or_else(|| value.to_string())
}

fn binary_test(lhs: &str, op: &str, rhs: &str) -> std::result::Result<bool, String> {
    let int = |s: &str| {
        s.trim()
            .parse::<i64>()
            .map_err(|_| format!("{s}: integer expression expected"))
    };
    Ok(match op {
        "=" | "==" => lhs == rhs,
        "!=" => lhs != rhs,
        "<" => lhs < rhs,
        ">" => lhs > rhs,
        "-eq" => int(lhs)? == int(rhs)?,
        "-ne" => int(lhs)? != int(rhs)?,
        "-lt" => int(lhs)? < int(rhs)?,
        "-le" => int(lhs)? <= int(rhs)?,
        "-gt" => int(lhs)? > int(rhs)?,
        "-ge" => int(lhs)? >= int(rhs)?,
        other => return Err(format!("{other}: binary operator expected")),
    })
}

#[cfg(unix)]
fn is_executable(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(meta: &std::fs::Metadata) -> bool {
    meta.is_file()
}

fn format_elapsed(d: Duration) -> String {
    let secs = d.as_secs_f64();
    let minutes = (secs / 60.0).floor();
    format!("{}m{:.3}s", minutes as u64, secs - minutes * 60.0)
}

async fn write_sink(sink: &Sink, data: Vec<u8>, io: &mut Io) {
    if data.is_empty() {
        return;
    }
    match sink {
        Sink::Out => io.out.extend_from_slice(&data),
        Sink::Err => io.err.extend_from_slice(&data),
        Sink::Null => {}
        Sink::File(path) => {
            let res = async {
                let mut f = tokio::fs::OpenOptions::new()
                    .append(true)
                    .create(true)
                    .open(path)
                    .await?;
                f.write_all(&data).await
            }
            .await;
            if let Err(e) = res {
                io.error(format!("{}: {e}", path.display()));
            }
        }
    }
}

fn flush(io: &mut Io, ioe: &mut Ioe) -> Result<()> {
    if !io.out.is_empty() {
        ioe.stdout
            .write_all(&std::mem::take(&mut io.out))
            .map_err(|e| ShellError::io("stdout", e))?;
    }
    if !io.err.is_empty() {
        ioe.stderr
            .write_all(&std::mem::take(&mut io.err))
            .map_err(|e| ShellError::io("stderr", e))?;
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Field accumulation
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Field {
    text: String,
    pattern: String,
    glob: bool,
    started: bool,
}

impl Field {
    fn push(&mut self, s: &str, quoted: bool) {
        self.started |= quoted || !s.is_empty();
        self.text.push_str(s);
        if quoted {
            self.pattern.push_str(&glob::Pattern::escape(s));
        } else {
            self.pattern.push_str(s);
            self.glob |= s.contains(['*', '?', '[']);
        }
    }
}

struct Fields {
    split: bool,
    ifs: String,
    done: Vec<Field>,
    cur: Field,
}

impl Fields {
    fn new(split: bool, ifs: String) -> Self {
        Self {
            split,
            ifs,
            done: Vec::new(),
            cur: Field::default(),
        }
    }

    fn push(&mut self, s: &str, quoted: bool) {
        self.cur.push(s, quoted);
    }

    fn mark_quoted(&mut self) {
        self.cur.started = true;
    }

    fn break_field(&mut self) {
        self.done.push(std::mem::take(&mut self.cur));
    }

    fn end_field(&mut self) {
        if self.cur.started {
            self.break_field();
        }
    }

    /// Append an expansion result, splitting on IFS when unquoted.
    fn push_value(&mut self, value: &str, quoted: bool) {
        if quoted || !self.split || self.ifs.is_empty() {
            self.push(value, quoted);
            return;
        }
        let ifs = self.ifs.clone();
        let is_sep = |c: char| ifs.contains(c);
        let words: Vec<&str> = value.split(is_sep).filter(|w| !w.is_empty()).collect();
        if value.starts_with(is_sep) {
            self.end_field();
        }
        for (i, w) in words.iter().enumerate() {
            if i > 0 {
                self.break_field();
            }
            self.push(w, false);
        }
        if !words.is_empty() && value.ends_with(is_sep) {
            self.end_field();
        }
    }

    fn finish(mut self) -> Vec<Field> {
        self.end_field();
        self.done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell() -> (tempfile::TempDir, VirtualShell) {
        let dir = tempfile::tempdir().unwrap();
        let vfs = Arc::new(Workspace::new(dir.path()).unwrap());
        (dir, VirtualShell::new(vfs, Environment::new()))
    }

    #[test]
    fn test_action_word_detection() {
        assert!(is_action_word("@ask"));
        assert!(is_action_word("/fs:read_file"));
        assert!(is_action_word("agent:ask"));
        assert!(is_action_word("ask,"));
        assert!(is_action_word("/agent:pack/sub"));
        assert!(!is_action_word("/bin/ls"));
        assert!(!is_action_word("/tmp"));
        assert!(!is_action_word("/web"));
        assert!(!is_action_word("/usr/lib:x"));
        assert!(!is_action_word("/"));
        assert!(!is_action_word("echo"));
    }

    #[test]
    fn test_pattern_removal() {
        assert_eq!(remove_prefix("a/b/c", "*/", false), "b/c");
        assert_eq!(remove_prefix("a/b/c", "*/", true), "c");
        assert_eq!(remove_suffix("file.tar.gz", ".*", false), "file.tar");
        assert_eq!(remove_suffix("file.tar.gz", ".*", true), "file");
    }

    #[tokio::test]
    async fn test_param_expansion() {
        let (_dir, mut sh) = shell();
        let out = sh
            .capture(
                r#"x=hello; echo ${#x} ${y:-dflt} ${x:+set} ${z:=new} $z; f=a.b.c; echo ${f%.*} ${f##*.}"#,
            )
            .await
            .unwrap();
        assert_eq!(out.stdout, "5 dflt set new new\na.b c\n");
    }

    #[tokio::test]
    async fn test_field_splitting_and_quoting() {
        let (_dir, mut sh) = shell();
        let out = sh
            .capture(r#"v="a  b"; for w in $v; do echo "[$w]"; done; echo "$v""#)
            .await
            .unwrap();
        assert_eq!(out.stdout, "[a]\n[b]\na  b\n");
    }

    #[tokio::test]
    async fn test_positional_args() {
        let (_dir, sh) = shell();
        let mut sh = sh.with_args(vec!["one".into(), "two words".into()]);
        let out = sh
            .capture(r#"echo $#; for a in "$@"; do echo "<$a>"; done"#)
            .await
            .unwrap();
        assert_eq!(out.stdout, "2\n<one>\n<two words>\n");
    }

    #[tokio::test]
    async fn test_status_and_command_substitution() {
        let (_dir, mut sh) = shell();
        let out = sh
            .capture("false; echo $?; x=$(echo nested); echo \"got $x\"")
            .await
            .unwrap();
        assert_eq!(out.stdout, "1\ngot nested\n");
    }

    #[tokio::test]
    async fn test_loops_and_break() {
        let (_dir, mut sh) = shell();
        let out = sh
            .capture("for i in 1 2 3 4; do if [ $i = 3 ]; then break; fi; echo $i; done")
            .await
            .unwrap();
        assert_eq!(out.stdout, "1\n2\n");
    }
}
