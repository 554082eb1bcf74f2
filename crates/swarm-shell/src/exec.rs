//! Restricted OS command execution.
//!
//! Commands run with a cleared environment, a hard timeout and
//! cancellation. On cancel or timeout the child gets SIGINT, then SIGKILL
//! after a short grace period. Where signals are unavailable the child is
//! killed directly.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, ShellError};

/// Upper bound on a single command's run time.
pub const DEFAULT_MAX_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Time between SIGINT and SIGKILL.
pub const INTERRUPT_GRACE: Duration = Duration::from_millis(100);

/// Shell used by `run_bash`.
pub const BASH: &str = "/bin/bash";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecOutput {
    pub status: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Stdout followed by stderr, lossily decoded.
    pub fn combined(&self) -> String {
        let mut s = String::from_utf8_lossy(&self.stdout).into_owned();
        s.push_str(&String::from_utf8_lossy(&self.stderr));
        s
    }
}

#[derive(Debug, Clone)]
pub struct RestrictedExec {
    max_timeout: Duration,
}

impl Default for RestrictedExec {
    fn default() -> Self {
        Self {
            max_timeout: DEFAULT_MAX_TIMEOUT,
        }
    }
}

impl RestrictedExec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the run time. Zero keeps the default.
    pub fn with_max_timeout(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.max_timeout = timeout;
        }
        self
    }

    pub fn max_timeout(&self) -> Duration {
        self.max_timeout
    }

    /// Run `argv` in `cwd` with exactly `env` as its environment.
    ///
    /// A command that cannot be found yields status 127 rather than an error.
    pub async fn run(
        &self,
        argv: &[String],
        cwd: &Path,
        env: &BTreeMap<String, String>,
        stdin: &[u8],
        cancel: &CancellationToken,
    ) -> Result<ExecOutput> {
        let Some(program) = argv.first() else {
            return Ok(ExecOutput::default());
        };

        let mut cmd = Command::new(program);
        cmd.args(&argv[1..])
            .current_dir(cwd)
            .env_clear()
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ExecOutput {
                    status: 127,
                    stdout: Vec::new(),
                    stderr: format!("{program}: command not found\n").into_bytes(),
                });
            }
            Err(source) => {
                return Err(ShellError::Spawn {
                    command: program.clone(),
                    source,
                });
            }
        };
        tracing::debug!(command = %program, pid = ?child.id(), "spawned command");

        if let Some(mut pipe) = child.stdin.take() {
            let input = stdin.to_vec();
            tokio::spawn(async move {
                let _ = pipe.write_all(&input).await;
            });
        }
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let read_out = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(mut s) = stdout {
                let _ = s.read_to_end(&mut buf).await;
            }
            buf
        });
        let read_err = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(mut s) = stderr {
                let _ = s.read_to_end(&mut buf).await;
            }
            buf
        });

        let status = tokio::select! {
            status = child.wait() => status.map_err(|source| ShellError::Spawn {
                command: program.clone(),
                source,
            })?,
            _ = cancel.cancelled() => {
                terminate(&mut child).await;
                return Err(ShellError::Cancelled);
            }
            _ = tokio::time::sleep(self.max_timeout) => {
                terminate(&mut child).await;
                return Err(ShellError::Timeout(self.max_timeout));
            }
        };

        Ok(ExecOutput {
            status: exit_code(&status),
            stdout: read_out.await.unwrap_or_default(),
            stderr: read_err.await.unwrap_or_default(),
        })
    }

    /// Run a script through `/bin/bash -c`.
    pub async fn run_bash(
        &self,
        script: &str,
        cwd: &Path,
        env: &BTreeMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<ExecOutput> {
        let argv = vec![BASH.to_string(), "-c".to_string(), script.to_string()];
        self.run(&argv, cwd, env, &[], cancel).await
    }
}

#[cfg(unix)]
fn exit_code(status: &std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: &std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

/// Interrupt, wait briefly, then kill.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SAFETY: `pid` is our own child and has not been reaped yet.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGINT);
        }
        if tokio::time::timeout(INTERRUPT_GRACE, child.wait()).await.is_ok() {
            return;
        }
    }
    let _ = child.kill().await;
}
