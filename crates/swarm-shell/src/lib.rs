//! Sandboxed shell for agent scripts.
//!
//! ```text
//! script ──▶ syntax::parse ──▶ VirtualShell
//!                                 │
//!          ┌──────────────────────┼──────────────────────┐
//!          ▼                      ▼                      ▼
//!   ShellHooks::run_action   coreutils::run        RestrictedExec
//!   (@agent, /kit:tool)      (in-process, VFS)     (timeout, SIGINT)
//! ```
//!
//! Paths resolve inside a [`Workspace`]. `cd` and `exec` are rejected; shell
//! options (`set -e`, `-u`, `-x`, `-o pipefail`) live in the request
//! [`Environment`] so tools and templates of the same request observe them.
//!
//! ```ignore
//! let vfs = Arc::new(Workspace::new("/tmp/ws")?);
//! let mut sh = VirtualShell::new(vfs, Environment::from_process());
//! let out = sh.capture("echo hi | wc -c").await?;
//! ```

pub mod coreutils;
pub mod env;
pub mod error;
pub mod exec;
pub mod interp;
pub mod syntax;
pub mod vfs;

pub use coreutils::{CORE_UTILS, is_core_util};
pub use env::{ENV_WHITELIST, Environment};
pub use error::{Result, ShellError};
pub use exec::{ExecOutput, RestrictedExec};
pub use interp::{
    CommandOutput, Ioe, OPT_ERREXIT, OPT_NOUNSET, OPT_PIPEFAIL, OPT_XTRACE, SharedBuf,
    ShellHooks, VirtualShell,
};
pub use syntax::parse;
pub use vfs::{FileInfo, Workspace};
