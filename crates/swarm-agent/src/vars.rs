//! Request-scoped state shared by every agent, tool, template and shell
//! script of one top-level request.

use std::sync::Arc;

use parking_lot::Mutex;
use swarm_shell::{Environment, Workspace};
use swarm_types::ToolCallEntry;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct Vars {
    /// Chat session the request belongs to.
    pub chat_id: String,
    /// Calling user, the default owner of agent references.
    pub user: String,
    /// Whitelisted process variables plus configured extras.
    pub env: Environment,
    pub workspace: Arc<Workspace>,
    pub cancel: CancellationToken,
    tool_calls: Mutex<Vec<ToolCallEntry>>,
}

impl Vars {
    pub fn new(user: impl Into<String>, env: Environment, workspace: Arc<Workspace>) -> Self {
        Self {
            chat_id: uuid::Uuid::new_v4().to_string(),
            user: user.into(),
            env,
            workspace,
            cancel: CancellationToken::new(),
            tool_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_chat_id(mut self, chat_id: impl Into<String>) -> Self {
        self.chat_id = chat_id.into();
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Append an audit entry.
    pub fn log_tool_call(&self, entry: ToolCallEntry) {
        self.tool_calls.lock().push(entry);
    }

    /// Every tool call made so far, oldest first.
    pub fn tool_calls(&self) -> Vec<ToolCallEntry> {
        self.tool_calls.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_call_log() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Arc::new(Workspace::new(dir.path()).unwrap());
        let vars = Vars::new("me@example.com", Environment::new(), ws);
        vars.log_tool_call(ToolCallEntry::new("1", "sh", "pwd", Default::default()));
        vars.log_tool_call(
            ToolCallEntry::new("2", "fs", "read_file", Default::default()).with_error("nope"),
        );
        let log = vars.tool_calls();
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].error.as_deref(), Some("nope"));
        assert!(!vars.chat_id.is_empty());
    }
}
