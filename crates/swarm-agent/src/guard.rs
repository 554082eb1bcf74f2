//! Model-assisted safety check for external commands.
//!
//! The guard asks a model whether a command line is safe to run and expects
//! a JSON verdict `{"command": "...", "safe": true}`. Anything else counts as
//! unsafe. Unsafe commands run only if the [`Confirm`] implementation agrees.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use swarm_llm::{ChatMessage, CompletionRequest, SharedBackend};
use tracing::{info, warn};

use crate::error::Result;

const SYSTEM_PROMPT: &str = "You are a security reviewer for shell commands run on a user's \
machine by an AI assistant. Decide whether the command is safe: it must not delete or \
overwrite data outside the working directory, leak credentials, change system configuration, \
escalate privileges or download and execute code. Reply with JSON only, in the form \
{\"command\": \"<the command>\", \"safe\": true|false}.";

const DENIED: &str = "Permission denied.";

/// Asks the user whether to go ahead with something the guard rejected.
#[async_trait]
pub trait Confirm: Send + Sync {
    async fn confirm(&self, prompt: &str) -> bool;
}

/// Unattended mode: always refuse.
#[derive(Debug, Clone, Copy, Default)]
pub struct Deny;

#[async_trait]
impl Confirm for Deny {
    async fn confirm(&self, _prompt: &str) -> bool {
        false
    }
}

/// Always accept.
#[derive(Debug, Clone, Copy, Default)]
pub struct Allow;

#[async_trait]
impl Confirm for Allow {
    async fn confirm(&self, _prompt: &str) -> bool {
        true
    }
}

#[derive(Debug, Deserialize)]
struct Verdict {
    #[serde(default)]
    command: String,
    safe: bool,
}

pub struct Guard {
    backend: SharedBackend,
    model: String,
    confirm: Arc<dyn Confirm>,
}

impl std::fmt::Debug for Guard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Guard")
            .field("backend", &self.backend.name())
            .field("model", &self.model)
            .finish()
    }
}

impl Guard {
    pub fn new(backend: SharedBackend, model: impl Into<String>) -> Self {
        Self {
            backend,
            model: model.into(),
            confirm: Arc::new(Deny),
        }
    }

    pub fn with_confirm(mut self, confirm: Arc<dyn Confirm>) -> Self {
        self.confirm = confirm;
        self
    }

    /// Whether `command args...` may run.
    pub async fn evaluate(&self, command: &str, args: &[String]) -> Result<bool> {
        let line = std::iter::once(command)
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        let request = CompletionRequest::new(
            self.model.clone(),
            vec![
                ChatMessage::system(SYSTEM_PROMPT),
                ChatMessage::user(format!("Command: {line}")),
            ],
        );
        let response = self.backend.complete(request).await?;

        let reason = match parse_verdict(&response.content) {
            Some(v) if v.safe => {
                info!(command = %line, "Guard approved command");
                return Ok(true);
            }
            Some(v) => format!("The command `{}` may be unsafe.", if v.command.is_empty() { &line } else { &v.command }),
            None => DENIED.to_string(),
        };
        warn!(command = %line, %reason, "Guard rejected command");
        Ok(self.confirm.confirm(&format!("{reason} Run `{line}` anyway?")).await)
    }
}

/// The first JSON object in `s`, tolerating code fences and prose.
fn parse_verdict(s: &str) -> Option<Verdict> {
    let start = s.find('{')?;
    let end = s.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&s[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarm_llm::MockBackend;

    #[test]
    fn test_parse_verdict() {
        let v = parse_verdict("```json\n{\"command\": \"ls\", \"safe\": true}\n```").unwrap();
        assert!(v.safe);
        assert_eq!(v.command, "ls");
        assert!(parse_verdict("looks fine to me").is_none());
        assert!(parse_verdict("{\"command\": \"rm\"}").is_none());
    }

    #[tokio::test]
    async fn test_safe_command() {
        let mock = Arc::new(MockBackend::with_text(r#"{"command": "ls -la", "safe": true}"#));
        let guard = Guard::new(mock.clone(), "m");
        assert!(guard.evaluate("ls", &["-la".into()]).await.unwrap());
        let sent = mock.requests();
        assert_eq!(sent[0].messages[1].content, "Command: ls -la");
    }

    #[tokio::test]
    async fn test_unsafe_asks_confirm() {
        let verdict = r#"{"command": "rm -rf /", "safe": false}"#;
        let guard = Guard::new(Arc::new(MockBackend::with_text(verdict)), "m");
        assert!(!guard.evaluate("rm", &["-rf".into(), "/".into()]).await.unwrap());

        let guard = Guard::new(Arc::new(MockBackend::with_text(verdict)), "m")
            .with_confirm(Arc::new(Allow));
        assert!(guard.evaluate("rm", &["-rf".into(), "/".into()]).await.unwrap());
    }

    #[tokio::test]
    async fn test_malformed_verdict_is_denied() {
        let guard = Guard::new(Arc::new(MockBackend::with_text("sure, go ahead")), "m");
        assert!(!guard.evaluate("curl", &[]).await.unwrap());
    }
}
