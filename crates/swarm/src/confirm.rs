//! Yes/no confirmation on the terminal.

use async_trait::async_trait;
use console::{Term, style};
use swarm_agent::Confirm;

/// Asks on stderr and reads the answer from the terminal. Anything but
/// `y`/`yes` refuses.
#[derive(Debug, Clone, Default)]
pub struct TerminalConfirm;

impl TerminalConfirm {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Confirm for TerminalConfirm {
    async fn confirm(&self, prompt: &str) -> bool {
        let prompt = prompt.to_string();
        let answer = tokio::task::spawn_blocking(move || {
            let term = Term::stderr();
            term.write_str(&format!("{} {} ", style(prompt).yellow(), style("[y/N]").dim()))
                .ok()?;
            term.read_line().ok()
        })
        .await
        .ok()
        .flatten();
        answer.is_some_and(|a| is_yes(&a))
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
