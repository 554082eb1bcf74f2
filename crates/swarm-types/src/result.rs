//! Action results and control states.

use serde::{Deserialize, Serialize};

/// Control state carried by a result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    #[default]
    Default,
    Exit,
    Transfer,
    InputWait,
    ToolCall,
}

impl State {
    /// Parse a state name; unknown names map to `Default`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "exit" => State::Exit,
            "transfer" => State::Transfer,
            "input_wait" => State::InputWait,
            "tool_call" => State::ToolCall,
            _ => State::Default,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            State::Default => "default",
            State::Exit => "exit",
            State::Transfer => "transfer",
            State::InputWait => "input_wait",
            State::ToolCall => "tool_call",
        }
    }

    pub fn is_default(&self) -> bool {
        *self == State::Default
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome of running an agent, a tool or a flow.
///
/// `value` is what the LLM (or the caller) sees. Binary payloads travel in
/// `content` until the dispatcher moves them into the blob store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    #[serde(default)]
    pub value: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "State::is_default")]
    pub state: State,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<u8>>,
}

impl ActionResult {
    /// Plain text result.
    pub fn text(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            ..Default::default()
        }
    }

    /// Result with an explicit MIME type and string value.
    pub fn typed(mime_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            mime_type: mime_type.into(),
            ..Default::default()
        }
    }

    /// Binary result.
    pub fn blob(mime_type: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            content: Some(content),
            ..Default::default()
        }
    }

    /// Hand control over to another agent.
    pub fn transfer(next_agent: impl Into<String>) -> Self {
        Self {
            state: State::Transfer,
            next_agent: Some(next_agent.into()),
            ..Default::default()
        }
    }

    pub fn with_state(mut self, state: State) -> Self {
        self.state = state;
        self
    }

    /// Whether the payload is text and can be handed to the LLM verbatim.
    pub fn is_text(&self) -> bool {
        self.mime_type.is_empty() || self.mime_type.starts_with("text/")
    }

    pub fn is_transfer(&self) -> bool {
        self.state == State::Transfer
    }
}

impl From<String> for ActionResult {
    fn from(value: String) -> Self {
        Self::text(value)
    }
}

impl From<&str> for ActionResult {
    fn from(value: &str) -> Self {
        Self::text(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_parse() {
        assert_eq!(State::parse("TRANSFER"), State::Transfer);
        assert_eq!(State::parse("input_wait"), State::InputWait);
        assert_eq!(State::parse("whatever"), State::Default);
    }

    #[test]
    fn test_text_detection() {
        assert!(ActionResult::text("x").is_text());
        assert!(ActionResult::typed("text/markdown", "x").is_text());
        assert!(!ActionResult::blob("image/png", vec![1, 2]).is_text());
    }

    #[test]
    fn test_transfer() {
        let r = ActionResult::transfer("next");
        assert!(r.is_transfer());
        assert_eq!(r.next_agent.as_deref(), Some("next"));
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["state"], "transfer");
        assert_eq!(json["nextAgent"], "next");
    }
}
