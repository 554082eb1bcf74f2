//! Conversation messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Assistant,
    User,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::Assistant => "assistant",
            Role::User => "user",
            Role::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "system" => Ok(Role::System),
            "assistant" => Ok(Role::Assistant),
            "user" => Ok(Role::User),
            "tool" => Ok(Role::Tool),
            other => Err(crate::Error::bad_request(format!("unknown role: {other}"))),
        }
    }
}

/// An immutable conversation record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    #[serde(default, rename = "chatId")]
    pub chat_id: String,
    pub created: DateTime<Utc>,
    pub role: Role,
    #[serde(default)]
    pub sender: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content_type: String,
    #[serde(default)]
    pub content: String,
    /// Marks messages produced by a context agent; never replayed as history.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub context: bool,
}

impl Message {
    /// Create a message with a fresh ID and timestamp.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            chat_id: String::new(),
            created: Utc::now(),
            role,
            sender: String::new(),
            content_type: String::new(),
            content: content.into(),
            context: false,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Tool output; the sender is the tool call ID that produced it.
    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(Role::Tool, content).with_sender(call_id)
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = sender.into();
        self
    }

    pub fn with_chat_id(mut self, chat_id: impl Into<String>) -> Self {
        self.chat_id = chat_id.into();
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn with_created(mut self, created: DateTime<Utc>) -> Self {
        self.created = created;
        self
    }

    pub fn as_context(mut self) -> Self {
        self.context = true;
        self
    }

    /// Whether this message's content is text (empty content type counts as text).
    pub fn is_text(&self) -> bool {
        self.content_type.is_empty() || self.content_type.starts_with("text/")
    }

    /// Non-system messages may be replayed as history.
    pub fn is_replayable(&self) -> bool {
        self.role != Role::System
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        let m = Message::tool("call_1", "ok");
        assert_eq!(m.role, Role::Tool);
        assert_eq!(m.sender, "call_1");
        assert!(m.is_text());
        assert!(!Message::system("x").is_replayable());
    }

    #[test]
    fn test_json_field_names() {
        let m = Message::user("hi").with_chat_id("c1").with_content_type("text/plain");
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["chatId"], "c1");
        assert_eq!(json["contentType"], "text/plain");
        assert_eq!(json["role"], "user");
        assert!(json.get("context").is_none());

        let back: Message = serde_json::from_value(json).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn test_non_text() {
        let m = Message::assistant("x").with_content_type("image/png");
        assert!(!m.is_text());
    }

    #[test]
    fn test_role_from_str() {
        assert_eq!("Assistant".parse::<Role>().unwrap(), Role::Assistant);
        assert!("robot".parse::<Role>().is_err());
    }
}
