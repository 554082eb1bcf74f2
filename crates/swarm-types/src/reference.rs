//! Agent and tool reference decoding.
//!
//! Agent references have the shape `[owner:]pack[/sub]`, optionally prefixed
//! with `@`. Tool references have the shape `kit:name`; their internal
//! identifier is `kit__name`.

use serde::{Deserialize, Serialize};

/// Kit name reserved for agents invoked as tools.
pub const AGENT_KIT: &str = "agent";

/// Separator between kit and name inside a tool ID.
pub const TOOL_ID_SEP: &str = "__";

// ─────────────────────────────────────────────────────────────────────────────
// Agent references
// ─────────────────────────────────────────────────────────────────────────────

/// A decoded agent reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentRef {
    pub owner: String,
    pub pack: String,
    pub sub: String,
}

impl AgentRef {
    pub fn new(owner: impl Into<String>, pack: impl Into<String>, sub: impl Into<String>) -> Self {
        let mut r = Self {
            owner: owner.into(),
            pack: pack.into(),
            sub: sub.into(),
        };
        if r.sub == r.pack {
            r.sub.clear();
        }
        r
    }

    /// Decode `[@][owner:]pack[/sub]`.
    ///
    /// The first `:` separates the owner, the first `/` after it separates the
    /// sub-agent. A sub equal to the pack is dropped so `p` and `p/p` are the
    /// same agent.
    pub fn decode(s: &str) -> Self {
        let s = s.trim();
        let s = s.strip_prefix('@').unwrap_or(s);

        let (owner, rest) = match s.split_once(':') {
            Some((owner, rest)) => (owner, rest),
            None => ("", s),
        };
        let (pack, sub) = match rest.split_once('/') {
            Some((pack, sub)) => (pack, sub),
            None => (rest, ""),
        };

        Self::new(owner, pack, sub)
    }

    /// The `pack[/sub]` part without the owner.
    pub fn name(&self) -> String {
        if self.sub.is_empty() {
            self.pack.clone()
        } else {
            format!("{}/{}", self.pack, self.sub)
        }
    }

    /// Canonical encoding, the inverse of [`AgentRef::decode`].
    pub fn encode(&self) -> String {
        if self.owner.is_empty() {
            self.name()
        } else {
            format!("{}:{}", self.owner, self.name())
        }
    }

    /// Fill in the owner if the reference did not name one.
    pub fn with_default_owner(mut self, owner: &str) -> Self {
        if self.owner.is_empty() {
            self.owner = owner.to_string();
        }
        self
    }

    /// Lower-case the pack and sub names.
    pub fn normalized(mut self) -> Self {
        self.pack = self.pack.to_lowercase();
        self.sub = self.sub.to_lowercase();
        self
    }
}

impl std::fmt::Display for AgentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encode())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tool references
// ─────────────────────────────────────────────────────────────────────────────

/// A decoded `kit:name` tool reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToolRef {
    pub kit: String,
    pub name: String,
}

impl ToolRef {
    pub fn new(kit: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kit: kit.into(),
            name: name.into(),
        }
    }

    /// Decode a tool reference.
    ///
    /// Accepted forms: `kit:name`, `kit` (name defaults to the kit),
    /// `kit__name` (a tool ID), `agent:name`, `@name`, `@:name` and
    /// `@owner:pack[/sub]`. For agents the name is the agent reference.
    pub fn decode(s: &str) -> Self {
        let s = s.trim();

        if let Some(rest) = s.strip_prefix('@') {
            let name = rest.strip_prefix(':').unwrap_or(rest);
            return Self::new(AGENT_KIT, name);
        }

        if let Some(idx) = s.find(TOOL_ID_SEP) {
            if idx > 0 {
                let (kit, name) = s.split_at(idx);
                return Self::new(kit, &name[TOOL_ID_SEP.len()..]);
            }
        }

        match s.split_once(':') {
            Some((kit, name)) => Self::new(kit, name),
            None => Self::new(s, s),
        }
    }

    pub fn is_agent(&self) -> bool {
        self.kit == AGENT_KIT
    }

    /// Whether the name is a wildcard (`*` or empty).
    pub fn is_wildcard(&self) -> bool {
        self.name.is_empty() || self.name == "*"
    }

    /// Whether this selects every tool of every kit: `*`, `*:` or `*:*`.
    pub fn is_all(&self) -> bool {
        self.kit == "*" && self.is_wildcard()
    }

    /// Stable tool ID, `kit__name`.
    pub fn id(&self) -> String {
        tool_id(&self.kit, &self.name)
    }
}

impl std::fmt::Display for ToolRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kit, self.name)
    }
}

/// Build the stable tool ID for a kit and name.
///
/// Characters outside `[a-zA-Z0-9_-]` are replaced with `_` so the ID is a
/// valid function name for every provider.
pub fn tool_id(kit: &str, name: &str) -> String {
    let sanitize = |s: &str| -> String {
        s.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    };
    format!("{}{}{}", sanitize(kit), TOOL_ID_SEP, sanitize(name))
}
