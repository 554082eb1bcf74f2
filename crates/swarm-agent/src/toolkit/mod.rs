//! Toolkits and the toolkit registry.
//!
//! A [`ToolKit`] implements every tool of one tool type (or of one
//! `(type, kit)` pair). The [`ToolSystem`] maps keys to kits:
//!
//! ```text
//! "system:sh"  ->  a kit registered for the sh toolkit only
//! "system"     ->  default kit for system tools
//! ```
//!
//! Lookups try the pair first and fall back to the type.

pub mod agent;
pub mod faas;
pub mod func;
pub mod mcp;
pub mod system;
pub mod web;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use swarm_config::{ToolFunc, ToolType};
use swarm_types::{ActionResult, ArgMap};

use crate::error::{AgentError, Result};
use crate::runner::Runner;

pub use agent::AgentKit;
pub use faas::FaasKit;
pub use func::{FuncKit, NativeFn};
pub use mcp::{McpKit, McpPool};
pub use system::SystemKit;
pub use web::WebKit;

/// Raw output of a kit, canonicalized by the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    None,
    Text(String),
    Json(Value),
    Result(ActionResult),
}

impl From<String> for ToolOutput {
    fn from(s: String) -> Self {
        ToolOutput::Text(s)
    }
}

impl From<&str> for ToolOutput {
    fn from(s: &str) -> Self {
        ToolOutput::Text(s.to_string())
    }
}

impl From<ActionResult> for ToolOutput {
    fn from(r: ActionResult) -> Self {
        ToolOutput::Result(r)
    }
}

/// Implementation of a family of tools.
#[async_trait]
pub trait ToolKit: Send + Sync {
    fn name(&self) -> &str;

    /// Run `tool` with `args`. The runner gives access to the request
    /// state, the shell and nested actions.
    async fn call(&self, runner: &Arc<Runner>, tool: &ToolFunc, args: &ArgMap) -> Result<ToolOutput>;
}

/// Registry of toolkits keyed by `type` or `type:kit`.
#[derive(Clone, Default)]
pub struct ToolSystem {
    kits: HashMap<String, Arc<dyn ToolKit>>,
}

impl std::fmt::Debug for ToolSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<&String> = self.kits.keys().collect();
        keys.sort();
        f.debug_struct("ToolSystem").field("kits", &keys).finish()
    }
}

impl ToolSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in kits. Scripted `template` and `shell` tools share the
    /// func kit.
    pub fn standard(funcs: FuncKit, mcp: McpPool) -> Self {
        let funcs: Arc<dyn ToolKit> = Arc::new(funcs);
        Self::new()
            .with_kit(ToolType::Func.as_str(), funcs.clone())
            .with_kit(ToolType::Template.as_str(), funcs.clone())
            .with_kit(ToolType::Shell.as_str(), funcs)
            .with_kit(ToolType::System.as_str(), Arc::new(SystemKit::new()))
            .with_kit(ToolType::Web.as_str(), Arc::new(WebKit::new()))
            .with_kit(ToolType::Mcp.as_str(), Arc::new(McpKit::new(mcp)))
            .with_kit(ToolType::Faas.as_str(), Arc::new(FaasKit::new()))
            .with_kit(ToolType::Agent.as_str(), Arc::new(AgentKit))
    }

    /// Register `kit` under `key`, replacing any previous entry.
    pub fn with_kit(mut self, key: impl Into<String>, kit: Arc<dyn ToolKit>) -> Self {
        self.kits.insert(key.into(), kit);
        self
    }

    pub fn get_kit(&self, tool_type: ToolType, kit: &str) -> Result<Arc<dyn ToolKit>> {
        let pair = format!("{}:{kit}", tool_type.as_str());
        self.kits
            .get(&pair)
            .or_else(|| self.kits.get(tool_type.as_str()))
            .cloned()
            .ok_or_else(|| AgentError::unsupported(format!("no toolkit for {pair}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    #[async_trait]
    impl ToolKit for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn call(&self, _: &Arc<Runner>, _: &ToolFunc, _: &ArgMap) -> Result<ToolOutput> {
            Ok(ToolOutput::None)
        }
    }

    #[test]
    fn test_pair_wins_over_type() {
        let system = ToolSystem::new()
            .with_kit("system", Arc::new(Named("default")))
            .with_kit("system:fs", Arc::new(Named("fs-only")));
        assert_eq!(system.get_kit(ToolType::System, "fs").unwrap().name(), "fs-only");
        assert_eq!(system.get_kit(ToolType::System, "sh").unwrap().name(), "default");
        let err = system.get_kit(ToolType::Faas, "x").err().unwrap();
        assert_eq!(err.kind(), swarm_types::ErrorKind::Unsupported);
    }

    #[test]
    fn test_standard_registers_all_types() {
        let system = ToolSystem::standard(FuncKit::new(), McpPool::new());
        for t in [
            ToolType::Func,
            ToolType::System,
            ToolType::Web,
            ToolType::Mcp,
            ToolType::Faas,
            ToolType::Agent,
            ToolType::Template,
            ToolType::Shell,
        ] {
            assert!(system.get_kit(t, "any").is_ok(), "{t}");
        }
    }
}
