//! Audit entries for tool invocations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::args::ArgMap;
use crate::result::ActionResult;

/// One tool invocation as recorded in the per-request log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallEntry {
    pub id: String,
    pub kit: String,
    pub name: String,
    pub arguments: ArgMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ActionResult>,
    pub timestamp: DateTime<Utc>,
}

impl ToolCallEntry {
    pub fn new(
        id: impl Into<String>,
        kit: impl Into<String>,
        name: impl Into<String>,
        arguments: ArgMap,
    ) -> Self {
        Self {
            id: id.into(),
            kit: kit.into(),
            name: name.into(),
            arguments,
            error: None,
            result: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_result(mut self, result: ActionResult) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}
