//! Shared data model for the swarm agent runtime.
//!
//! Everything here is plain data: references, messages, results, argument
//! maps and the error taxonomy every other crate maps onto.

pub mod action;
pub mod args;
pub mod blob;
pub mod error;
pub mod log;
pub mod message;
pub mod reference;
pub mod result;
pub mod tool_call;

pub use action::{action_agent, is_action, parse_action_args, parse_action_command};
pub use args::{ArgMap, ArgMapExt, merge_args, value_to_string};
pub use blob::{Blob, blob_uri, parse_blob_uri};
pub use error::{Error, ErrorKind, Result};
pub use log::LogLevel;
pub use message::{Message, Role};
pub use reference::{AGENT_KIT, AgentRef, TOOL_ID_SEP, ToolRef, tool_id};
pub use result::{ActionResult, State};
pub use tool_call::ToolCallEntry;
