//! Agent orchestration core for swarm.
//!
//! This crate resolves agents from their packs, assembles each model request
//! through a middleware chain, drives the tool-call loop and composes
//! actions into flows.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Swarm                                                      │
//! │  - Resolves agents, follows transfers                       │
//! │  - Enforces time limits and cancellation                    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//!   InitEnv → Memory → Instruction → Query → Context → Tools → Model
//!                              │
//!                              ▼
//!                ┌──────────────────────────┐
//!                │ Inference / Flow         │
//!                │ adapter ⇄ dispatcher     │
//!                └──────────────────────────┘
//!                              │
//!              ┌───────────────┼───────────────┬─────────────┐
//!              ▼               ▼               ▼             ▼
//!       ┌──────────┐    ┌──────────┐    ┌──────────┐   ┌──────────┐
//!       │ func/sh  │    │ web/faas │    │   mcp    │   │  agent   │
//!       │ (shell)  │    │ (reqwest)│    │(swarm-mcp)│   │ (Swarm)  │
//!       └──────────┘    └──────────┘    └──────────┘   └──────────┘
//! ```
//!
//! # Core Components
//!
//! - [`Swarm`]: entry point, built with [`SwarmBuilder`]
//! - [`Resolver`]: agent, model and tool resolution with TTL caches
//! - [`Runner`]: the action handle shell scripts, templates and kits call back through
//! - [`Dispatcher`]: tool calls by ID, with result canonicalization
//! - [`FlowEngine`]: sequence, parallel, choice and map flows

pub mod adapter;
pub mod agent;
pub mod dispatch;
pub mod error;
pub mod flow;
pub mod guard;
pub mod inference;
pub mod middleware;
pub mod resolver;
pub mod runner;
pub mod swarm;
pub mod template;
pub mod toolkit;
pub mod vars;

pub use adapter::{Adapter, AdapterRegistry, Reply, Turn};
pub use agent::{Action, Agent, Flow, HARD_MAX_TIME, HARD_MAX_TURNS, Limits, Request, Response};
pub use dispatch::Dispatcher;
pub use error::{AgentError, Result};
pub use flow::FlowEngine;
pub use guard::{Allow, Confirm, Deny, Guard};
pub use middleware::{Chain, Middleware, Next, RunContext};
pub use resolver::Resolver;
pub use runner::Runner;
pub use swarm::{Swarm, SwarmBuilder};
pub use template::{Template, TemplateFuncs};
pub use toolkit::{NativeFn, ToolKit, ToolOutput, ToolSystem};
pub use vars::Vars;
