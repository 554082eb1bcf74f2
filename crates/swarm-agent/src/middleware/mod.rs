//! The middleware chain that turns a resolved agent and a user query into
//! one model request.
//!
//! ```text
//! InitEnv -> Memory -> Instruction -> Query -> Context -> Tools -> Model -> Inference
//! ```
//!
//! Each stage may mutate the request before calling [`Next::run`] and may
//! inspect the response afterwards. The last stage does not call on.

mod init;
mod inference;
mod memory;
mod model;
mod prompt;
mod tools;

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::agent::{Request, Response};
use crate::error::Result;
use crate::runner::Runner;
use crate::swarm::Swarm;
use crate::vars::Vars;

pub use init::InitEnv;
pub use inference::Inference;
pub use memory::Memory;
pub use model::ModelStage;
pub use prompt::{Context, Instruction, Query};
pub use tools::Tools;

/// Handles shared by every stage of one chain invocation.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub swarm: Swarm,
    pub vars: Arc<Vars>,
}

impl RunContext {
    pub fn new(swarm: Swarm, vars: Arc<Vars>) -> Self {
        Self { swarm, vars }
    }

    /// A runner bound to a snapshot of `req`.
    pub fn runner(&self, req: &Request) -> Arc<Runner> {
        Runner::new(self.swarm.clone(), self.vars.clone(), Arc::new(req.clone()))
    }

    /// A runner for resolving content on behalf of `req`'s agent: nested
    /// requests made through it see the agent as being resolved, which is
    /// how cycles through instructions, context and models are caught.
    pub fn resolving_runner(&self, req: &Request) -> Arc<Runner> {
        let mut snapshot = req.clone();
        if let Some(agent) = &req.agent {
            snapshot.resolving.push(agent.name.clone());
        }
        Runner::new(self.swarm.clone(), self.vars.clone(), Arc::new(snapshot))
    }
}

#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(
        &self,
        ctx: &RunContext,
        req: &mut Request,
        resp: &mut Response,
        next: Next<'_>,
    ) -> Result<()>;
}

/// The remaining stages of the chain.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    rest: &'a [Arc<dyn Middleware>],
}

impl<'a> Next<'a> {
    pub fn run<'b>(
        self,
        ctx: &'b RunContext,
        req: &'b mut Request,
        resp: &'b mut Response,
    ) -> BoxFuture<'b, Result<()>>
    where
        'a: 'b,
    {
        Box::pin(async move {
            match self.rest.split_first() {
                Some((stage, rest)) => {
                    tracing::trace!(stage = stage.name(), agent = %req.name, "Middleware");
                    stage.handle(ctx, req, resp, Next { rest }).await
                }
                None => Ok(()),
            }
        })
    }
}

/// An ordered list of stages.
#[derive(Clone)]
pub struct Chain {
    stages: Vec<Arc<dyn Middleware>>,
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.stages.iter().map(|s| s.name()))
            .finish()
    }
}

impl Default for Chain {
    fn default() -> Self {
        Self::standard()
    }
}

impl Chain {
    pub fn new(stages: Vec<Arc<dyn Middleware>>) -> Self {
        Self { stages }
    }

    pub fn standard() -> Self {
        Self::new(vec![
            Arc::new(InitEnv),
            Arc::new(Memory),
            Arc::new(Instruction),
            Arc::new(Query),
            Arc::new(Context),
            Arc::new(Tools),
            Arc::new(ModelStage),
            Arc::new(Inference),
        ])
    }

    pub fn names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub async fn serve(&self, ctx: &RunContext, req: &mut Request, resp: &mut Response) -> Result<()> {
        Next { rest: &self.stages }.run(ctx, req, resp).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_order() {
        assert_eq!(
            Chain::standard().names(),
            vec!["init", "memory", "instruction", "query", "context", "tools", "model", "inference"]
        );
    }
}
