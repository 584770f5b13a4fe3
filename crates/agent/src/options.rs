//! Behavioral hooks an agent carries: finalizers, normalizers and
//! option loaders.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use tandem_core::context::RunContext;
use tandem_core::error::Result;
use tandem_core::message::{AssistantMessage, json_payload};

use crate::agent::Agent;

/// Validates a terminal reply. An `Err` is shown to the model as
/// `ERROR: <detail>` and the loop asks again.
pub type Finalizer = Arc<dyn Fn(&AssistantMessage) -> std::result::Result<(), String> + Send + Sync>;

/// Rewrites a terminal reply before it is stored and finalized.
pub type Normalizer = Arc<dyn Fn(AssistantMessage) -> AssistantMessage + Send + Sync>;

/// Deferred configuration, resolved once at the start of every run on the
/// run's own copy of the agent.
#[async_trait]
pub trait OptionLoader: Send + Sync {
    async fn load(&self, ctx: &RunContext, agent: Agent) -> Result<Agent>;
}

struct FnLoader<F, Fut> {
    f: F,
    _marker: PhantomData<fn() -> Fut>,
}

#[async_trait]
impl<F, Fut> OptionLoader for FnLoader<F, Fut>
where
    F: Fn(RunContext, Agent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Agent>> + Send + 'static,
{
    async fn load(&self, ctx: &RunContext, agent: Agent) -> Result<Agent> {
        (self.f)(ctx.clone(), agent).await
    }
}

/// Adapt an async closure into an [`OptionLoader`].
pub fn loader_fn<F, Fut>(f: F) -> Arc<dyn OptionLoader>
where
    F: Fn(RunContext, Agent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Agent>> + Send + 'static,
{
    Arc::new(FnLoader {
        f,
        _marker: PhantomData,
    })
}

/// Accept only replies whose text is valid JSON. A surrounding ```json
/// fence is tolerated.
pub fn structured_output() -> Finalizer {
    Arc::new(|reply: &AssistantMessage| {
        serde_json::from_str::<serde_json::Value>(json_payload(&reply.text()))
            .map(|_| ())
            .map_err(|e| format!("the reply must be valid JSON: {e}"))
    })
}
