//! Prompts resolved at run time.
//!
//! A [`PromptLoader`] is consulted once per run. The resolved prompt
//! replaces the agent's starter messages and may pin the model.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tandem_core::context::RunContext;
use tandem_core::error::Result;
use tandem_core::message::Message;

use crate::agent::Agent;
use crate::options::OptionLoader;

/// A versioned set of starter messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub name: String,
    #[serde(default)]
    pub version: String,
    /// Model the prompt was written for, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub messages: Vec<Message>,
}

#[async_trait]
pub trait PromptLoader: Send + Sync {
    async fn load(&self, ctx: &RunContext) -> Result<Prompt>;
}

/// A fixed system prompt.
#[derive(Debug, Clone)]
pub struct StaticPrompt {
    prompt: Prompt,
}

impl StaticPrompt {
    pub fn new(name: impl Into<String>, system: impl Into<String>) -> Self {
        Self {
            prompt: Prompt {
                name: name.into(),
                version: String::new(),
                model: None,
                messages: vec![Message::system(system)],
            },
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.prompt.version = version.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.prompt.model = Some(model.into());
        self
    }
}

#[async_trait]
impl PromptLoader for StaticPrompt {
    async fn load(&self, _ctx: &RunContext) -> Result<Prompt> {
        Ok(self.prompt.clone())
    }
}

/// Option loader installed by [`Agent::with_prompt`].
pub(crate) struct PromptOption {
    pub(crate) loader: Arc<dyn PromptLoader>,
}

#[async_trait]
impl OptionLoader for PromptOption {
    async fn load(&self, ctx: &RunContext, agent: Agent) -> Result<Agent> {
        let prompt = self.loader.load(ctx).await?;
        tracing::debug!(prompt = %prompt.name, version = %prompt.version, "Prompt resolved");
        let mut agent = agent
            .with_messages(prompt.messages)
            .with_span_metadata("prompt_name", serde_json::json!(prompt.name))
            .with_span_metadata("prompt_version", serde_json::json!(prompt.version));
        if let Some(model) = prompt.model {
            agent = agent.with_model(model);
        }
        Ok(agent)
    }
}
