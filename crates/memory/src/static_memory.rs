//! In-memory log with unlimited retention.

use async_trait::async_trait;
use std::sync::Arc;
use tandem_core::error::MemoryError;
use tandem_core::memory::Memory;
use tandem_core::message::Message;
use tokio::sync::RwLock;

/// Stores every message in a `Vec`. The default memory of an agent.
#[derive(Debug, Default)]
pub struct StaticMemory {
    messages: Arc<RwLock<Vec<Message>>>,
}

impl StaticMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing history.
    pub fn with_messages(messages: Vec<Message>) -> Self {
        Self {
            messages: Arc::new(RwLock::new(messages)),
        }
    }

    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.read().await.is_empty()
    }
}

#[async_trait]
impl Memory for StaticMemory {
    async fn append(&self, message: Message) -> Result<(), MemoryError> {
        self.messages.write().await.push(message);
        Ok(())
    }

    async fn append_all(&self, messages: Vec<Message>) -> Result<(), MemoryError> {
        self.messages.write().await.extend(messages);
        Ok(())
    }

    async fn list(&self) -> Vec<Message> {
        self.messages.read().await.clone()
    }
}
