//! Memory that only keeps the current user turn.

use async_trait::async_trait;
use tandem_core::error::MemoryError;
use tandem_core::memory::Memory;
use tandem_core::message::Message;
use tokio::sync::RwLock;
use tracing::debug;

/// Resets to empty whenever a new user message arrives, so each request
/// is answered without earlier turns. Tool traffic within the turn is kept.
#[derive(Debug, Default)]
pub struct ForgetfulMemory {
    messages: RwLock<Vec<Message>>,
}

impl ForgetfulMemory {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(messages: &mut Vec<Message>, message: Message) {
        if message.is_user() && !messages.is_empty() {
            debug!(dropped = messages.len(), "Forgetting previous turn");
            messages.clear();
        }
        messages.push(message);
    }
}

#[async_trait]
impl Memory for ForgetfulMemory {
    async fn append(&self, message: Message) -> Result<(), MemoryError> {
        let mut messages = self.messages.write().await;
        Self::push(&mut messages, message);
        Ok(())
    }

    async fn append_all(&self, batch: Vec<Message>) -> Result<(), MemoryError> {
        let mut messages = self.messages.write().await;
        for message in batch {
            Self::push(&mut messages, message);
        }
        Ok(())
    }

    async fn list(&self) -> Vec<Message> {
        self.messages.read().await.clone()
    }
}
