//! Memory trait: the ordered, append-only conversation log.
//!
//! `list()` reflects exactly the append history in call order. Concurrent
//! appends serialize inside the implementation; the agent loop never
//! mutates a stored message.

use async_trait::async_trait;

use crate::error::MemoryError;
use crate::message::{AssistantMessage, Message};

#[async_trait]
pub trait Memory: Send + Sync {
    /// Append one message.
    async fn append(&self, message: Message) -> std::result::Result<(), MemoryError>;

    /// Append a batch so no other append interleaves with it.
    ///
    /// The default appends one by one; implementations override it to take
    /// their lock once.
    async fn append_all(&self, messages: Vec<Message>) -> std::result::Result<(), MemoryError> {
        for message in messages {
            self.append(message).await?;
        }
        Ok(())
    }

    /// Snapshot of the log in append order.
    async fn list(&self) -> Vec<Message>;
}

/// The most recent message, if any.
pub async fn last_message(memory: &dyn Memory) -> Option<Message> {
    memory.list().await.pop()
}

/// The most recent assistant message.
pub async fn last_assistant(memory: &dyn Memory) -> Option<AssistantMessage> {
    memory.list().await.into_iter().rev().find_map(|m| match m {
        Message::Assistant(a) => Some(a),
        _ => None,
    })
}

/// The most recent user message text.
pub async fn last_user(memory: &dyn Memory) -> Option<String> {
    memory.list().await.into_iter().rev().find_map(|m| match m {
        Message::User { content } => Some(content),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct VecMemory(Mutex<Vec<Message>>);

    #[async_trait]
    impl Memory for VecMemory {
        async fn append(&self, message: Message) -> std::result::Result<(), MemoryError> {
            self.0.lock().await.push(message);
            Ok(())
        }

        async fn list(&self) -> Vec<Message> {
            self.0.lock().await.clone()
        }
    }

    #[tokio::test]
    async fn lookups_find_latest_entries() {
        let memory = VecMemory::default();
        assert!(last_message(&memory).await.is_none());

        memory
            .append_all(vec![
                Message::user("first"),
                Message::assistant("one"),
                Message::user("second"),
                Message::tool_result("c1", serde_json::json!("ok")),
            ])
            .await
            .unwrap();

        assert_eq!(last_user(&memory).await.as_deref(), Some("second"));
        assert_eq!(last_assistant(&memory).await.unwrap().text(), "one");
        assert_eq!(last_message(&memory).await.unwrap().call_id(), Some("c1"));
    }
}
