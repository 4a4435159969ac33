//! Message persistence seam
//!
//! The crate never picks a storage engine; the host supplies a
//! [`MessageStore`]. The bundled [`MemoryMessageStore`] backs tests and
//! hosts that do not care about history surviving a restart.

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;
use uuid::Uuid;

use crate::message::ChatMessage;

/// Errors from a message store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("message {0} not found")]
    NotFound(Uuid),

    #[error("storage backend failed: {0}")]
    Backend(String),
}

/// Host-provided chat history storage.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn save(&self, message: &ChatMessage) -> Result<(), StoreError>;

    /// Flip the delivered flag on a stored message.
    async fn mark_delivered(&self, id: Uuid) -> Result<(), StoreError>;

    /// Most recent messages, newest last, at most `limit`.
    async fn recent(&self, limit: usize) -> Result<Vec<ChatMessage>, StoreError>;
}

/// In-memory store; history is lost on drop.
#[derive(Default)]
pub struct MemoryMessageStore {
    messages: RwLock<Vec<ChatMessage>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn save(&self, message: &ChatMessage) -> Result<(), StoreError> {
        self.messages.write().push(message.clone());
        Ok(())
    }

    async fn mark_delivered(&self, id: Uuid) -> Result<(), StoreError> {
        let mut messages = self.messages.write();
        match messages.iter_mut().find(|m| m.id == id) {
            Some(message) => {
                message.delivered = true;
                Ok(())
            }
            None => Err(StoreError::NotFound(id)),
        }
    }

    async fn recent(&self, limit: usize) -> Result<Vec<ChatMessage>, StoreError> {
        let messages = self.messages.read();
        let start = messages.len().saturating_sub(limit);
        Ok(messages[start..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(content: &str) -> ChatMessage {
        ChatMessage::outgoing(1, "ember".into(), None, content.into(), false)
    }

    #[tokio::test]
    async fn test_save_and_recent() {
        let store = MemoryMessageStore::new();
        for i in 0..5 {
            store.save(&message(&format!("m{i}"))).await.unwrap();
        }

        let recent = store.recent(3).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[2].content, "m4");
    }

    #[tokio::test]
    async fn test_mark_delivered() {
        let store = MemoryMessageStore::new();
        let msg = message("direct");
        store.save(&msg).await.unwrap();

        store.mark_delivered(msg.id).await.unwrap();
        let recent = store.recent(1).await.unwrap();
        assert!(recent[0].delivered);

        let missing = Uuid::new_v4();
        assert!(matches!(
            store.mark_delivered(missing).await,
            Err(StoreError::NotFound(id)) if id == missing
        ));
    }
}
