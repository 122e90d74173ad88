use super::{MessageStore, StoreError};
use crate::message::{Message, MessageId};
use async_trait::async_trait;
use tokio::sync::RwLock;

/// In-process message log. Lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    messages: RwLock<Vec<Message>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-loaded with history.
    #[must_use]
    pub fn with_messages(messages: Vec<Message>) -> Self {
        Self {
            messages: RwLock::new(messages),
        }
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append(&self, message: &Message) -> Result<(), StoreError> {
        self.messages.write().await.push(message.clone());
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<Message>, StoreError> {
        Ok(self.messages.read().await.clone())
    }

    async fn load_since(&self, watermark: MessageId) -> Result<Vec<Message>, StoreError> {
        let messages = self.messages.read().await;
        let start = messages.partition_point(|m| m.id <= watermark);
        Ok(messages[start..].to_vec())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_store() {
        let store = MemoryStore::new();
        assert!(store.load_all().await.unwrap().is_empty());
        assert!(store.load_since(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_and_load() {
        let store = MemoryStore::new();
        store.append(&Message::new(1, "alice", "hi")).await.unwrap();
        store.append(&Message::new(2, "bob", "yo")).await.unwrap();
        store.append(&Message::new(4, "carol", "hey")).await.unwrap();

        let ids: Vec<_> = store.load_all().await.unwrap().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2, 4]);

        let since: Vec<_> = store.load_since(2).await.unwrap().iter().map(|m| m.id).collect();
        assert_eq!(since, vec![4]);
    }
}
