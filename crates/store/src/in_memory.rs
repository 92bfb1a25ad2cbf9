//! In-memory store — useful for testing and ephemeral sessions.

use std::sync::Arc;

use async_trait::async_trait;
use lantern_core::error::StoreError;
use lantern_core::store::{ChatId, ChatRecord, ConversationStore, Turn, append_and_promote};
use tokio::sync::RwLock;

/// Keeps chats in a Vec; nothing survives a restart.
pub struct InMemoryStore {
    chats: Arc<RwLock<Vec<ChatRecord>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            chats: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn load_all(&self) -> Result<Vec<ChatRecord>, StoreError> {
        Ok(self.chats.read().await.clone())
    }

    async fn save_all(&self, chats: Vec<ChatRecord>) -> Result<(), StoreError> {
        *self.chats.write().await = chats;
        Ok(())
    }

    async fn lookup(&self, id: &ChatId) -> Result<Option<ChatRecord>, StoreError> {
        Ok(self.chats.read().await.iter().find(|c| &c.id == id).cloned())
    }

    async fn append_turn(&self, id: &ChatId, turn: Turn) -> Result<ChatRecord, StoreError> {
        let mut chats = self.chats.write().await;
        Ok(append_and_promote(&mut chats, id, turn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookup_unknown_is_none() {
        let store = InMemoryStore::new();
        assert!(store.lookup(&ChatId::from("nope")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn append_then_lookup() {
        let store = InMemoryStore::new();
        let id = ChatId::new();
        let record = store.append_turn(&id, Turn::new("hi", "hello")).await.unwrap();
        assert_eq!(record.id, id);

        let found = store.lookup(&id).await.unwrap().unwrap();
        assert_eq!(found.conversation[0].response, "hello");
    }
}
