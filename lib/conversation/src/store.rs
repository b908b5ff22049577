//! Conversation memory persistence.

use crate::error::ConversationError;
use crate::memory::ConversationMemory;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Storage interface for per-conversation memory.
///
/// The orchestrator loads memory before a chatflow run and writes back the
/// complete final snapshot afterwards; whether a backend stores snapshots or
/// diffs is its own concern.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Loads the memory for a conversation, if any exists.
    async fn get(
        &self,
        conversation_id: &str,
    ) -> Result<Option<ConversationMemory>, ConversationError>;

    /// Replaces the memory for a conversation.
    async fn set(
        &self,
        conversation_id: &str,
        memory: ConversationMemory,
    ) -> Result<(), ConversationError>;

    /// Removes the memory for a conversation. Returns whether it existed.
    async fn delete(&self, conversation_id: &str) -> Result<bool, ConversationError> {
        let _ = conversation_id;
        Ok(false)
    }
}

/// In-memory conversation store.
#[derive(Default)]
pub struct InMemoryConversationStore {
    memories: Mutex<HashMap<String, ConversationMemory>>,
}

impl InMemoryConversationStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn get(
        &self,
        conversation_id: &str,
    ) -> Result<Option<ConversationMemory>, ConversationError> {
        let memories = self.memories.lock().expect("store lock poisoned");
        Ok(memories.get(conversation_id).cloned())
    }

    async fn set(
        &self,
        conversation_id: &str,
        memory: ConversationMemory,
    ) -> Result<(), ConversationError> {
        let mut memories = self.memories.lock().expect("store lock poisoned");
        memories.insert(conversation_id.to_string(), memory);
        Ok(())
    }

    async fn delete(&self, conversation_id: &str) -> Result<bool, ConversationError> {
        let mut memories = self.memories.lock().expect("store lock poisoned");
        Ok(memories.remove(conversation_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn set_get_delete_cycle() {
        let store = InMemoryConversationStore::new();
        assert_eq!(store.get("conv-1").await.unwrap(), None);

        let mut memory = ConversationMemory::new();
        memory.insert("topic".to_string(), json!("billing"));
        store.set("conv-1", memory.clone()).await.unwrap();

        assert_eq!(store.get("conv-1").await.unwrap(), Some(memory));
        assert!(store.delete("conv-1").await.unwrap());
        assert!(!store.delete("conv-1").await.unwrap());
        assert_eq!(store.get("conv-1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn conversations_are_isolated() {
        let store = InMemoryConversationStore::new();

        let mut first = ConversationMemory::new();
        first.insert("count".to_string(), json!(1));
        let mut second = ConversationMemory::new();
        second.insert("count".to_string(), json!(2));

        store.set("a", first.clone()).await.unwrap();
        store.set("b", second.clone()).await.unwrap();

        assert_eq!(store.get("a").await.unwrap(), Some(first));
        assert_eq!(store.get("b").await.unwrap(), Some(second));
    }
}
