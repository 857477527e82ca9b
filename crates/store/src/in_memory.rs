//! In-memory store: useful for testing and ephemeral sessions.

use async_trait::async_trait;
use forgepilot_core::error::StoreError;
use forgepilot_core::message::{Conversation, ConversationId, Message};
use forgepilot_core::store::ConversationStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Everything a store holds. Also the on-disk format of [`FileStore`].
///
/// [`FileStore`]: crate::FileStore
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreData {
    #[serde(default)]
    pub conversations: BTreeMap<ConversationId, Conversation>,
    #[serde(default)]
    pub messages: BTreeMap<ConversationId, Vec<Message>>,
}

/// A store that keeps conversations and transcripts in maps.
pub struct InMemoryStore {
    data: Arc<RwLock<StoreData>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::from_data(StoreData::default())
    }

    pub fn from_data(data: StoreData) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
        }
    }

    /// A copy of the current contents.
    pub async fn snapshot(&self) -> StoreData {
        self.data.read().await.clone()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(id: &ConversationId) -> StoreError {
    StoreError::ConversationNotFound(id.to_string())
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn create_conversation(&self, conversation: Conversation) -> Result<(), StoreError> {
        let mut data = self.data.write().await;
        if data.conversations.contains_key(&conversation.id) {
            return Err(StoreError::Storage(format!(
                "Conversation already exists: {}",
                conversation.id
            )));
        }
        data.messages.insert(conversation.id.clone(), Vec::new());
        data.conversations.insert(conversation.id.clone(), conversation);
        Ok(())
    }

    async fn get_conversation(&self, id: &ConversationId) -> Result<Conversation, StoreError> {
        self.data
            .read()
            .await
            .conversations
            .get(id)
            .cloned()
            .ok_or_else(|| not_found(id))
    }

    async fn update_conversation(&self, conversation: &Conversation) -> Result<(), StoreError> {
        let mut data = self.data.write().await;
        let slot = data
            .conversations
            .get_mut(&conversation.id)
            .ok_or_else(|| not_found(&conversation.id))?;
        *slot = conversation.clone();
        Ok(())
    }

    async fn append_message(&self, message: Message) -> Result<(), StoreError> {
        let mut data = self.data.write().await;
        if !data.conversations.contains_key(&message.conversation_id) {
            return Err(not_found(&message.conversation_id));
        }
        data.messages
            .entry(message.conversation_id.clone())
            .or_default()
            .push(message);
        Ok(())
    }

    async fn messages(&self, id: &ConversationId) -> Result<Vec<Message>, StoreError> {
        let data = self.data.read().await;
        if !data.conversations.contains_key(id) {
            return Err(not_found(id));
        }
        Ok(data.messages.get(id).cloned().unwrap_or_default())
    }

    async fn delete_conversation(&self, id: &ConversationId) -> Result<(), StoreError> {
        let mut data = self.data.write().await;
        data.conversations.remove(id).ok_or_else(|| not_found(id))?;
        data.messages.remove(id);
        Ok(())
    }

    async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>, StoreError> {
        let data = self.data.read().await;
        let mut list: Vec<Conversation> = data
            .conversations
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(list)
    }
}
