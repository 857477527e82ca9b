//! Conversation store trait: durable transcripts and working context.
//!
//! The engine writes every message of a turn through this trait as soon as
//! it is produced, so an aborted turn still leaves a readable transcript.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::message::{Conversation, ConversationId, Message};

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// A human-readable name for this store (e.g., "in-memory").
    fn name(&self) -> &str;

    /// Persist a new conversation.
    async fn create_conversation(&self, conversation: Conversation) -> Result<(), StoreError>;

    /// Fetch a conversation by id.
    async fn get_conversation(&self, id: &ConversationId) -> Result<Conversation, StoreError>;

    /// Overwrite a conversation's metadata and working context.
    async fn update_conversation(&self, conversation: &Conversation) -> Result<(), StoreError>;

    /// Append a message to its conversation's transcript.
    async fn append_message(&self, message: Message) -> Result<(), StoreError>;

    /// The full transcript, oldest first.
    async fn messages(&self, id: &ConversationId) -> Result<Vec<Message>, StoreError>;

    /// Delete a conversation together with all of its messages.
    async fn delete_conversation(&self, id: &ConversationId) -> Result<(), StoreError>;

    /// Conversations owned by `user_id`, most recently updated first.
    async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>, StoreError>;
}
