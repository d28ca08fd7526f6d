use async_trait::async_trait;
use uuid::Uuid;

use tandem_types::models::{Conversation, Message, MessageDraft};

use crate::error::ApiError;

#[async_trait]
pub trait ConversationService: Send + Sync {
    /// `Ok(None)` when the conversation does not exist.
    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>, ApiError>;
}

#[async_trait]
pub trait MessageHistoryService: Send + Sync {
    /// Full history of a conversation, oldest first.
    async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>, ApiError>;

    async fn create_message(&self, draft: &MessageDraft) -> Result<Message, ApiError>;

    async fn update_read_state(&self, message_id: Uuid, read: bool) -> Result<Message, ApiError>;
}
