//! Scripted conversation and message services.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use tandem_api::{ApiError, ConversationService, MessageHistoryService};
use tandem_types::models::{Conversation, Message, MessageDraft};

#[derive(Default)]
struct State {
    conversations: HashMap<Uuid, Conversation>,
    messages: HashMap<Uuid, Vec<Message>>,
    created: Vec<MessageDraft>,
    read_updates: Vec<Uuid>,
    list_calls: usize,
    fail_lookup: bool,
    fail_history: bool,
    fail_writes: bool,
}

/// In-memory stand-in for the match and message services.
///
/// Created messages are stored, so a later `list_messages` returns them the
/// way the real service would.
#[derive(Default)]
pub struct MockApi {
    state: Mutex<State>,
}

fn unavailable() -> ApiError {
    ApiError::Status {
        status: 503,
        body: "service unavailable".into(),
    }
}

impl MockApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("mock api lock poisoned")
    }

    pub fn add_conversation(&self, conversation: Conversation) {
        self.state()
            .conversations
            .insert(conversation.id, conversation);
    }

    /// Seed server-side history.
    pub fn add_message(&self, message: Message) {
        self.state()
            .messages
            .entry(message.conversation_id)
            .or_default()
            .push(message);
    }

    pub fn fail_lookup(&self, fail: bool) {
        self.state().fail_lookup = fail;
    }

    pub fn fail_history(&self, fail: bool) {
        self.state().fail_history = fail;
    }

    /// Fail create and read-state calls.
    pub fn fail_writes(&self, fail: bool) {
        self.state().fail_writes = fail;
    }

    /// Drafts received by `create_message`, in order.
    pub fn created(&self) -> Vec<MessageDraft> {
        self.state().created.clone()
    }

    /// Ids passed to `update_read_state`, in order.
    pub fn read_updates(&self) -> Vec<Uuid> {
        self.state().read_updates.clone()
    }

    pub fn list_calls(&self) -> usize {
        self.state().list_calls
    }

    pub fn stored(&self, conversation_id: Uuid) -> Vec<Message> {
        self.state()
            .messages
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ConversationService for MockApi {
    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>, ApiError> {
        let state = self.state();
        if state.fail_lookup {
            return Err(unavailable());
        }
        Ok(state.conversations.get(&id).cloned())
    }
}

#[async_trait]
impl MessageHistoryService for MockApi {
    async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>, ApiError> {
        let mut state = self.state();
        state.list_calls += 1;
        if state.fail_history {
            return Err(unavailable());
        }
        let mut messages = state
            .messages
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default();
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }

    async fn create_message(&self, draft: &MessageDraft) -> Result<Message, ApiError> {
        let mut state = self.state();
        if state.fail_writes {
            return Err(unavailable());
        }
        state.created.push(draft.clone());
        let message = Message {
            id: Uuid::new_v4(),
            conversation_id: draft.conversation_id,
            sender_id: draft.sender_id,
            receiver_id: draft.receiver_id,
            content: draft.content.clone(),
            created_at: Utc::now(),
            read: false,
        };
        state
            .messages
            .entry(draft.conversation_id)
            .or_default()
            .push(message.clone());
        Ok(message)
    }

    async fn update_read_state(&self, message_id: Uuid, read: bool) -> Result<Message, ApiError> {
        let mut state = self.state();
        if state.fail_writes {
            return Err(unavailable());
        }
        state.read_updates.push(message_id);
        let found = state
            .messages
            .values_mut()
            .flat_map(|messages| messages.iter_mut())
            .find(|m| m.id == message_id);
        match found {
            Some(message) => {
                message.read = message.read || read;
                Ok(message.clone())
            }
            None => Err(ApiError::Status {
                status: 404,
                body: format!("message {} not found", message_id),
            }),
        }
    }
}
