use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: Uuid,
    pub username: String,
}

/// A match between two users. Lifecycle state (active/blocked) lives with the
/// match service; the chat core only needs the two participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub participant_a: Uuid,
    pub participant_b: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn has_participant(&self, user_id: Uuid) -> bool {
        self.participant_a == user_id || self.participant_b == user_id
    }

    /// Returns the participant that is not `user_id`, or `None` if `user_id`
    /// is not part of this conversation.
    pub fn other_participant(&self, user_id: Uuid) -> Option<Uuid> {
        if self.participant_a == user_id {
            Some(self.participant_b)
        } else if self.participant_b == user_id {
            Some(self.participant_a)
        } else {
            None
        }
    }
}

/// A persisted chat message. The same record is returned by the HTTP API and
/// carried in live channel frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
}

impl Message {
    /// Inbound for `user_id` and not yet acknowledged.
    pub fn is_unread_for(&self, user_id: Uuid) -> bool {
        self.receiver_id == user_id && !self.read
    }

    /// Equal in everything except the read flag.
    pub fn same_content(&self, other: &Message) -> bool {
        self.id == other.id
            && self.conversation_id == other.conversation_id
            && self.sender_id == other.sender_id
            && self.receiver_id == other.receiver_id
            && self.content == other.content
            && self.created_at == other.created_at
    }
}

/// A message the client holds before the server has assigned it an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDraft {
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
}

/// Read acknowledgement published on the live channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadAck {
    pub message_id: Uuid,
    pub conversation_id: Uuid,
    pub reader_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation() -> Conversation {
        Conversation {
            id: Uuid::new_v4(),
            participant_a: Uuid::new_v4(),
            participant_b: Uuid::new_v4(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn other_participant_resolves_both_sides() {
        let c = conversation();
        assert_eq!(c.other_participant(c.participant_a), Some(c.participant_b));
        assert_eq!(c.other_participant(c.participant_b), Some(c.participant_a));
        assert_eq!(c.other_participant(Uuid::new_v4()), None);
        assert!(!c.has_participant(Uuid::new_v4()));
    }

    #[test]
    fn read_flag_defaults_to_false_on_the_wire() {
        let json = serde_json::json!({
            "id": Uuid::new_v4(),
            "conversation_id": Uuid::new_v4(),
            "sender_id": Uuid::new_v4(),
            "receiver_id": Uuid::new_v4(),
            "content": "hey",
            "created_at": "2024-05-01T10:00:00Z",
        });
        let msg: Message = serde_json::from_value(json).unwrap();
        assert!(!msg.read);
        assert!(msg.is_unread_for(msg.receiver_id));
        assert!(!msg.is_unread_for(msg.sender_id));
    }
}
