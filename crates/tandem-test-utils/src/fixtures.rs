//! Builders for conversations and messages.

use chrono::{DateTime, Duration, TimeZone, Utc};
use uuid::Uuid;

use tandem_types::models::{Conversation, CurrentUser, Message};

/// A fixed point in time so message ordering in tests is explicit.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

pub fn user(name: &str) -> CurrentUser {
    CurrentUser {
        id: Uuid::new_v4(),
        username: name.to_string(),
    }
}

pub fn conversation(a: Uuid, b: Uuid) -> Conversation {
    Conversation {
        id: Uuid::new_v4(),
        participant_a: a,
        participant_b: b,
        created_at: epoch(),
    }
}

/// An unread message `secs` seconds after [`epoch`].
pub fn message(conversation: &Conversation, from: Uuid, to: Uuid, content: &str, secs: i64) -> Message {
    Message {
        id: Uuid::new_v4(),
        conversation_id: conversation.id,
        sender_id: from,
        receiver_id: to,
        content: content.to_string(),
        created_at: epoch() + Duration::seconds(secs),
        read: false,
    }
}

/// Same record with the read flag set, as the update topic carries it.
pub fn read(message: &Message) -> Message {
    Message {
        read: true,
        ..message.clone()
    }
}

pub fn payload(message: &Message) -> serde_json::Value {
    serde_json::to_value(message).unwrap_or(serde_json::Value::Null)
}
