use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Frames sent FROM client TO server over the live channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientFrame {
    /// Start receiving frames published to `destination`.
    /// The server tags every delivered frame with `id`.
    Subscribe { id: Uuid, destination: String },

    /// Stop a previous subscription.
    Unsubscribe { id: Uuid },

    /// Publish a payload to an application destination.
    Send {
        destination: String,
        payload: serde_json::Value,
    },
}

/// Frames sent FROM server TO client over the live channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerFrame {
    /// A payload published to a topic the client subscribed to
    Message {
        subscription: Uuid,
        destination: String,
        payload: serde_json::Value,
    },

    /// The server rejected a frame
    Error { message: String },
}

/// The two topics a conversation subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicKind {
    NewMessage,
    MessageUpdate,
}

impl std::fmt::Display for TopicKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NewMessage => f.write_str("new-message"),
            Self::MessageUpdate => f.write_str("message-update"),
        }
    }
}

/// Per-conversation destinations on the live channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destinations {
    pub new_messages: String,
    pub updates: String,
    pub send: String,
    pub read: String,
}

impl Destinations {
    pub fn for_conversation(conversation_id: Uuid) -> Self {
        Self {
            new_messages: format!("/topic/conversations/{}/messages", conversation_id),
            updates: format!("/topic/conversations/{}/updates", conversation_id),
            send: format!("/app/conversations/{}/send", conversation_id),
            read: format!("/app/conversations/{}/read", conversation_id),
        }
    }

    pub fn topic(&self, kind: TopicKind) -> &str {
        match kind {
            TopicKind::NewMessage => &self.new_messages,
            TopicKind::MessageUpdate => &self.updates,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_use_tagged_layout() {
        let id = Uuid::nil();
        let frame = ClientFrame::Subscribe {
            id,
            destination: "/topic/x".into(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "Subscribe");
        assert_eq!(json["data"]["destination"], "/topic/x");

        let raw = r#"{"type":"Error","data":{"message":"nope"}}"#;
        match serde_json::from_str::<ServerFrame>(raw).unwrap() {
            ServerFrame::Error { message } => assert_eq!(message, "nope"),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn destinations_are_scoped_to_the_conversation() {
        let id = Uuid::new_v4();
        let d = Destinations::for_conversation(id);
        assert!(d.new_messages.contains(&id.to_string()));
        assert_eq!(d.topic(TopicKind::MessageUpdate), d.updates);
        assert_ne!(d.send, d.read);
    }
}
