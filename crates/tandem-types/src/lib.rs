pub mod api;
pub mod events;
pub mod models;

pub use events::{ClientFrame, Destinations, ServerFrame, TopicKind};
pub use models::{Conversation, CurrentUser, Message, MessageDraft, ReadAck};
