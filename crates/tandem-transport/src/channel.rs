use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::error::TransportError;

pub type SubscriptionId = Uuid;

/// Observable state of the physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// A payload delivered on a subscribed topic.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub destination: String,
    pub payload: serde_json::Value,
}

/// A live topic subscription. Frames arrive in the order the server
/// published them; the stream ends when the connection drops or the
/// subscription is cancelled through [`Transport::unsubscribe`].
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    topic: String,
    frames: mpsc::UnboundedReceiver<Frame>,
}

impl Subscription {
    pub fn new(id: SubscriptionId, topic: impl Into<String>, frames: mpsc::UnboundedReceiver<Frame>) -> Self {
        Self {
            id,
            topic: topic.into(),
            frames,
        }
    }

    /// Cancellation handle, passed back to [`Transport::unsubscribe`].
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub async fn next(&mut self) -> Option<Frame> {
        self.frames.recv().await
    }
}

/// One physical publish/subscribe connection. Implementations know nothing
/// about conversations.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish the connection. A no-op when already connected.
    async fn connect(&self) -> Result<(), TransportError>;

    async fn subscribe(&self, topic: &str) -> Result<Subscription, TransportError>;

    async fn unsubscribe(&self, id: SubscriptionId);

    /// Fire-and-forget publish. Fails with [`TransportError::Publish`] when
    /// the connection is not up.
    async fn publish(&self, destination: &str, payload: serde_json::Value) -> Result<(), TransportError>;

    /// Release every subscription and the underlying connection.
    async fn disconnect(&self);

    fn status(&self) -> watch::Receiver<ChannelStatus>;
}
