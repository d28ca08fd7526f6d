use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use tandem_api::{ApiError, MessageHistoryService};
use tandem_transport::{Transport, TransportError};
use tandem_types::events::Destinations;
use tandem_types::models::{Message, MessageDraft, ReadAck};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryPath {
    Live,
    Fallback,
}

/// Result of sending a message.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivered {
    /// Published on the live channel; the stored record arrives as an echo.
    Published,
    /// Created over HTTP; this is the persisted record.
    Created(Message),
}

/// Result of acknowledging a message as read.
#[derive(Debug, Clone, PartialEq)]
pub enum Acknowledged {
    Published,
    Updated(Message),
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// How outbound chat traffic reaches the server.
#[async_trait]
pub trait DeliveryPolicy: Send + Sync {
    fn path(&self) -> DeliveryPath;

    async fn send(&self, draft: &MessageDraft) -> Result<Delivered, DeliveryError>;

    async fn mark_read(&self, message: &Message, reader_id: Uuid) -> Result<Acknowledged, DeliveryError>;
}

/// Fire-and-forget publishes on the conversation's app destinations.
pub struct LiveDelivery {
    transport: Arc<dyn Transport>,
    destinations: Destinations,
}

impl LiveDelivery {
    pub fn new(transport: Arc<dyn Transport>, destinations: Destinations) -> Self {
        Self {
            transport,
            destinations,
        }
    }
}

#[async_trait]
impl DeliveryPolicy for LiveDelivery {
    fn path(&self) -> DeliveryPath {
        DeliveryPath::Live
    }

    async fn send(&self, draft: &MessageDraft) -> Result<Delivered, DeliveryError> {
        let payload = serde_json::to_value(draft).map_err(TransportError::from)?;
        self.transport
            .publish(&self.destinations.send, payload)
            .await?;
        debug!("Published message to {}", self.destinations.send);
        Ok(Delivered::Published)
    }

    async fn mark_read(&self, message: &Message, reader_id: Uuid) -> Result<Acknowledged, DeliveryError> {
        let ack = ReadAck {
            message_id: message.id,
            conversation_id: message.conversation_id,
            reader_id,
        };
        let payload = serde_json::to_value(&ack).map_err(TransportError::from)?;
        self.transport
            .publish(&self.destinations.read, payload)
            .await?;
        debug!("Published read ack for {}", message.id);
        Ok(Acknowledged::Published)
    }
}

/// Discrete HTTP calls against the message service.
pub struct FallbackDelivery {
    history: Arc<dyn MessageHistoryService>,
}

impl FallbackDelivery {
    pub fn new(history: Arc<dyn MessageHistoryService>) -> Self {
        Self { history }
    }
}

#[async_trait]
impl DeliveryPolicy for FallbackDelivery {
    fn path(&self) -> DeliveryPath {
        DeliveryPath::Fallback
    }

    async fn send(&self, draft: &MessageDraft) -> Result<Delivered, DeliveryError> {
        let created = self.history.create_message(draft).await?;
        debug!("Created message {} over HTTP", created.id);
        Ok(Delivered::Created(created))
    }

    async fn mark_read(&self, message: &Message, _reader_id: Uuid) -> Result<Acknowledged, DeliveryError> {
        let updated = self.history.update_read_state(message.id, true).await?;
        debug!("Marked {} read over HTTP", message.id);
        Ok(Acknowledged::Updated(updated))
    }
}
