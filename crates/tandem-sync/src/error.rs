use thiserror::Error;
use uuid::Uuid;

use tandem_api::ApiError;

use crate::delivery::DeliveryError;

/// Failures surfaced to the UI layer. Transport trouble never shows up here
/// on its own; it is absorbed by retry or the HTTP fallback.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("conversation {0} not found")]
    ConversationNotFound(Uuid),

    #[error("conversation lookup failed: {0}")]
    ConversationLookup(#[source] ApiError),

    #[error("could not load message history: {0}")]
    HistoryLoad(#[source] ApiError),

    #[error("message is empty")]
    EmptyMessage,

    #[error("delivery failed: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("session is closed")]
    Closed,
}
