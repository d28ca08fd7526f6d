use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("channel is not connected")]
    NotConnected,

    #[error("publish to {destination} failed: {reason}")]
    Publish { destination: String, reason: String },

    #[error("frame encoding failed: {0}")]
    Codec(#[from] serde_json::Error),
}
