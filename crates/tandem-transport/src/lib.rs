//! Live channel plumbing: the [`Transport`] contract, a WebSocket
//! implementation, and a reference-counted [`SharedChannel`] so several open
//! conversations can ride one physical connection.

pub mod channel;
pub mod error;
pub mod routes;
pub mod shared;
pub mod ws;

pub use channel::{ChannelStatus, Frame, Subscription, SubscriptionId, Transport};
pub use error::TransportError;
pub use routes::Routes;
pub use shared::{ChannelLease, SharedChannel};
pub use ws::WsTransport;
