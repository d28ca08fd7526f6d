//! Per-conversation chat synchronization.
//!
//! A [`ChatSession`] loads history over HTTP, keeps a live subscription open
//! through a [`ConversationLink`], and merges both into one ordered,
//! deduplicated [`MessageStore`]. Read receipts are reconciled by the
//! [`ReadReceiptTracker`]. Sends and acknowledgements go over the live
//! channel when it is up and over HTTP otherwise.

pub mod backoff;
pub mod config;
pub mod delivery;
pub mod error;
pub mod link;
pub mod receipts;
pub mod session;
pub mod store;

pub use backoff::Backoff;
pub use config::SyncConfig;
pub use delivery::{Acknowledged, Delivered, DeliveryError, DeliveryPath, DeliveryPolicy};
pub use error::SyncError;
pub use link::{ConversationLink, LinkEvent, LinkState};
pub use receipts::ReadReceiptTracker;
pub use session::{ChatSession, ConnectionStatus, Sent, SessionDeps};
pub use store::{AppendOutcome, MessageStore, UpdateOutcome};
