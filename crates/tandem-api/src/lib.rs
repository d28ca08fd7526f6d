//! Request/response collaborators of the chat core: the match and message
//! services and the identity of the signed-in user, plus an HTTP client that
//! implements them.

pub mod error;
pub mod http;
pub mod identity;
pub mod service;

pub use error::ApiError;
pub use http::HttpApi;
pub use identity::{IdentityProvider, StaticIdentity};
pub use service::{ConversationService, MessageHistoryService};
