use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;
use uuid::Uuid;

use tandem_types::api::{CreateMessageRequest, UpdateReadStateRequest};
use tandem_types::models::{Conversation, Message, MessageDraft};

use crate::error::ApiError;
use crate::service::{ConversationService, MessageHistoryService};

/// REST client for the match and message endpoints.
///
/// Routes:
///   GET   /conversations/{id}
///   GET   /conversations/{id}/messages
///   POST  /conversations/{id}/messages
///   PATCH /messages/{id}
#[derive(Clone)]
pub struct HttpApi {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, ApiError> {
        let resp = self.authorize(req).send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(ApiError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, ApiError> {
    let bytes = resp.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
}

#[async_trait]
impl ConversationService for HttpApi {
    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>, ApiError> {
        let req = self.client.get(self.url(&format!("/conversations/{}", id)));
        match self.send(req).await {
            Ok(resp) => decode(resp).await.map(Some),
            Err(ApiError::Status { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl MessageHistoryService for HttpApi {
    async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>, ApiError> {
        let req = self
            .client
            .get(self.url(&format!("/conversations/{}/messages", conversation_id)));
        let messages: Vec<Message> = decode(self.send(req).await?).await?;
        debug!("Loaded {} messages for {}", messages.len(), conversation_id);
        Ok(messages)
    }

    async fn create_message(&self, draft: &MessageDraft) -> Result<Message, ApiError> {
        let body = CreateMessageRequest {
            sender_id: draft.sender_id,
            receiver_id: draft.receiver_id,
            content: draft.content.clone(),
        };
        let req = self
            .client
            .post(self.url(&format!("/conversations/{}/messages", draft.conversation_id)))
            .json(&body);
        decode(self.send(req).await?).await
    }

    async fn update_read_state(&self, message_id: Uuid, read: bool) -> Result<Message, ApiError> {
        let req = self
            .client
            .patch(self.url(&format!("/messages/{}", message_id)))
            .json(&UpdateReadStateRequest { read });
        decode(self.send(req).await?).await
    }
}
