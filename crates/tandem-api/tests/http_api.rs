use chrono::{TimeZone, Utc};
use uuid::Uuid;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tandem_api::{ApiError, ConversationService, HttpApi, MessageHistoryService};
use tandem_types::models::{Message, MessageDraft};

fn message(conversation_id: Uuid, content: &str, read: bool) -> Message {
    Message {
        id: Uuid::new_v4(),
        conversation_id,
        sender_id: Uuid::new_v4(),
        receiver_id: Uuid::new_v4(),
        content: content.to_string(),
        created_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
        read,
    }
}

#[tokio::test]
async fn missing_conversation_is_none() {
    let server = MockServer::start().await;
    let id = Uuid::new_v4();
    Mock::given(method("GET"))
        .and(path(format!("/conversations/{}", id)))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let api = HttpApi::new(server.uri());
    assert!(api.get_conversation(id).await.unwrap().is_none());
}

#[tokio::test]
async fn conversation_lookup_sends_bearer_token() {
    let server = MockServer::start().await;
    let id = Uuid::new_v4();
    let body = serde_json::json!({
        "id": id,
        "participant_a": Uuid::new_v4(),
        "participant_b": Uuid::new_v4(),
        "created_at": "2024-05-01T10:00:00Z",
    });
    Mock::given(method("GET"))
        .and(path(format!("/conversations/{}", id)))
        .and(header("authorization", "Bearer secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&server)
        .await;

    let api = HttpApi::new(format!("{}/", server.uri())).with_token("secret");
    let conversation = api.get_conversation(id).await.unwrap().unwrap();
    assert_eq!(conversation.id, id);
}

#[tokio::test]
async fn lists_history() {
    let server = MockServer::start().await;
    let conversation_id = Uuid::new_v4();
    let history = vec![
        message(conversation_id, "hi", true),
        message(conversation_id, "there", false),
    ];
    Mock::given(method("GET"))
        .and(path(format!("/conversations/{}/messages", conversation_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(&history))
        .mount(&server)
        .await;

    let api = HttpApi::new(server.uri());
    let loaded = api.list_messages(conversation_id).await.unwrap();
    assert_eq!(loaded, history);
}

#[tokio::test]
async fn create_posts_draft_fields() {
    let server = MockServer::start().await;
    let conversation_id = Uuid::new_v4();
    let created = message(conversation_id, "hello", false);
    let draft = MessageDraft {
        conversation_id,
        sender_id: created.sender_id,
        receiver_id: created.receiver_id,
        content: "hello".into(),
    };
    Mock::given(method("POST"))
        .and(path(format!("/conversations/{}/messages", conversation_id)))
        .and(body_json(serde_json::json!({
            "sender_id": draft.sender_id,
            "receiver_id": draft.receiver_id,
            "content": "hello",
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(&created))
        .expect(1)
        .mount(&server)
        .await;

    let api = HttpApi::new(server.uri());
    assert_eq!(api.create_message(&draft).await.unwrap(), created);
}

#[tokio::test]
async fn read_update_patches_message() {
    let server = MockServer::start().await;
    let updated = message(Uuid::new_v4(), "seen", true);
    Mock::given(method("PATCH"))
        .and(path(format!("/messages/{}", updated.id)))
        .and(body_json(serde_json::json!({ "read": true })))
        .respond_with(ResponseTemplate::new(200).set_body_json(&updated))
        .mount(&server)
        .await;

    let api = HttpApi::new(server.uri());
    let result = api.update_read_state(updated.id, true).await.unwrap();
    assert!(result.read);
}

#[tokio::test]
async fn server_errors_carry_status_and_body() {
    let server = MockServer::start().await;
    let conversation_id = Uuid::new_v4();
    Mock::given(method("GET"))
        .and(path(format!("/conversations/{}/messages", conversation_id)))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let api = HttpApi::new(server.uri());
    match api.list_messages(conversation_id).await {
        Err(ApiError::Status { status, body }) => {
            assert_eq!(status, 500);
            assert_eq!(body, "boom");
        }
        other => panic!("unexpected result: {:?}", other.map(|m| m.len())),
    }
}

#[tokio::test]
async fn malformed_body_is_a_decode_error() {
    let server = MockServer::start().await;
    let id = Uuid::new_v4();
    Mock::given(method("PATCH"))
        .and(path(format!("/messages/{}", id)))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let api = HttpApi::new(server.uri());
    let err = api.update_read_state(id, true).await.unwrap_err();
    assert!(matches!(err, ApiError::Decode(_)));
}
